//! Output formatting module for CloudPuff
//!
//! Provides colored status messages, stack event lines and the stack
//! listings printed by the commands.

use colored::{Color, Colorize};

use crate::cloudformation::{StackEvent, StackInfo};

/// Icon printed before errors.
pub const ICON_ERROR: &str = "\u{2717}";
/// Icon printed before successes.
pub const ICON_SUCCESS: &str = "\u{2713}";
/// Icon printed before in-progress events.
pub const ICON_PROGRESS: &str = "\u{25ba}";

/// Returns the human-readable action for a stack event status.
pub fn event_action_label(status: &str) -> &str {
    match status {
        "CREATE_COMPLETE" => "Created",
        "CREATE_FAILED" => "Failed to create",
        "CREATE_IN_PROGRESS" => "Creating",
        "DELETE_COMPLETE" => "Deleted",
        "DELETE_FAILED" => "Failed to delete",
        "DELETE_IN_PROGRESS" => "Deleting",
        "ROLLBACK_COMPLETE" => "Rolled back",
        "ROLLBACK_FAILED" => "Failed to roll back",
        "ROLLBACK_IN_PROGRESS" => "Rolling back",
        "UPDATE_COMPLETE" => "Updated",
        "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => "Updated and cleaning up",
        "UPDATE_IN_PROGRESS" => "Updating",
        "UPDATE_ROLLBACK_COMPLETE" => "Rolled back update for",
        "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => "Rolled back and cleaning up",
        "UPDATE_ROLLBACK_FAILED" => "Failed to roll back update for",
        "UPDATE_ROLLBACK_IN_PROGRESS" => "Rolling back update for",
        other => other,
    }
}

/// Returns the icon and color used to display a status.
///
/// Rollbacks in progress are shown in red.
pub fn status_style(status: &str) -> (&'static str, Option<Color>) {
    let (icon, color) = if status.ends_with("FAILED") {
        (ICON_ERROR, Some(Color::Red))
    } else if status.ends_with("COMPLETE") {
        (ICON_SUCCESS, Some(Color::Green))
    } else if status.ends_with("IN_PROGRESS") {
        (ICON_PROGRESS, Some(Color::Yellow))
    } else {
        ("?", None)
    };

    if status.contains("ROLLBACK_IN_PROGRESS") {
        (icon, Some(Color::Red))
    } else {
        (icon, color)
    }
}

/// Output formatter for the commands
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        if !use_color {
            colored::control::set_override(false);
        }

        Self { use_color }
    }

    /// Whether colors are enabled
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", ICON_ERROR.red(), message);
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        println!("{} {}", ICON_SUCCESS.green(), message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "WARNING:".yellow().bold(), message);
    }

    /// Print a progress message
    pub fn progress(&self, message: &str) {
        println!("{}", message);
    }

    /// Print a command the user can run, prefixed by a prompt
    pub fn command_hint(&self, command: &str) {
        eprintln!("{} {}", "$".cyan(), command);
    }

    /// Print a bold label followed by a value
    pub fn labelled(&self, label: &str, value: &str) {
        println!("{} {}", format!("{}:", label).bold(), value);
    }

    /// Print a stack event as it comes in
    pub fn stack_event(&self, event: &StackEvent) {
        println!("{}", format_stack_event(event));
    }

    /// Print stacks with their status, outputs and tags
    pub fn stacks(&self, stacks: &[StackInfo]) {
        for (i, stack) in stacks.iter().enumerate() {
            if i > 0 {
                println!();
                println!();
            }

            for line in format_stack(stack) {
                println!("{}", line);
            }
        }
    }
}

/// Formats a stack event: the status icon, the action and the resource,
/// followed by the indented status reason.
pub fn format_stack_event(event: &StackEvent) -> String {
    let (icon, color) = status_style(&event.resource_status);
    let action = event_action_label(&event.resource_status);

    let mut line = format!(
        "{} {} {} ({})",
        paint(icon, color),
        action,
        event.logical_resource_id,
        event.resource_type
    );

    if let Some(reason) = event.resource_status_reason.as_deref() {
        if !reason.is_empty() {
            line.push('\n');
            line.push_str(&paint(&format!("  {}", reason), color));
        }
    }

    line
}

/// Formats a stack as a list of lines for the console.
pub fn format_stack(stack: &StackInfo) -> Vec<String> {
    let (_, status_color) = status_style(&stack.status);
    let status_color = if stack.status.ends_with("PROGRESS") {
        Some(Color::Yellow)
    } else {
        status_color
    };
    let created = stack
        .created
        .map(|created| created.format("%Y-%m-%d %H:%M:%S%:z").to_string())
        .unwrap_or_default();

    let mut lines = vec![
        field(&stack.stack_name.color(Color::Cyan).to_string(), "", 0, None),
        field("Status", &stack.status, 1, status_color),
        field(
            "Description",
            stack.description.as_deref().unwrap_or_default(),
            1,
            None,
        ),
        field("ARN", &stack.stack_id, 1, None),
        field("Created", &created, 1, None),
    ];

    if !stack.outputs.is_empty() {
        lines.push(field("Outputs", "", 1, None));
        lines.extend(
            stack
                .outputs
                .iter()
                .map(|(key, value)| field(key, value, 2, None)),
        );
    }

    if !stack.tags.is_empty() {
        lines.push(field("Tags", "", 1, None));
        lines.extend(
            stack
                .tags
                .iter()
                .map(|(key, value)| field(key, value, 2, None)),
        );
    }

    lines
}

/// Formats a `key: value` line with the key in bold. Each indent level is
/// four spaces.
fn field(key: &str, value: &str, indent_level: usize, value_color: Option<Color>) -> String {
    let mut line = format!("{}{}", "    ".repeat(indent_level), format!("{}:", key).bold());

    if !value.is_empty() {
        line.push(' ');
        line.push_str(&paint(value, value_color));
    }

    line
}

fn paint(text: &str, color: Option<Color>) -> String {
    match color {
        Some(color) => text.color(color).to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_event_action_label() {
        assert_eq!(event_action_label("CREATE_COMPLETE"), "Created");
        assert_eq!(
            event_action_label("UPDATE_ROLLBACK_IN_PROGRESS"),
            "Rolling back update for"
        );
        assert_eq!(event_action_label("IMPORT_COMPLETE"), "IMPORT_COMPLETE");
    }

    #[test]
    fn test_status_style() {
        assert_eq!(status_style("CREATE_FAILED"), (ICON_ERROR, Some(Color::Red)));
        assert_eq!(
            status_style("CREATE_COMPLETE"),
            (ICON_SUCCESS, Some(Color::Green))
        );
        assert_eq!(
            status_style("CREATE_IN_PROGRESS"),
            (ICON_PROGRESS, Some(Color::Yellow))
        );
        assert_eq!(
            status_style("UPDATE_ROLLBACK_IN_PROGRESS"),
            (ICON_PROGRESS, Some(Color::Red))
        );
        assert_eq!(status_style("UNKNOWN"), ("?", None));
    }

    #[test]
    fn test_format_stack_event() {
        plain();
        let event = StackEvent {
            event_id: "1".into(),
            logical_resource_id: "WebServer".into(),
            resource_type: "AWS::EC2::Instance".into(),
            resource_status: "CREATE_FAILED".into(),
            resource_status_reason: Some("Instance type not supported".into()),
            timestamp: None,
        };

        assert_eq!(
            format_stack_event(&event),
            "\u{2717} Failed to create WebServer (AWS::EC2::Instance)\n  Instance type not supported"
        );
    }

    #[test]
    fn test_format_stack() {
        plain();
        let mut outputs = IndexMap::new();
        outputs.insert("VpcId".to_string(), "vpc-123".to_string());

        let stack = StackInfo {
            stack_id: "arn:aws:cloudformation:stack/web".into(),
            stack_name: "web".into(),
            status: "CREATE_COMPLETE".into(),
            description: Some("Web servers".into()),
            outputs,
            ..Default::default()
        };

        assert_eq!(
            format_stack(&stack),
            vec![
                "web:",
                "    Status: CREATE_COMPLETE",
                "    Description: Web servers",
                "    ARN: arn:aws:cloudformation:stack/web",
                "    Created:",
                "    Outputs:",
                "        VpcId: vpc-123",
            ]
        );
    }
}
