//! Console prompts for template parameters.

use console::Term;
use dialoguer::{theme::ColorfulTheme, Input, Password};

use crate::cloudformation::TemplateParameter;
use crate::error::{Error, Result};

/// Asks for template parameter values on the terminal.
pub struct ParamPrompter {
    term: Term,
    theme: ColorfulTheme,
}

impl Default for ParamPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamPrompter {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
            theme: ColorfulTheme::default(),
        }
    }

    /// Prompts for a parameter, showing its description and default.
    ///
    /// An empty answer takes the default. Required parameters are asked for
    /// again until they have a value. `NoEcho` parameters are read without
    /// echoing.
    pub fn prompt(&self, param: &TemplateParameter, required: bool) -> Result<String> {
        if !self.term.is_term() {
            return Err(Error::InvalidInput(format!(
                "Missing a value for the parameter \"{}\". Pass it with --param {}=VALUE",
                param.key, param.key
            )));
        }

        let _ = self.term.write_line("");
        if let Some(description) = param.description.as_deref() {
            let _ = self.term.write_line(description);
        }

        let default_value = param.default_value.as_deref().unwrap_or_default();

        loop {
            let value = if param.no_echo {
                Password::with_theme(&self.theme)
                    .with_prompt(prompt_label(&param.key, default_value))
                    .allow_empty_password(true)
                    .interact_on(&self.term)
            } else {
                Input::<String>::with_theme(&self.theme)
                    .with_prompt(prompt_label(&param.key, default_value))
                    .allow_empty(true)
                    .interact_text_on(&self.term)
            }
            .map_err(|e| {
                Error::InvalidInput(format!(
                    "Unable to read a value for the parameter \"{}\": {}",
                    param.key, e
                ))
            })?;

            let value = if value.is_empty() {
                default_value.to_string()
            } else {
                value
            };

            if !value.is_empty() || !required {
                return Ok(value);
            }
        }
    }
}

/// Builds the prompt label, showing the default in brackets.
fn prompt_label(key: &str, default_value: &str) -> String {
    if default_value.is_empty() {
        key.to_string()
    } else {
        format!("{} [{}]", key, default_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_label() {
        assert_eq!(prompt_label("KeyName", ""), "KeyName");
        assert_eq!(prompt_label("InstanceType", "t3.micro"), "InstanceType [t3.micro]");
    }
}
