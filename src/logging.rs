//! Logging setup for the command-line tools.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// AWS SDK crates that are only worth hearing from when debugging.
const AWS_TARGETS: [&str; 5] = [
    "aws_config",
    "aws_smithy_runtime",
    "aws_smithy_runtime_api",
    "aws_sdk_cloudformation",
    "aws_sdk_ec2",
];

/// Builds the default filter directive.
///
/// Debugging enables `debug` for CloudPuff and leaves the SDK at `info`.
/// Otherwise only warnings are shown and the SDK is limited to errors.
pub fn default_filter(debug: bool) -> String {
    let (level, aws_level) = if debug {
        ("debug", "info")
    } else {
        ("warn", "error")
    };

    let mut directives = vec![level.to_string()];
    directives.extend(
        AWS_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, aws_level)),
    );

    directives.join(",")
}

/// Initializes the global subscriber. `RUST_LOG` takes precedence.
pub fn init_logging(debug: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    // Logs go to stderr so they never mix with compiled templates on stdout
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(debug),
        )
        .with(env_filter)
        .try_init();
}
