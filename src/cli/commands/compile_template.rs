//! Compile-template command
//!
//! Compiles a CloudPuff template and prints the CloudFormation JSON or
//! writes it to a file.

use super::{load_template, CommandContext};
use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for the compile-template command
#[derive(Parser, Debug, Clone)]
pub struct CompileTemplateArgs {
    /// The file to output the template to
    #[arg(short = 'o', long = "out", value_name = "FILENAME")]
    pub out: Option<PathBuf>,

    /// The template file to compile
    #[arg(value_name = "FILENAME")]
    pub filename: PathBuf,
}

impl CompileTemplateArgs {
    /// Execute the compile-template command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let compiler = load_template(&self.filename, false)?;
        let dumped = compiler.to_json()?;

        match &self.out {
            Some(dest) if ctx.dry_run => {
                ctx.output.progress(&format!(
                    "Dry run: the compiled template would be written to \"{}\".",
                    dest.display()
                ));
            }
            Some(dest) => write_template(dest, &dumped)
                .map_err(|e| anyhow!("Unable to write to \"{}\": {}", dest.display(), e))?,
            None => println!("{}", dumped),
        }

        Ok(0)
    }
}

/// Writes a compiled template, creating missing parent directories.
fn write_template(dest: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = dest.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if !parent.exists() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);

            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o755);
            }

            builder.create(parent)?;
        }
    }

    fs::write(dest, content)
}
