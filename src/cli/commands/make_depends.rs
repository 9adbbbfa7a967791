//! Make-depends command
//!
//! Prints a Makefile rule listing every file a template depends on.

use super::CommandContext;
use crate::templates::TemplateReader;
use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Arguments for the make-depends command
#[derive(Parser, Debug, Clone)]
pub struct MakeDependsArgs {
    /// The template file to process
    #[arg(value_name = "FILENAME")]
    pub filename: PathBuf,

    /// The file that would be generated, for the dependency information
    #[arg(value_name = "DEST_FILENAME")]
    pub dest_filename: PathBuf,
}

impl MakeDependsArgs {
    /// Execute the make-depends command
    pub async fn execute(&self, _ctx: &mut CommandContext) -> Result<i32> {
        if !self.filename.exists() {
            bail!(
                "The template file \"{}\" could not be found.",
                self.filename.display()
            );
        }

        let mut reader = TemplateReader::new();
        reader.load_file(&self.filename)?;

        println!(
            "{}",
            dependency_rule(&self.dest_filename, &self.filename, &reader)
        );

        Ok(0)
    }
}

/// Builds `DEST: FILE imported... embedded...`.
pub fn dependency_rule(dest: &Path, filename: &Path, reader: &TemplateReader) -> String {
    let deps: Vec<String> = std::iter::once(filename)
        .chain(reader.state.imported_files.iter().map(PathBuf::as_path))
        .chain(reader.state.embedded_files.iter().map(PathBuf::as_path))
        .map(|path| path.display().to_string())
        .collect();

    format!("{}: {}", dest.display(), deps.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_dependency_rule() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.yaml"), "--- !vars\nenv: prod\n").unwrap();

        let template = dir.path().join("web.yaml");
        fs::write(&template, "__imports__: !import common.yaml\nResources: {}\n").unwrap();

        let mut reader = TemplateReader::new();
        reader.load_file(&template).unwrap();

        let rule = dependency_rule(Path::new("out/web.json"), &template, &reader);
        assert_eq!(
            rule,
            format!(
                "out/web.json: {} {}",
                template.display(),
                dir.path().join("common.yaml").display()
            )
        );
    }
}
