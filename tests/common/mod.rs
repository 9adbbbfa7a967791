//! Shared test utilities and fixtures for the CloudPuff test suite.
//!
//! Include this module in your integration tests:
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Variables and macros shared by the fixture templates, imported as a
/// directory.
pub const COMMON_MAIN: &str = "\
--- !vars
env: prod
prefix: assets

--- !macros
instance:
    defaultParams:
        size: t3.micro
    content:
        Type: AWS::EC2::Instance
        Properties:
            InstanceType: $$size
";

/// A template using imports, variables, macros and tags.
pub const WEB_TEMPLATE: &str = "\
__imports__: !import common

---
Meta:
    Description: Web servers
    Version: 2
    Tags:
        Environment: \"@@Environment\"

Parameters:
    Environment:
        Type: String
        Default: $$env

Resources:
    Bucket:
        Type: AWS::S3::Bucket
        Properties:
            BucketName: $${prefix}-$${env}
    Server:
        <: !call-macro
            macro: instance
            size: t3.small
";

/// Writes a file below `dir`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Writes the web template and its imports, returning the template path.
pub fn web_template(dir: &Path) -> PathBuf {
    write_file(dir, "common/__main__.yaml", COMMON_MAIN);
    write_file(dir, "web_servers.yaml", WEB_TEMPLATE)
}
