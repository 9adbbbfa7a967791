//! # CloudPuff - CloudFormation templates, stacks and AMIs
//!
//! CloudPuff compiles YAML templates into CloudFormation templates and
//! drives CloudFormation and EC2 to launch stacks and bake AMIs.
//!
//! ## Core Concepts
//!
//! - **Templates**: YAML documents with variables (`$$name`), macros,
//!   imports, embedded files and an inline syntax for CloudFormation
//!   functions (`@@Ref`, `<% If %>` blocks and more)
//! - **Stacks**: CloudFormation stacks launched from compiled templates,
//!   tagged with the template's generic stack name and version
//! - **Stack parameters**: values prompted for, given on the command line,
//!   or looked up from the outputs of other stacks
//! - **AMIs**: images built from EC2 instances of a temporary stack
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CLI Interface                         │
//! │   (cloudpuff + cloudpuff-* binaries, clap-based parsing)     │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//! ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐
//! │    Templates    │  │ CloudFormation  │  │   AMI Creator   │
//! │ (reader, state, │  │ (stacks, events │  │   (EC2 images)  │
//! │    compiler)    │  │   and outputs)  │  │                 │
//! └─────────────────┘  └─────────────────┘  └─────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use cloudpuff::templates::TemplateCompiler;
//!
//! fn main() -> cloudpuff::Result<()> {
//!     let mut compiler = TemplateCompiler::new(false);
//!     compiler.load_file("web.yaml".as_ref())?;
//!     println!("{}", compiler.to_json()?);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

// ============================================================================
// Core
// ============================================================================

/// Error types for CloudPuff
pub mod error;

/// Configuration loading and merging
pub mod config;

/// Logging setup
pub mod logging;

// ============================================================================
// Templates
// ============================================================================

/// Template reader, string syntax and compiler
pub mod templates;

// ============================================================================
// AWS
// ============================================================================

/// CloudFormation stacks
pub mod cloudformation;

/// AMI creation
pub mod ami;

/// Stack parameter handling
pub mod params;

// ============================================================================
// Command Line
// ============================================================================

/// Command-line interface
pub mod cli;

pub use error::{Error, Result};
