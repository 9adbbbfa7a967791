//! CloudPuff template language.
//!
//! Templates are YAML documents describing a CloudFormation stack, extended
//! with variables, macros, file imports and an inline syntax for
//! CloudFormation functions:
//!
//! ```yaml
//! --- !vars
//! env: prod
//!
//! ---
//! Meta:
//!   Description: Web servers
//!   Version: 2
//!
//! Resources:
//!   Bucket:
//!     Type: AWS::S3::Bucket
//!     Properties:
//!       BucketName: $$env-assets-@@{AWS::Region}
//! ```
//!
//! [`TemplateReader`] turns the YAML into a [`Node`] tree and
//! [`TemplateCompiler`] turns that tree into a CloudFormation template.

pub mod compiler;
pub mod expression;
pub mod node;
pub mod reader;
pub mod state;
pub mod string_parser;

pub use compiler::{generic_stack_name, AmiOutput, StackParamLookup, TemplateCompiler};
pub use node::{Key, Map, Node};
pub use reader::TemplateReader;
pub use state::{ProcessOptions, TemplateState};
