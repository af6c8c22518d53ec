//! Harness configuration: YAML types, parsing and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;
