//! Parameterized statements.

use std::fmt;

use crate::graph::value::{Params, Value};

/// A query-language string plus the parameters bound to it.
///
/// Parameters are referenced in the text using `$name` syntax and are sent
/// separately from the text, never interpolated into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    text: String,
    parameters: Params,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Params::new(),
        }
    }

    pub fn with_parameters(text: impl Into<String>, parameters: Params) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Adds a parameter, replacing any previous value under the same name.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }
}

impl From<&str> for Statement {
    fn from(text: &str) -> Self {
        Statement::new(text)
    }
}

impl From<String> for Statement {
    fn from(text: String) -> Self {
        Statement::new(text)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
