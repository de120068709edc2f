//! Step tokens as produced by the procedure editor

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Editor symbol for a free-text slot
pub const STRING_SYMBOL: &str = "[STR]";
/// Editor symbol for a comparison operator slot
pub const OPERATOR_SYMBOL: &str = "[OP]";
/// Editor symbol for a device slot
pub const DEVICE_SYMBOL: &str = "[DEV]";
/// Editor symbol for a function slot
pub const FUNCTION_SYMBOL: &str = "[FNC]";

/// Value the editor shows for an unfilled string slot
pub const UNSET_STRING: &str = "???";
/// Value the editor shows for an unselected operator
pub const UNSET_OPERATOR: &str = "-?-";

/// Kind of a single slot in a step definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenKind {
    /// Fixed keyword printed as-is
    Literal(String),
    /// User-entered text
    StringPlaceholder,
    /// One of the comparison operators
    Operator,
    /// Reference to a device in the hardware registry
    DeviceRef,
    /// Reference to an operation of the preceding device's driver
    FunctionRef,
}

impl From<String> for TokenKind {
    fn from(symbol: String) -> Self {
        match symbol.as_str() {
            STRING_SYMBOL => TokenKind::StringPlaceholder,
            OPERATOR_SYMBOL => TokenKind::Operator,
            DEVICE_SYMBOL => TokenKind::DeviceRef,
            FUNCTION_SYMBOL => TokenKind::FunctionRef,
            _ => TokenKind::Literal(symbol),
        }
    }
}

impl From<TokenKind> for String {
    fn from(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Literal(keyword) => keyword,
            TokenKind::StringPlaceholder => STRING_SYMBOL.to_string(),
            TokenKind::Operator => OPERATOR_SYMBOL.to_string(),
            TokenKind::DeviceRef => DEVICE_SYMBOL.to_string(),
            TokenKind::FunctionRef => FUNCTION_SYMBOL.to_string(),
        }
    }
}

/// A typed token with its entered value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    StringPlaceholder(String),
    Operator(String),
    DeviceRef(String),
    FunctionRef(String),
}

impl Token {
    /// Build a token from a kind and the value entered for it.
    ///
    /// Literal tokens always carry their keyword; the entered value is
    /// ignored for them, like the editor does.
    pub fn new(kind: &TokenKind, value: &str) -> Self {
        match kind {
            TokenKind::Literal(keyword) => Token::Literal(keyword.clone()),
            TokenKind::StringPlaceholder => Token::StringPlaceholder(value.to_string()),
            TokenKind::Operator => Token::Operator(value.to_string()),
            TokenKind::DeviceRef => Token::DeviceRef(value.to_string()),
            TokenKind::FunctionRef => Token::FunctionRef(value.to_string()),
        }
    }

    /// Whether a string placeholder still holds the editor's unset sentinel
    pub fn is_unfilled(&self) -> bool {
        match self {
            Token::StringPlaceholder(value) => {
                let value = value.trim();
                value.is_empty() || value == UNSET_STRING
            }
            _ => false,
        }
    }
}

/// One authored line of a procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Entered value for each slot
    pub values: Vec<String>,

    /// Kind of each slot, parallel to `values`
    pub kinds: Vec<TokenKind>,
}

impl StepDefinition {
    pub fn new(values: Vec<String>, kinds: Vec<TokenKind>) -> Self {
        Self { values, kinds }
    }

    /// Build a fresh step from an editor pattern, with every slot unset
    pub fn from_pattern(pattern: &[&str]) -> Self {
        let kinds: Vec<TokenKind> = pattern.iter().map(|s| TokenKind::from(s.to_string())).collect();
        let values = kinds
            .iter()
            .map(|kind| match kind {
                TokenKind::StringPlaceholder => UNSET_STRING.to_string(),
                TokenKind::Operator => UNSET_OPERATOR.to_string(),
                other => String::from(other.clone()),
            })
            .collect();
        Self { values, kinds }
    }

    /// Check the values/kinds invariant
    pub fn is_well_formed(&self) -> bool {
        self.values.len() == self.kinds.len()
    }

    /// Zip kinds and values into typed tokens.
    ///
    /// Returns `None` when the two sequences differ in length.
    pub fn tokens(&self) -> Option<Vec<Token>> {
        if !self.is_well_formed() {
            return None;
        }
        Some(
            self.kinds
                .iter()
                .zip(&self.values)
                .map(|(kind, value)| Token::new(kind, value))
                .collect(),
        )
    }
}

impl fmt::Display for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.values.join(" "))
    }
}

/// An ordered list of step definitions; order is execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedProcedure {
    /// Procedure name
    pub name: String,

    /// Steps in authored order
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl ParsedProcedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step, builder style
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Load an authored procedure from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read procedure file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse an authored procedure from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let procedure: ParsedProcedure = serde_yaml::from_str(yaml)?;
        Ok(procedure)
    }
}
