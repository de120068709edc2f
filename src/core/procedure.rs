//! Generated procedure - the executable form of a compiled procedure

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Comparison operator used by checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
        }
    }

    /// Evaluate `lhs <op> rhs`.
    ///
    /// Numeric when both sides start with a number (unit suffixes are
    /// ignored), string comparison otherwise.
    pub fn evaluate(&self, lhs: &str, rhs: &str) -> bool {
        let ordering = match (leading_number(lhs), leading_number(rhs)) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                None => return matches!(self, Comparison::Ne),
            },
            _ => lhs.trim().cmp(rhs.trim()),
        };
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(Comparison::Eq),
            "!=" => Ok(Comparison::Ne),
            "<" => Ok(Comparison::Lt),
            ">" => Ok(Comparison::Gt),
            "<=" => Ok(Comparison::Le),
            ">=" => Ok(Comparison::Ge),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn number_prefix() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*[-+]?(\d+\.?\d*|\.\d+)([eE][-+]?\d+)?").ok())
        .as_ref()
}

/// Parse the number a measurement starts with, e.g. `2.5` from `"2.5V"`
pub fn leading_number(text: &str) -> Option<f64> {
    number_prefix()?
        .find(text)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
}

/// A value passed to an operation or compared by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Argument {
    /// Text entered at authoring time
    Literal { value: String },
    /// Left blank by the author; read from the data map at run time
    Pending { key: String },
}

impl Argument {
    pub fn literal(value: impl Into<String>) -> Self {
        Argument::Literal { value: value.into() }
    }

    pub fn pending(key: impl Into<String>) -> Self {
        Argument::Pending { key: key.into() }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Literal { value } => write!(f, "{:?}", value),
            Argument::Pending { key } => write!(f, "${{{}}}", key),
        }
    }
}

/// A check attached to a device call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub op: Comparison,
    pub expected: Argument,
}

/// What a compiled step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Call a device operation and store the result under `store_as`
    Invoke {
        device: String,
        operation: String,
        #[serde(default)]
        args: Vec<Argument>,
        store_as: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<Check>,
    },
    /// Compare two values
    Compare {
        lhs: Argument,
        op: Comparison,
        rhs: Argument,
    },
    /// Write a data map entry
    Assign { key: Argument, value: Argument },
    /// Free text, logged when reached
    Note { text: String },
}

/// One executable statement and the authored step it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// 1-based index of the source step
    pub step: usize,

    #[serde(flatten)]
    pub action: Action,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3}: ", self.step)?;
        match &self.action {
            Action::Invoke {
                device,
                operation,
                args,
                store_as,
                check,
            } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{}.{}({}) -> {}", device, operation, args.join(", "), store_as)?;
                if let Some(check) = check {
                    write!(f, " check {} {}", check.op, check.expected)?;
                }
                Ok(())
            }
            Action::Compare { lhs, op, rhs } => write!(f, "check {} {} {}", lhs, op, rhs),
            Action::Assign { key, value } => write!(f, "set {} = {}", key, value),
            Action::Note { text } => write!(f, "# {}", text),
        }
    }
}

/// The compiled, directly executable form of a parsed procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProcedure {
    pub name: String,
    pub statements: Vec<Statement>,
}

impl GeneratedProcedure {
    /// Devices called by this procedure, in first-use order
    pub fn devices(&self) -> Vec<&str> {
        let mut devices: Vec<&str> = Vec::new();
        for statement in &self.statements {
            if let Action::Invoke { device, .. } = &statement.action {
                if !devices.contains(&device.as_str()) {
                    devices.push(device);
                }
            }
        }
        devices
    }

    /// Data keys the caller must fill before running, in first-use order
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for statement in &self.statements {
            let args: Vec<&Argument> = match &statement.action {
                Action::Invoke { args, check, .. } => {
                    args.iter().chain(check.iter().map(|c| &c.expected)).collect()
                }
                Action::Compare { lhs, rhs, .. } => vec![lhs, rhs],
                Action::Assign { key, value } => vec![key, value],
                Action::Note { .. } => Vec::new(),
            };
            for arg in args {
                if let Argument::Pending { key } = arg {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read procedure {}", path.display()))?;
        Self::from_yaml(&content)
    }
}

impl fmt::Display for GeneratedProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "procedure {:?}", self.name)?;
        for statement in &self.statements {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}
