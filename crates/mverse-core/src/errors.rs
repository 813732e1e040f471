//! Structured error types shared across mverse crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`MverseError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (factor names, row ids, sizes).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the multiverse pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum MverseError {
    /// Factor configuration is malformed or inconsistent.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Row dataset ingestion or integrity errors.
    #[error("dataset error: {0}")]
    Dataset(ErrorInfo),
    /// Fatal failures reported by the effect estimator.
    #[error("estimate error: {0}")]
    Estimate(ErrorInfo),
    /// Null-distribution sampling errors.
    #[error("bootstrap error: {0}")]
    Bootstrap(ErrorInfo),
    /// Serialization, table format and file IO errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// The run was cancelled between work units.
    #[error("cancelled: {0}")]
    Cancelled(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl MverseError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            MverseError::Config(info)
            | MverseError::Dataset(info)
            | MverseError::Estimate(info)
            | MverseError::Bootstrap(info)
            | MverseError::Serde(info)
            | MverseError::Cancelled(info) => info,
        }
    }

    /// Shorthand for a configuration error without extra context.
    pub fn config(code: &str, message: impl Into<String>) -> Self {
        MverseError::Config(ErrorInfo::new(code, message))
    }

    /// Shorthand for a dataset error without extra context.
    pub fn dataset(code: &str, message: impl Into<String>) -> Self {
        MverseError::Dataset(ErrorInfo::new(code, message))
    }

    /// Shorthand for a serde/IO error wrapping a foreign error value.
    pub fn serde(code: &str, err: impl ToString) -> Self {
        MverseError::Serde(ErrorInfo::new(code, err.to_string()))
    }

    /// Returns true when the error stems from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MverseError::Cancelled(_))
    }
}
