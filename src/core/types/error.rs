//! Error types for walking foreign memory

use super::address::Address;
use thiserror::Error;

/// Main error type for inspection and traversal
#[derive(Error, Debug)]
pub enum WalkError {
    #[error("Unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Type '{type_name}' has no field '{field}'")]
    NoSuchField { type_name: String, field: String },

    #[error("Type mismatch for {context}: expected {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("Failed to read {len} bytes at {address}: {reason}")]
    ReadFailed {
        address: Address,
        len: usize,
        reason: String,
    },

    #[error(
        "Free list of slice area {area} corrupted at index {index} (previous: {})",
        describe_previous(.previous)
    )]
    FreeListCorrupted {
        area: Address,
        index: u64,
        previous: Option<u32>,
    },

    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("{operation}: {source}")]
    Traversal {
        operation: String,
        #[source]
        source: Box<WalkError>,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Hex decoding error: {0}")]
    HexError(#[from] hex::FromHexError),
}

/// Result type alias for walker operations
pub type WalkResult<T> = Result<T, WalkError>;

fn describe_previous(previous: &Option<u32>) -> String {
    match previous {
        Some(index) => index.to_string(),
        None => "free_head".to_string(),
    }
}

impl WalkError {
    /// Creates a read failed error
    pub fn read_failed(address: Address, len: usize, reason: impl Into<String>) -> Self {
        WalkError::ReadFailed {
            address,
            len,
            reason: reason.into(),
        }
    }

    /// Creates a missing field error
    pub fn no_such_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        WalkError::NoSuchField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    /// Creates a type mismatch error
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        WalkError::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an invalid expression error
    pub fn invalid_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        WalkError::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Innermost error, skipping traversal context
    pub fn root_cause(&self) -> &WalkError {
        match self {
            WalkError::Traversal { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Attaches the attempted operation to a failure
pub trait WalkContext<T> {
    fn walk_context<F, S>(self, operation: F) -> WalkResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> WalkContext<T> for WalkResult<T> {
    fn walk_context<F, S>(self, operation: F) -> WalkResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| WalkError::Traversal {
            operation: operation().into(),
            source: Box::new(source),
        })
    }
}
