//! Error types shared by the registrar, the dispatch layer and the mirror.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors surfaced by module registration, field access and method dispatch.
#[derive(Debug, Error)]
pub enum StateError {
    /// A module with this name is already registered.
    #[error("state module name \"{0}\" is already in use")]
    DuplicateModule(String),

    /// An auto-generated setter was called for a get-only computed field.
    #[error("can't set value for computed property \"{field}\" using auto-generated setter")]
    UnsettableComputed { field: String },

    #[error("no state module named \"{0}\"")]
    UnknownModule(String),

    #[error("module \"{module}\" has no field \"{field}\"")]
    UnknownField { module: String, field: String },

    /// The field exists but holds a method, not a value.
    #[error("field \"{module}.{field}\" is a method, not a value")]
    NotAValue { module: String, field: String },

    /// The field exists but holds a value, not a method.
    #[error("field \"{module}.{field}\" is not a method")]
    NotAMethod { module: String, field: String },

    /// Direct assignment to a get-only computed field.
    #[error("field \"{module}.{field}\" has a getter but no setter")]
    NotAssignable { module: String, field: String },

    /// An explicitly declared action was invoked while a derivation was evaluating.
    #[error("action \"{signature}\" cannot run inside a derivation")]
    ActionInDerivation { signature: String },

    /// A memoized computation tried to read its own result.
    #[error("cyclic derivation detected")]
    CyclicDerivation,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A user-supplied method body failed.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StateError {
    /// Shorthand for a failing method body.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        StateError::Failed(anyhow::anyhow!("{message}"))
    }
}
