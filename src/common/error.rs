use thiserror::Error;

/// Result type for jweave operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the jweave weaver
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed pointcut text, kind mismatch at a non-relaxed evaluation
    /// site, or a reference to an undefined named pointcut. Configuration
    /// errors: surfaced at parse/bind time, never swallowed.
    #[error("expression error: {message}")]
    Expression { message: String },

    #[error("class format error: {message}")]
    ClassFormat { message: String },

    #[error("weave error in {class}: {message}")]
    Weave { class: String, message: String },

    #[error("definition error: {message}")]
    Definition { message: String },

    /// Framework-internal sequencing bug (e.g. querying a registry before
    /// registration). Not recoverable user input.
    #[error("internal weaver error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create an expression parse/evaluation error
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression { message: message.into() }
    }

    /// Create a class format error
    pub fn class_format(message: impl Into<String>) -> Self {
        Self::ClassFormat { message: message.into() }
    }

    /// Create a per-class weave error
    pub fn weave(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Weave { class: class.into(), message: message.into() }
    }

    /// Create a definition/configuration error
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}
