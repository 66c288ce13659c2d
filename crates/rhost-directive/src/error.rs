//! Directive error types.
//!
//! Parsing, validation, and name resolution all surface errors through
//! [`DirectiveError`].  A directive that produced one is never promoted to a
//! [`ValidatedDirective`](crate::ValidatedDirective).

/// Unified error type for the directive crate.
#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    // -- Structure -----------------------------------------------------------
    /// The directive has no identifier.
    #[error("directive has no identifier")]
    MissingIdentifier,

    /// The directive has no version.
    #[error("directive has no version")]
    MissingVersion,

    /// A declared function has an empty name.
    #[error("function at position {index} has no name")]
    EmptyFunctionName { index: usize },

    /// Two functions share the same `namespace#name`.
    #[error("function `{reference}` is declared more than once")]
    DuplicateFunction { reference: String },

    /// A handler has no steps.
    #[error("handler for `{handler}` has no steps")]
    EmptyHandler { handler: String },

    /// A group step lists no functions.
    #[error("handler for `{handler}`: step {step} is an empty group")]
    EmptyGroup { handler: String, step: usize },

    /// A group step follows a single step under [`GroupPolicy::LeadingOnly`](crate::GroupPolicy::LeadingOnly).
    #[error("handler for `{handler}`: group at step {step} follows a single function")]
    GroupAfterSingle { handler: String, step: usize },

    /// A step sets both `fn` and `group`, or neither.
    #[error("invalid step: {reason}")]
    InvalidStep { reason: String },

    // -- References ----------------------------------------------------------
    /// A step references a function the directive does not declare.
    #[error("step references missing function `{reference}`")]
    MissingFunction { reference: String },

    /// An FQFN was requested for a function the directive does not declare.
    #[error("function `{reference}` is not declared")]
    UnknownFunction { reference: String },

    /// A bare name matches functions in more than one namespace.
    #[error("reference `{reference}` is ambiguous, candidates: {}", candidates.join(", "))]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },

    /// A reference names a version other than the directive's own.
    #[error("reference `{reference}` does not match directive version `{version}`")]
    VersionMismatch { reference: String, version: String },

    // -- Serialization -------------------------------------------------------
    /// YAML serialization or deserialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The directive file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the directive crate.
pub type Result<T> = std::result::Result<T, DirectiveError>;
