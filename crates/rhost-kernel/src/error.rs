//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Errors from
//! the sandbox and directive crates are wrapped rather than flattened so
//! callers can still match on them.

use rhost_directive::DirectiveError;
use rhost_sandbox::SandboxError;

/// Unified error type for the rhost kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// No runner is registered under the requested function name.
    #[error("runner not found: {name}")]
    RunnerNotFound { name: String },

    /// The directive declares a function the bundle has no module for.
    #[error("bundle has no module for declared function `{function}`")]
    MissingRunnable { function: String },

    /// Two declared functions share a bare name.  Runners are keyed by bare
    /// name, so the second would silently replace the first.
    #[error("functions `{first}` and `{second}` share the name `{name}`; runners are keyed by name")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    /// Dispatch was requested for a bundle without a directive.
    #[error("bundle carries no directive")]
    NoDirective,

    // -- Dispatch errors ----------------------------------------------------
    /// No handler matches the request's method and path.
    #[error("no handler for {method} {path}")]
    NoHandler { method: String, path: String },

    /// A function in a handler pipeline failed; the pipeline was aborted.
    #[error("step {index} failed in function `{function}`: {source}")]
    StepFailed {
        index: usize,
        function: String,
        #[source]
        source: SandboxError,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    // -- Upstream crate errors ----------------------------------------------
    /// An error propagated from the directive crate.
    #[error("directive error: {0}")]
    Directive(#[from] DirectiveError),

    /// An error propagated from the sandbox crate.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn step_failed_keeps_source() {
        let err = KernelError::StepFailed {
            index: 1,
            function: "getUser".into(),
            source: SandboxError::NoResult {
                name: "getUser".into(),
            },
        };
        assert!(err.to_string().starts_with("step 1 failed in function `getUser`"));
        assert!(err.source().is_some());
    }

    #[test]
    fn name_collision_names_both_functions() {
        let err = KernelError::NameCollision {
            name: "get".into(),
            first: "a#get".into(),
            second: "b#get".into(),
        };
        let message = err.to_string();
        assert!(message.contains("`a#get`") && message.contains("`b#get`"), "{message}");
    }

    #[test]
    fn wraps_directive_errors() {
        let err: KernelError = DirectiveError::MissingVersion.into();
        assert!(matches!(err, KernelError::Directive(DirectiveError::MissingVersion)));
    }
}
