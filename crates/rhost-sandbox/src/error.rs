//! Sandbox error types.
//!
//! All sandbox subsystems surface errors through [`SandboxError`], which is the
//! single error type returned by every public API in this crate.  Capability
//! host functions never return these to the guest; they translate failures
//! into sentinel integers instead (see [`crate::api`]).

/// Unified error type for the runnable sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    // -- Load errors --------------------------------------------------------
    /// The module bytes could not be read, compiled, or instantiated.
    ///
    /// Fatal for the owning environment until `add_instance` is retried.
    #[error("failed to load runnable `{name}`: {reason}")]
    Load {
        /// Name of the environment whose module failed to load.
        name: String,
        /// Human-readable description of what went wrong.
        reason: String,
    },

    /// The module does not export a function the host requires.
    #[error("missing required export: {name}")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    // -- Pool errors --------------------------------------------------------
    /// `use_instance` was called on an environment with an empty pool.
    #[error("no instance available in environment `{name}`")]
    NoInstanceAvailable {
        /// Name of the environment.
        name: String,
    },

    // -- Memory bridge errors ----------------------------------------------
    /// A pointer/length pair falls outside the guest's linear memory.
    #[error("guest memory access out of bounds: pointer {pointer}, length {length}, memory size {size}")]
    MemoryAccess {
        /// Guest pointer.
        pointer: i64,
        /// Requested length in bytes.
        length: i64,
        /// Current size of the guest memory in bytes.
        size: usize,
    },

    // -- Execution errors ---------------------------------------------------
    /// A call into the guest failed for a reason other than a known trap.
    #[error("wasm execution error: {0}")]
    Execution(String),

    /// A Wasm trap was raised during execution.
    #[error("wasm trap: {0}")]
    Trap(String),

    /// Execution exceeded the configured wall-clock limit.
    #[error("timeout: execution exceeded {limit_ms}ms")]
    Timeout {
        /// The configured limit in milliseconds.
        limit_ms: u64,
    },

    /// The guest called WASI `proc_exit`.
    #[error("runnable exited with code {code}")]
    Exit {
        /// Exit code passed to `proc_exit`.
        code: i32,
    },

    /// Execution ran out of fuel.
    #[error("fuel exhausted: execution exceeded {limit} units")]
    FuelExhausted {
        /// The configured fuel budget.
        limit: u64,
    },

    /// The entry point returned without delivering a result.
    #[error("runnable `{name}` returned without calling return_result")]
    NoResult {
        /// Name of the environment.
        name: String,
    },

    // -- Identifier errors --------------------------------------------------
    /// The system random source failed while minting a token.
    #[error("failed to generate identifier: system randomness unavailable")]
    Entropy,

    // -- Bundle errors ------------------------------------------------------
    /// A bundle archive is malformed.
    #[error("invalid bundle: {reason}")]
    Bundle {
        /// Human-readable description of what went wrong.
        reason: String,
    },

    // -- Upstream errors ----------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred (e.g. reading a `.wasm` file from disk).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_display() {
        let err = SandboxError::Load {
            name: "getUser".into(),
            reason: "bad magic".into(),
        };
        assert_eq!(err.to_string(), "failed to load runnable `getUser`: bad magic");
    }

    #[test]
    fn missing_export_display() {
        let err = SandboxError::MissingExport {
            name: "allocate".into(),
        };
        assert_eq!(err.to_string(), "missing required export: allocate");
    }

    #[test]
    fn memory_access_display() {
        let err = SandboxError::MemoryAccess {
            pointer: 65530,
            length: 100,
            size: 65536,
        };
        assert_eq!(
            err.to_string(),
            "guest memory access out of bounds: pointer 65530, length 100, memory size 65536"
        );
    }

    #[test]
    fn timeout_error_display() {
        let err = SandboxError::Timeout { limit_ms: 5000 };
        assert_eq!(err.to_string(), "timeout: execution exceeded 5000ms");
    }

    #[test]
    fn no_result_display() {
        let err = SandboxError::NoResult {
            name: "silent".into(),
        };
        assert!(err.to_string().contains("return_result"));
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let sandbox_err = SandboxError::from(io_err);
        assert!(sandbox_err.to_string().contains("file gone"));
    }
}
