//! Sandbox configuration.
//!
//! [`SandboxConfig`] controls the resource limits applied to every runnable
//! instance and the contract the host expects of hosted modules.  Sensible
//! defaults are provided via the [`Default`] implementation, and a
//! builder-style API allows callers to customise individual fields fluently.
//! The struct deserializes from the `[sandbox]` table of the host config.

use serde::{Deserialize, Serialize};

/// Default name of the run entry point every module must export.
pub const DEFAULT_ENTRYPOINT: &str = "run_e";

/// Resource limits and module contract for the runnable sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum linear memory a single instance may grow to, in bytes.
    ///
    /// Default: **64 MiB**.
    pub max_memory: usize,

    /// Maximum wall-clock time a single invocation may run, in
    /// milliseconds.  Enforced with wasmtime epoch interruption.
    ///
    /// Default: **5 000 ms** (5 seconds).
    pub max_execution_ms: u64,

    /// Maximum fuel (abstract instruction count) per call into the guest.
    ///
    /// Default: **1 000 000 000**.
    pub max_fuel: u64,

    /// Timeout applied to outbound `fetch_url` requests, in milliseconds.
    ///
    /// Default: **30 000 ms**.
    pub fetch_timeout_ms: u64,

    /// Name of the run export invoked with `(pointer, length, token)`.
    ///
    /// Default: **`run_e`**.
    pub entrypoint: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024,
            max_execution_ms: 5000,
            max_fuel: 1_000_000_000,
            fetch_timeout_ms: 30_000,
            entrypoint: DEFAULT_ENTRYPOINT.to_owned(),
        }
    }
}

impl SandboxConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum memory limit (in bytes).
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Set the maximum execution time (in milliseconds).
    pub fn with_max_execution_ms(mut self, ms: u64) -> Self {
        self.max_execution_ms = ms;
        self
    }

    /// Set the maximum fuel (instruction count).
    pub fn with_max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = fuel;
        self
    }

    /// Set the outbound fetch timeout (in milliseconds).
    pub fn with_fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.fetch_timeout_ms = ms;
        self
    }

    /// Set the name of the run entry point export.
    pub fn with_entrypoint(mut self, name: impl Into<String>) -> Self {
        self.entrypoint = name.into();
        self
    }
}
