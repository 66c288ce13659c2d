//! rhost kernel.
//!
//! This crate wires the sandbox and the directive model together:
//!
//! - **[`registry`]** -- [`RunnerRegistry`], an explicitly owned map from
//!   function name to [`Runner`](rhost_sandbox::Runner), backed by
//!   [`DashMap`](dashmap::DashMap), with bundle loading.
//! - **[`dispatch`]** -- [`Dispatcher`] routes a request to a directive
//!   handler and runs its pipeline, singles in order and groups
//!   concurrently.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod dispatch;
pub mod error;
pub mod registry;

// Re-export the most commonly used types at the crate root for convenience.
pub use dispatch::{Dispatched, Dispatcher, match_resource, run_blocking};
pub use error::{KernelError, Result};
pub use registry::RunnerRegistry;
