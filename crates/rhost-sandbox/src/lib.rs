//! rhost WebAssembly runnable sandbox.
//!
//! This crate hosts untrusted, compiled function modules ("runnables") in
//! wasmtime and exposes a narrow capability API to them.
//!
//! - **[`runtime`]** -- [`Runtime`] owns the engine, the capability linker,
//!   the resource limits and the identifier registry.
//! - **[`environment`]** -- [`Environment`] pools live instances of one
//!   module and enforces one invocation per instance at a time.
//! - **[`ident`]** -- [`IdentRegistry`] mints the per-invocation tokens that
//!   authenticate capability calls.
//! - **[`memory`]** -- the bounds-checked memory bridge.
//! - **[`api`]** -- the host functions a runnable may import.
//! - **[`runner`]** -- [`Runner`] binds a function to its environment.
//! - **[`request`]** -- [`CoordinatedRequest`], the payload of a pipeline.
//! - **[`bundle`]** -- the `.tar.gz` bundle format.
//!
//! All public types are `Send + Sync` and designed for use from a
//! multi-threaded tokio runtime via `spawn_blocking`.

pub mod api;
pub mod bundle;
pub mod config;
pub mod environment;
pub mod error;
pub mod fetch;
pub mod host;
pub mod ident;
pub mod memory;
pub mod request;
pub mod runner;
pub mod runtime;

// Re-export the most commonly used types at the crate root.
pub use bundle::{Bundle, BundleEntry, read_bundle, write_bundle};
pub use config::SandboxConfig;
pub use environment::{Environment, InstanceState, ModuleSource};
pub use error::{Result, SandboxError};
pub use fetch::{FetchError, FetchRequest, Fetcher, HttpFetcher};
pub use ident::{EnvironmentId, IdentRegistry, InstanceRef};
pub use request::{CoordinatedRequest, FieldKind};
pub use runner::{RunInput, Runner};
pub use runtime::Runtime;
