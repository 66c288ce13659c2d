//! Sandbox runtime.
//!
//! [`Runtime`] is the shared core every [`Environment`] is built from.  It
//! owns the wasmtime [`Engine`], the [`Linker`] carrying the runnable API,
//! the [`SandboxConfig`] resource limits, the [`IdentRegistry`], and the
//! [`Fetcher`] used by `fetch_url`.  It is cheap to clone; clones share the
//! same engine and registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use wasmtime::{Engine, Linker, Store, Trap};

use crate::api;
use crate::config::SandboxConfig;
use crate::environment::{Environment, ModuleSource};
use crate::error::{Result, SandboxError};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::host::HostState;
use crate::ident::IdentRegistry;

/// Interval between epoch increments.  Timeouts are rounded up to it.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// The WebAssembly runnable runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    engine: Engine,
    linker: Linker<HostState>,
    config: SandboxConfig,
    idents: Arc<IdentRegistry>,
    fetcher: Arc<dyn Fetcher>,
    _ticker: EpochTicker,
}

impl Runtime {
    /// Create a runtime whose `fetch_url` goes out over HTTP.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_millis(config.fetch_timeout_ms)));
        Self::with_fetcher(config, fetcher)
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(SandboxConfig::default())
    }

    /// Create a runtime that serves `fetch_url` through `fetcher`.
    pub fn with_fetcher(config: SandboxConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let mut wasm_config = wasmtime::Config::new();
        wasm_config.consume_fuel(true);
        wasm_config.epoch_interruption(true);
        wasm_config.wasm_memory64(false);

        let engine = Engine::new(&wasm_config).map_err(|e| SandboxError::Load {
            name: "engine".to_owned(),
            reason: format!("failed to create wasm engine: {e}"),
        })?;

        let mut linker = Linker::new(&engine);
        api::link(&mut linker)?;

        let ticker = EpochTicker::start(engine.clone())?;

        tracing::info!(
            max_memory = config.max_memory,
            max_execution_ms = config.max_execution_ms,
            max_fuel = config.max_fuel,
            entrypoint = %config.entrypoint,
            "sandbox runtime initialized"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                engine,
                linker,
                config,
                idents: Arc::new(IdentRegistry::new()),
                fetcher,
                _ticker: ticker,
            }),
        })
    }

    /// Return a reference to the wasmtime [`Engine`].
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Return a reference to the current [`SandboxConfig`].
    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    /// The identifier registry shared by every environment of this runtime.
    pub fn idents(&self) -> &Arc<IdentRegistry> {
        &self.inner.idents
    }

    /// Create an empty environment for the module at `source`.
    ///
    /// Nothing is loaded until the first [`Environment::add_instance`].
    pub fn environment(&self, name: impl Into<String>, source: ModuleSource) -> Arc<Environment> {
        Arc::new(Environment::new(self.clone(), name.into(), source))
    }

    /// Shorthand for an environment backed by a `.wasm` file.
    pub fn environment_from_file(&self, name: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Environment> {
        self.environment(name, ModuleSource::Path(path.into()))
    }

    pub(crate) fn linker(&self) -> &Linker<HostState> {
        &self.inner.linker
    }

    pub(crate) fn fetcher(&self) -> Arc<dyn Fetcher> {
        Arc::clone(&self.inner.fetcher)
    }

    /// Number of epoch ticks an invocation may run for.
    pub(crate) fn epoch_deadline(&self) -> u64 {
        self.inner
            .config
            .max_execution_ms
            .div_ceil(EPOCH_TICK.as_millis() as u64)
            .max(1)
    }

    /// Refill fuel and re-arm the epoch deadline before a call into the guest.
    pub(crate) fn prepare(&self, store: &mut Store<HostState>) -> Result<()> {
        store
            .set_fuel(self.inner.config.max_fuel)
            .map_err(|e| SandboxError::Execution(e.to_string()))?;
        store.set_epoch_deadline(self.epoch_deadline());
        Ok(())
    }

    /// Translate an error returned by a guest call into a [`SandboxError`].
    pub(crate) fn classify(&self, err: wasmtime::Error) -> SandboxError {
        if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
            return SandboxError::Exit { code: exit.0 };
        }
        match err.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => SandboxError::FuelExhausted {
                limit: self.inner.config.max_fuel,
            },
            Some(Trap::Interrupt) => SandboxError::Timeout {
                limit_ms: self.inner.config.max_execution_ms,
            },
            Some(trap) => SandboxError::Trap(trap.to_string()),
            None => SandboxError::Execution(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Epoch ticker
// ---------------------------------------------------------------------------

/// Background thread advancing the engine epoch every [`EPOCH_TICK`].
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("rhost-epoch".to_owned())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
