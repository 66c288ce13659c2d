//! Runner registry.
//!
//! The registry maps function names to their [`Runner`]s.  It is an
//! explicitly owned object, built once at startup and handed to whatever
//! needs it; there is no process-wide table.
//!
//! Internally the registry is backed by [`DashMap`] which provides lock-free
//! concurrent reads and fine-grained write locking, so dispatch can look up
//! runners from many tasks at once.
//!
//! # Example
//!
//! ```rust,no_run
//! # use rhost_kernel::RunnerRegistry;
//! # use rhost_sandbox::{ModuleSource, Runtime};
//! let registry = RunnerRegistry::new(Runtime::with_defaults().unwrap(), 2);
//! registry.register("hello", ModuleSource::Path("hello.wasm".into())).unwrap();
//! assert_eq!(registry.get("hello").unwrap().environment().len(), 2);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use rhost_directive::{Directive, GroupPolicy, ValidatedDirective};
use rhost_sandbox::{Bundle, ModuleSource, Runner, Runtime};

use crate::error::{KernelError, Result};

/// Concurrent runner registry backed by [`DashMap`].
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct RunnerRegistry {
    runtime: Runtime,
    workers: usize,
    inner: Arc<DashMap<String, Runner>>,
}

impl RunnerRegistry {
    /// Create an empty registry.  Every runner registered later gets
    /// `workers` instances (at least one).
    #[must_use]
    pub fn new(runtime: Runtime, workers: usize) -> Self {
        Self {
            runtime,
            workers: workers.max(1),
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Instances created per runner.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Create an environment for `name`, start one instance per worker, and
    /// register the runner.
    ///
    /// If a runner with the same name already exists, it is replaced.
    pub fn register(&self, name: impl Into<String>, source: ModuleSource) -> Result<Runner> {
        let name = name.into();
        let runner = Runner::new(self.runtime.environment(name.clone(), source));
        for _ in 0..self.workers {
            runner.on_start()?;
        }

        if self.inner.insert(name.clone(), runner.clone()).is_some() {
            tracing::warn!(function = %name, "runner replaced");
        }
        tracing::info!(function = %name, instances = self.workers, "runner registered");
        Ok(runner)
    }

    /// Register every module in `bundle` under its function name and, if
    /// the bundle carries a directive, validate it under `policy`.
    ///
    /// Every function the directive declares must have a module in the
    /// bundle, and no two declared functions may share a bare name.
    /// Nothing is registered when either check fails.
    pub fn load_bundle(&self, bundle: &Bundle, policy: GroupPolicy) -> Result<Option<ValidatedDirective>> {
        let directive = match &bundle.directive {
            Some(raw) => {
                let directive = Directive::from_yaml(&String::from_utf8_lossy(raw))?.validate(policy)?;
                check_unique_names(&directive)?;
                if let Some(missing) = directive
                    .functions
                    .iter()
                    .find(|f| bundle.runnable(&f.name).is_none())
                {
                    return Err(KernelError::MissingRunnable {
                        function: missing.name.clone(),
                    });
                }
                Some(directive)
            }
            None => None,
        };

        for entry in &bundle.runnables {
            let source = ModuleSource::Bytes(entry.raw.as_slice().into());
            self.register(entry.function_name(), source)?;
        }

        tracing::info!(
            runnables = bundle.runnables.len(),
            directive = directive.as_ref().map(|d| d.identifier.as_str()).unwrap_or("none"),
            "bundle loaded"
        );
        Ok(directive)
    }

    /// Look up the runner for `name`.
    pub fn get(&self, name: &str) -> Result<Runner> {
        self.inner
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KernelError::RunnerNotFound {
                name: name.to_owned(),
            })
    }

    /// Remove a runner.  In-flight invocations keep their instance alive
    /// until they finish.
    pub fn unregister(&self, name: &str) -> Option<Runner> {
        let removed = self.inner.remove(name).map(|(_, runner)| runner);
        if removed.is_some() {
            tracing::info!(function = %name, "runner unregistered");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Reject directives in which two functions share a bare name, since both
/// would map to the same runner.
pub(crate) fn check_unique_names(directive: &Directive) -> Result<()> {
    let mut seen: HashMap<&str, String> = HashMap::new();
    for function in &directive.functions {
        if let Some(first) = seen.insert(&function.name, function.reference()) {
            return Err(KernelError::NameCollision {
                name: function.name.clone(),
                first,
                second: function.reference(),
            });
        }
    }
    Ok(())
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("workers", &self.workers)
            .field("runners", &self.names())
            .finish()
    }
}
