//! Sandbox instance pool.
//!
//! An [`Environment`] owns one runnable's module and a growable pool of live
//! instances of it.  Selection is round-robin under a short-held pool lock;
//! the chosen instance is then locked for the whole invocation, so one
//! instance's memory and result slot are never touched by two callers at
//! once while different instances run fully in parallel.
//!
//! Growing the pool only takes the pool lock to reserve an index and to
//! publish the finished instance.  Instantiation and `init` run unlocked, so
//! a slow `init` never stalls callers of already-live instances.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};

use wasmtime::{Memory, Module, Store};

use crate::error::{Result, SandboxError};
use crate::host::HostState;
use crate::ident::{EnvironmentId, InstanceRef};
use crate::memory::{self, ALLOCATE_EXPORT, DEALLOCATE_EXPORT, MEMORY_EXPORT};
use crate::request::CoordinatedRequest;
use crate::runtime::Runtime;

/// Optional export called once right after instantiation.
pub const INIT_EXPORT: &str = "init";

/// Where an environment's module bytes come from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// A `.wasm` (or `.wat`) file read on first use.
    Path(PathBuf),
    /// Bytes already in memory, e.g. from a bundle.
    Bytes(Arc<[u8]>),
}

impl ModuleSource {
    fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => std::fs::read(path),
            Self::Bytes(bytes) => Ok(bytes.to_vec()),
        }
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<PathBuf> for ModuleSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

struct Pool {
    instances: Vec<Arc<Instance>>,
    cursor: usize,
    next_index: usize,
}

/// The pooled-instance owner for one runnable.
pub struct Environment {
    id: EnvironmentId,
    name: String,
    runtime: Runtime,
    source: ModuleSource,
    module: Mutex<Option<Module>>,
    pool: Mutex<Pool>,
}

impl Environment {
    pub(crate) fn new(runtime: Runtime, name: String, source: ModuleSource) -> Self {
        Self {
            id: EnvironmentId::new(),
            name,
            runtime,
            source,
            module: Mutex::new(None),
            pool: Mutex::new(Pool {
                instances: Vec::new(),
                cursor: 0,
                next_index: 0,
            }),
        }
    }

    /// Unique identifier of this environment.
    pub fn id(&self) -> EnvironmentId {
        self.id
    }

    /// Name of the runnable this environment hosts.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The runtime this environment was created from.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Number of live instances in the pool.
    pub fn len(&self) -> usize {
        self.lock_pool().instances.len()
    }

    /// Returns `true` if no instance has been added yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instantiate one more copy of the module and append it to the pool.
    ///
    /// The module is read and compiled on the first call only.  Returns the
    /// index of the new instance.  Indices are unique within the environment;
    /// a failed add leaves its index unused.
    pub fn add_instance(&self) -> Result<usize> {
        let module = self.module()?;

        let index = {
            let mut pool = self.lock_pool();
            let index = pool.next_index;
            pool.next_index += 1;
            index
        };

        let state = self.instantiate(&module, index)?;
        self.lock_pool().instances.push(Arc::new(Instance {
            state: Mutex::new(state),
        }));

        tracing::info!(runnable = %self.name, env = %self.id, instance = index, "instance added");
        Ok(index)
    }

    /// Run `work` on the next instance with a freshly minted token.
    ///
    /// The instance stays locked and the token stays live until `work`
    /// returns; both are released on every exit path.
    pub fn use_instance<R>(&self, work: impl FnOnce(&mut InstanceState, i32) -> Result<R>) -> Result<R> {
        let instance = {
            let mut pool = self.lock_pool();
            if pool.instances.is_empty() {
                return Err(SandboxError::NoInstanceAvailable {
                    name: self.name.clone(),
                });
            }
            pool.cursor = (pool.cursor + 1) % pool.instances.len();
            Arc::clone(&pool.instances[pool.cursor])
        };

        let mut state = instance.state.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = self.runtime.idents().scoped(state.reference())?;

        tracing::debug!(runnable = %self.name, instance = state.index(), token = guard.token(), "instance acquired");
        work(&mut state, guard.token())
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn module(&self) -> Result<Module> {
        let mut cached = self.module.lock().unwrap_or_else(PoisonError::into_inner);
        match &*cached {
            Some(module) => Ok(module.clone()),
            None => {
                let module = self.compile()?;
                *cached = Some(module.clone());
                Ok(module)
            }
        }
    }

    fn compile(&self) -> Result<Module> {
        let bytes = self.source.read().map_err(|e| self.load_error(format!("failed to read module: {e}")))?;

        let module = Module::new(self.runtime.engine(), &bytes)
            .map_err(|e| self.load_error(format!("failed to compile module: {e}")))?;

        tracing::debug!(runnable = %self.name, size = bytes.len(), "module compiled");
        Ok(module)
    }

    fn instantiate(&self, module: &Module, index: usize) -> Result<InstanceState> {
        let config = self.runtime.config();
        let reference = InstanceRef { env: self.id, index };
        let (results_tx, results_rx) = mpsc::sync_channel(1);

        let host = HostState::new(
            &self.name,
            reference,
            Arc::clone(self.runtime.idents()),
            self.runtime.fetcher(),
            results_tx,
            config.max_memory,
        );

        let mut store = Store::new(self.runtime.engine(), host);
        store.limiter(|state| &mut state.limits);
        self.runtime.prepare(&mut store)?;

        let handle = self
            .runtime
            .linker()
            .instantiate(&mut store, module)
            .map_err(|e| self.load_error(format!("failed to instantiate: {e}")))?;

        if handle.get_memory(&mut store, MEMORY_EXPORT).is_none() {
            return Err(self.missing_export(MEMORY_EXPORT));
        }
        if handle.get_typed_func::<i32, i32>(&mut store, ALLOCATE_EXPORT).is_err() {
            return Err(self.missing_export(ALLOCATE_EXPORT));
        }
        if handle
            .get_typed_func::<(i32, i32), ()>(&mut store, DEALLOCATE_EXPORT)
            .is_err()
        {
            return Err(self.missing_export(DEALLOCATE_EXPORT));
        }
        if handle
            .get_typed_func::<(i32, i32, i32), ()>(&mut store, &config.entrypoint)
            .is_err()
        {
            return Err(self.missing_export(&config.entrypoint));
        }

        if let Some(init) = handle.get_func(&mut store, INIT_EXPORT) {
            let init = init
                .typed::<(), ()>(&store)
                .map_err(|e| self.load_error(format!("`{INIT_EXPORT}` has the wrong signature: {e}")))?;
            self.runtime.prepare(&mut store)?;
            init.call(&mut store, ())
                .map_err(|e| self.load_error(format!("`{INIT_EXPORT}` failed: {}", self.runtime.classify(e))))?;
        }

        Ok(InstanceState {
            runtime: self.runtime.clone(),
            store,
            handle,
            results: results_rx,
        })
    }

    fn load_error(&self, reason: String) -> SandboxError {
        SandboxError::Load {
            name: self.name.clone(),
            reason,
        }
    }

    fn missing_export(&self, export: &str) -> SandboxError {
        self.load_error(SandboxError::MissingExport {
            name: export.to_owned(),
        }
        .to_string())
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

struct Instance {
    state: Mutex<InstanceState>,
}

/// One live sandbox, reachable only while its lock is held.
pub struct InstanceState {
    runtime: Runtime,
    store: Store<HostState>,
    handle: wasmtime::Instance,
    results: Receiver<Vec<u8>>,
}

impl InstanceState {
    /// Index this instance was added under.
    pub fn index(&self) -> usize {
        self.store.data().reference().index
    }

    /// Identity a token for this instance resolves to.
    pub fn reference(&self) -> InstanceRef {
        self.store.data().reference()
    }

    /// Allocate guest memory for `data`, copy it in, and return the pointer.
    pub fn write_memory(&mut self, data: &[u8]) -> Result<i32> {
        memory::write_memory(&mut self.store, &self.handle, data)
    }

    /// Copy `length` bytes at `pointer` out of guest memory.
    pub fn read_memory(&mut self, pointer: i32, length: i32) -> Result<Vec<u8>> {
        let memory = self.memory()?;
        memory::read_memory(&self.store, &memory, pointer, length)
    }

    /// Hand a host-made allocation back to the guest.
    pub fn deallocate(&mut self, pointer: i32, length: i32) {
        memory::deallocate(&mut self.store, &self.handle, pointer, length);
    }

    /// Bind `request` to this instance for `request_get_field`, or clear it.
    pub fn bind_request(&mut self, request: Option<CoordinatedRequest>) {
        self.store.data_mut().request = request;
    }

    /// Write `input`, call the entry point with `token`, and collect the
    /// delivered result.
    pub fn run_entry(&mut self, input: &[u8], token: i32) -> Result<Vec<u8>> {
        // A stale value would otherwise be returned as this call's result.
        while self.results.try_recv().is_ok() {}

        self.runtime.prepare(&mut self.store)?;
        let pointer = self.write_memory(input)?;
        let length = memory::guest_len(input.len())?;

        let entrypoint = self.runtime.config().entrypoint.clone();
        let entry = self
            .handle
            .get_typed_func::<(i32, i32, i32), ()>(&mut self.store, &entrypoint)
            .map_err(|_| SandboxError::MissingExport { name: entrypoint })?;

        self.runtime.prepare(&mut self.store)?;
        let outcome = entry.call(&mut self.store, (pointer, length, token));

        // Fresh budget so cleanup still runs after an exhausted call.
        self.runtime.prepare(&mut self.store)?;
        self.deallocate(pointer, length);

        if let Err(e) = outcome {
            match self.runtime.classify(e) {
                // proc_exit(0) ends the call normally.
                SandboxError::Exit { code: 0 } => {}
                err => {
                    tracing::warn!(runnable = %self.store.data().name(), token, error = %err, "invocation failed");
                    return Err(err);
                }
            }
        }

        self.results.try_recv().map_err(|_| SandboxError::NoResult {
            name: self.store.data().name().to_owned(),
        })
    }

    fn memory(&mut self) -> Result<Memory> {
        memory::guest_memory(&mut self.store, &self.handle)
    }
}
