//! Per-instance host state.
//!
//! Every wasmtime [`Store`](wasmtime::Store) carries a [`HostState`]: the
//! identity of the instance it belongs to, the sending half of the
//! single-slot result channel, the request bound for the current invocation
//! (if any), and handles to the shared services capability calls need.
//!
//! It also holds the instance's WASI preview1 context.  The context is built
//! empty: no environment variables, no arguments, no preopened directories,
//! and closed stdio, so modules compiled for `wasm32-wasip1` load without
//! gaining any ambient authority.

use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use wasmtime::{Caller, Extern, Memory, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::fetch::Fetcher;
use crate::ident::{IdentRegistry, InstanceRef};
use crate::memory::MEMORY_EXPORT;
use crate::request::CoordinatedRequest;

/// Data wasmtime associates with each instance's store.
pub struct HostState {
    pub(crate) name: String,
    pub(crate) reference: InstanceRef,
    pub(crate) idents: Arc<IdentRegistry>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) results: SyncSender<Vec<u8>>,
    pub(crate) request: Option<CoordinatedRequest>,
    pub(crate) limits: StoreLimits,
    pub(crate) wasi: WasiP1Ctx,
}

impl HostState {
    pub(crate) fn new(
        name: &str,
        reference: InstanceRef,
        idents: Arc<IdentRegistry>,
        fetcher: Arc<dyn Fetcher>,
        results: SyncSender<Vec<u8>>,
        max_memory: usize,
    ) -> Self {
        Self {
            name: name.to_owned(),
            reference,
            idents,
            fetcher,
            results,
            request: None,
            limits: StoreLimitsBuilder::new().memory_size(max_memory).build(),
            wasi: WasiCtxBuilder::new().build_p1(),
        }
    }

    /// Name of the environment this instance belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of this instance.
    pub fn reference(&self) -> InstanceRef {
        self.reference
    }
}

/// Check that `token` was minted for the calling instance.
///
/// An unknown token and a token belonging to another instance are both
/// security events: they are logged and the capability call is refused.
pub(crate) fn authorize(caller: &Caller<'_, HostState>, token: i32, capability: &'static str) -> bool {
    let state = caller.data();
    match state.idents.resolve(token) {
        Some(reference) if reference == state.reference => true,
        Some(reference) => {
            tracing::warn!(
                capability,
                token,
                runnable = %state.name,
                owner_env = %reference.env,
                owner_instance = reference.index,
                "foreign identifier used, potential malicious activity"
            );
            false
        }
        None => {
            tracing::warn!(
                capability,
                token,
                runnable = %state.name,
                "invalid identifier used, potential malicious activity"
            );
            false
        }
    }
}

/// The calling instance's exported linear memory.
pub(crate) fn caller_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    caller.get_export(MEMORY_EXPORT).and_then(Extern::into_memory)
}
