//! Runnable API.
//!
//! The fixed set of host functions a runnable may import from the `env`
//! module.  Each receives the caller's token as its last argument and checks
//! it before doing anything else.  No failure ever crosses the boundary as a
//! trap: functions with a return value report problems through the negative
//! sentinels in [`sentinel`], the others log and return.
//!
//! WASI preview1 is linked alongside under `wasi_snapshot_preview1`, backed
//! by the empty context in [`HostState`].

mod http;
mod log;
mod request;

use std::sync::mpsc::TrySendError;

use wasmtime::{Caller, Linker};

use crate::error::{Result, SandboxError};
use crate::host::{HostState, authorize, caller_memory};
use crate::memory::read_memory;

pub use http::{method_from_code, parse_fetch_target};

/// Import module every capability is defined under.
pub const IMPORT_MODULE: &str = "env";

/// Negative return values understood by runnables.
pub mod sentinel {
    /// The token did not resolve to the calling instance.
    pub const INVALID_TOKEN: i32 = -1;
    /// `fetch_url`: unknown method code, or unparseable URL/headers.
    pub const BAD_REQUEST: i32 = -2;
    /// `fetch_url`: the request could not be sent.
    pub const TRANSPORT_FAILURE: i32 = -3;
    /// `fetch_url`: the response body could not be read.
    pub const BODY_READ_FAILURE: i32 = -4;
    /// `request_get_field`: no request is bound to this invocation.
    pub const NO_REQUEST: i32 = -2;
    /// `request_get_field`: the key (or field kind) is not set.
    pub const FIELD_NOT_SET: i32 = -3;
    /// `request_get_field`: the field cannot be read.
    pub const FIELD_NOT_ACCESSIBLE: i32 = -4;
    /// A pointer/length pair fell outside the caller's memory.
    pub const MEMORY_FAULT: i32 = -5;
}

/// Define every capability, plus WASI preview1, on `linker`.
pub(crate) fn link(linker: &mut Linker<HostState>) -> Result<()> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, |state: &mut HostState| &mut state.wasi).map_err(|e| {
        SandboxError::Load {
            name: IMPORT_MODULE.to_owned(),
            reason: format!("failed to define wasi functions: {e}"),
        }
    })?;

    linker
        .func_wrap(IMPORT_MODULE, "return_result", return_result)
        .and_then(|l| l.func_wrap(IMPORT_MODULE, "fetch_url", http::fetch_url))
        .and_then(|l| l.func_wrap(IMPORT_MODULE, "log_msg", log::log_msg))
        .and_then(|l| l.func_wrap(IMPORT_MODULE, "request_get_field", request::request_get_field))
        .map_err(|e| SandboxError::Load {
            name: IMPORT_MODULE.to_owned(),
            reason: format!("failed to define host functions: {e}"),
        })?;

    Ok(())
}

/// `return_result(pointer, size, token)`: deliver the invocation's output.
fn return_result(mut caller: Caller<'_, HostState>, pointer: i32, size: i32, token: i32) {
    if !authorize(&caller, token, "return_result") {
        return;
    }

    let Some(memory) = caller_memory(&mut caller) else {
        tracing::warn!(runnable = %caller.data().name, "return_result: module exports no memory");
        return;
    };

    let result = match read_memory(&caller, &memory, pointer, size) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(runnable = %caller.data().name, error = %e, "return_result: unreadable result");
            return;
        }
    };

    match caller.data().results.try_send(result) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                runnable = %caller.data().name,
                "return_result called more than once in one invocation, discarding"
            );
        }
        Err(TrySendError::Disconnected(_)) => {
            tracing::debug!(runnable = %caller.data().name, "result channel closed");
        }
    }
}
