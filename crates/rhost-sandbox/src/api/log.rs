use wasmtime::Caller;

use crate::host::{HostState, authorize, caller_memory};
use crate::memory::read_memory;

/// `log_msg(pointer, size, level, token)`: emit a message for the runnable.
///
/// Levels: 1 error, 2 warn, 3 info, anything else debug.
pub(super) fn log_msg(mut caller: Caller<'_, HostState>, pointer: i32, size: i32, level: i32, token: i32) {
    if !authorize(&caller, token, "log_msg") {
        return;
    }

    let Some(memory) = caller_memory(&mut caller) else {
        return;
    };

    let msg = match read_memory(&caller, &memory, pointer, size) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(runnable = %caller.data().name, error = %e, "log_msg: unreadable message");
            return;
        }
    };

    let runnable = caller.data().name.as_str();
    match level {
        1 => tracing::error!(token, runnable, "{msg}"),
        2 => tracing::warn!(token, runnable, "{msg}"),
        3 => tracing::info!(token, runnable, "{msg}"),
        _ => tracing::debug!(token, runnable, "{msg}"),
    }
}
