use wasmtime::Caller;

use super::sentinel;
use crate::host::{HostState, authorize, caller_memory};
use crate::memory::{read_memory, write_memory_at};
use crate::request::{FieldError, FieldKind};

/// `request_get_field(kind, key_ptr, key_size, dest_ptr, dest_max, token) -> len`
///
/// Looks up a field of the request bound to the current invocation.  Like
/// `fetch_url`, the value is written only if it fits and the true length is
/// always returned.
pub(super) fn request_get_field(
    mut caller: Caller<'_, HostState>,
    field_kind: i32,
    key_pointer: i32,
    key_size: i32,
    dest_pointer: i32,
    dest_max_size: i32,
    token: i32,
) -> i32 {
    if !authorize(&caller, token, "request_get_field") {
        return sentinel::INVALID_TOKEN;
    }

    let runnable = caller.data().name.clone();

    if caller.data().request.is_none() {
        tracing::warn!(runnable = %runnable, "runnable attempted to access request when none is bound");
        return sentinel::NO_REQUEST;
    }

    let Ok(kind) = FieldKind::try_from(field_kind) else {
        tracing::warn!(runnable = %runnable, field_kind, "request_get_field: unknown field kind");
        return sentinel::FIELD_NOT_SET;
    };

    let Some(memory) = caller_memory(&mut caller) else {
        return sentinel::MEMORY_FAULT;
    };

    let key = match read_memory(&caller, &memory, key_pointer, key_size) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(runnable = %runnable, error = %e, "request_get_field: unreadable key");
            return sentinel::MEMORY_FAULT;
        }
    };

    let looked_up = match caller.data().request.as_ref() {
        Some(request) => request.field(kind, &key),
        None => return sentinel::NO_REQUEST,
    };

    let value = match looked_up {
        Ok(value) => value,
        Err(FieldError::NotSet) => return sentinel::FIELD_NOT_SET,
        Err(e @ FieldError::NotAccessible(_)) => {
            tracing::warn!(runnable = %runnable, key = %key, error = %e, "request_get_field failed");
            return sentinel::FIELD_NOT_ACCESSIBLE;
        }
    };

    let Ok(length) = i32::try_from(value.len()) else {
        return sentinel::FIELD_NOT_ACCESSIBLE;
    };

    if length <= dest_max_size {
        if let Err(e) = write_memory_at(&mut caller, &memory, dest_pointer, &value) {
            tracing::warn!(runnable = %runnable, error = %e, "request_get_field: destination out of bounds");
            return sentinel::MEMORY_FAULT;
        }
    }

    length
}
