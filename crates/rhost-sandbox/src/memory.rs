//! Memory bridge.
//!
//! Moves byte buffers across the host/guest boundary using the
//! `allocate`/`deallocate` contract every runnable exports.  All accesses are
//! bounds-checked against the guest's current linear memory size; a pointer
//! or length coming from untrusted code is never used for a copy before it
//! has been clamped to the arena.

use std::ops::Range;

use wasmtime::{AsContext, AsContextMut, Instance, Memory};

use crate::error::{Result, SandboxError};

/// Name of the linear memory export.
pub const MEMORY_EXPORT: &str = "memory";
/// Name of the guest allocator export: `allocate(len) -> ptr`.
pub const ALLOCATE_EXPORT: &str = "allocate";
/// Name of the guest deallocator export: `deallocate(ptr, len)`.
pub const DEALLOCATE_EXPORT: &str = "deallocate";

/// Validate a guest pointer/length pair against a memory of `size` bytes.
pub fn guest_range(pointer: i32, length: i32, size: usize) -> Result<Range<usize>> {
    let out_of_bounds = || SandboxError::MemoryAccess {
        pointer: i64::from(pointer),
        length: i64::from(length),
        size,
    };

    if pointer < 0 || length < 0 {
        return Err(out_of_bounds());
    }

    let start = pointer as usize;
    let end = start
        .checked_add(length as usize)
        .ok_or_else(out_of_bounds)?;
    if end > size {
        return Err(out_of_bounds());
    }

    Ok(start..end)
}

/// Convert a host buffer length into the guest's `i32` length type.
pub fn guest_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| SandboxError::MemoryAccess {
        pointer: 0,
        length: len as i64,
        size: i32::MAX as usize,
    })
}

/// Look up the exported linear memory of `instance`.
pub fn guest_memory(store: impl AsContextMut, instance: &Instance) -> Result<Memory> {
    instance
        .get_memory(store, MEMORY_EXPORT)
        .ok_or_else(|| SandboxError::MissingExport {
            name: MEMORY_EXPORT.to_owned(),
        })
}

/// Copy `length` bytes starting at `pointer` out of guest memory.
pub fn read_memory<S: AsContext>(
    store: &S,
    memory: &Memory,
    pointer: i32,
    length: i32,
) -> Result<Vec<u8>> {
    let size = memory.data_size(store);
    let range = guest_range(pointer, length, size)?;

    let mut buf = vec![0u8; range.len()];
    memory
        .read(store, range.start, &mut buf)
        .map_err(|_| SandboxError::MemoryAccess {
            pointer: i64::from(pointer),
            length: i64::from(length),
            size,
        })?;
    Ok(buf)
}

/// Copy `data` into guest memory at a location the guest already owns.
pub fn write_memory_at<S: AsContextMut>(
    store: &mut S,
    memory: &Memory,
    pointer: i32,
    data: &[u8],
) -> Result<()> {
    let size = memory.data_size(&*store);
    let length = guest_len(data.len())?;
    let range = guest_range(pointer, length, size)?;

    memory
        .write(store, range.start, data)
        .map_err(|_| SandboxError::MemoryAccess {
            pointer: i64::from(pointer),
            length: i64::from(length),
            size,
        })
}

/// Ask the guest to allocate room for `data`, copy it in, and return the
/// guest pointer.
///
/// The caller owns the allocation and must hand it back with
/// [`deallocate`] once the guest is done with it.
pub fn write_memory<S: AsContextMut>(store: &mut S, instance: &Instance, data: &[u8]) -> Result<i32> {
    let length = guest_len(data.len())?;

    let allocate = instance
        .get_typed_func::<i32, i32>(&mut *store, ALLOCATE_EXPORT)
        .map_err(|_| SandboxError::MissingExport {
            name: ALLOCATE_EXPORT.to_owned(),
        })?;

    let pointer = allocate
        .call(&mut *store, length)
        .map_err(|e| SandboxError::Trap(format!("allocate failed: {e}")))?;

    let memory = guest_memory(&mut *store, instance)?;
    write_memory_at(store, &memory, pointer, data)?;

    Ok(pointer)
}

/// Return a host-made allocation to the guest.
///
/// Best-effort: failures are logged and otherwise ignored, since leaking
/// guest memory is preferable to failing the invocation.
pub fn deallocate<S: AsContextMut>(store: &mut S, instance: &Instance, pointer: i32, length: i32) {
    let result = instance
        .get_typed_func::<(i32, i32), ()>(&mut *store, DEALLOCATE_EXPORT)
        .and_then(|dealloc| dealloc.call(&mut *store, (pointer, length)));

    if let Err(e) = result {
        tracing::warn!(pointer, length, error = %e, "failed to deallocate guest memory");
    }
}
