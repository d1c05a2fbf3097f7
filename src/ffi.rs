// C ABI entry points for the crate's own CBOR reader.
//
// Built into the `cdylib`, these symbols make the crate loadable as an
// implementation under test:
//
//     int cbor_from_slice(const uint8_t *data, size_t len);
//     int cbor_from_slice_strict(const uint8_t *data, size_t len);
//
// Return 0 when `data[..len]` is a valid item, non-zero otherwise. No unwind
// ever crosses the boundary; a panic inside the reader is reported as
// `STATUS_PANIC`.

use std::ffi::c_int;
use std::panic;

use crate::cbor::{self, Limits};

pub const STATUS_ACCEPTED: c_int = 0;
pub const STATUS_REJECTED: c_int = 1;
pub const STATUS_PANIC: c_int = 2;

/// Default exported symbol name.
pub const SYMBOL: &str = "cbor_from_slice";
/// Strict-profile exported symbol name.
pub const SYMBOL_STRICT: &str = "cbor_from_slice_strict";

/// Validate `len` bytes at `data` with the non-strict profile.
///
/// # Safety
///
/// When `len > 0`, `data` must point to `len` readable bytes that stay valid
/// and unmodified for the duration of the call. When `len == 0`, `data` is
/// never dereferenced and may be dangling or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cbor_from_slice(data: *const u8, len: usize) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { decode_raw(data, len, &Limits::non_strict()) }
}

/// Validate `len` bytes at `data` with the strict profile.
///
/// # Safety
///
/// Same contract as [`cbor_from_slice`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cbor_from_slice_strict(data: *const u8, len: usize) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { decode_raw(data, len, &Limits::strict()) }
}

unsafe fn decode_raw(data: *const u8, len: usize, limits: &Limits) -> c_int {
    let input: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() || len > isize::MAX as usize {
        return STATUS_REJECTED;
    } else {
        // SAFETY: non-null, caller guarantees `len` readable bytes that are
        // not mutated while this borrow is alive.
        unsafe { std::slice::from_raw_parts(data, len) }
    };

    match panic::catch_unwind(|| cbor::read(input, limits)) {
        Ok(Ok(_)) => STATUS_ACCEPTED,
        Ok(Err(e)) => {
            log::trace!("cbor_from_slice: {e}");
            STATUS_REJECTED
        }
        Err(_) => STATUS_PANIC,
    }
}
