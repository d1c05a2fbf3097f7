// Foreign decode bridge.
//
// The only place in the crate that calls across the C boundary. Callers see
// a `Decoder` returning `Outcome`; raw pointers stay inside `decode()`.
//
// Contract of the foreign function:
//
//     int decode(const uint8_t *data, size_t len);
//
// 0 means accepted; every other status means rejected. Distinct non-zero
// codes are not interpreted.

use std::ffi::c_int;
#[cfg(feature = "dylib")]
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use thiserror::Error;

use crate::ffi;
use crate::oracle::{Decoder, Outcome};

/// Signature of a foreign decode entry point.
pub type DecodeFn = unsafe extern "C" fn(data: *const u8, len: usize) -> c_int;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[cfg(feature = "dylib")]
    #[error("cannot load library {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[cfg(feature = "dylib")]
    #[error("symbol `{symbol}` not found in {}: {source}", .path.display())]
    Symbol {
        symbol: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("unknown built-in symbol `{0}`")]
    UnknownBuiltin(String),
}

/// Map a foreign status code to an outcome.
#[inline]
pub fn outcome_from_status(status: c_int) -> Outcome {
    if status == ffi::STATUS_ACCEPTED {
        Outcome::Accepted
    } else {
        Outcome::Rejected
    }
}

// ---------------------------------------------------------------------------
// ForeignDecoder
// ---------------------------------------------------------------------------

pub struct ForeignDecoder {
    name: String,
    decode_fn: DecodeFn,
    // Keeps the code behind `decode_fn` mapped for as long as the bridge
    // exists. Never read.
    #[cfg(feature = "dylib")]
    _library: Option<libloading::Library>,
}

impl ForeignDecoder {
    /// The crate's own non-strict reader, through its exported symbol.
    pub fn builtin() -> Self {
        // SAFETY: `cbor_from_slice` honours the `DecodeFn` contract.
        unsafe { Self::from_raw(ffi::SYMBOL, ffi::cbor_from_slice) }
    }

    /// The crate's own strict reader, through its exported symbol.
    pub fn builtin_strict() -> Self {
        // SAFETY: `cbor_from_slice_strict` honours the `DecodeFn` contract.
        unsafe { Self::from_raw(ffi::SYMBOL_STRICT, ffi::cbor_from_slice_strict) }
    }

    /// Look up a built-in entry point by its exported name.
    pub fn builtin_named(symbol: &str) -> Result<Self, BridgeError> {
        match symbol {
            ffi::SYMBOL => Ok(Self::builtin()),
            ffi::SYMBOL_STRICT => Ok(Self::builtin_strict()),
            other => Err(BridgeError::UnknownBuiltin(other.to_string())),
        }
    }

    /// Wrap an arbitrary entry point.
    ///
    /// # Safety
    ///
    /// `decode_fn` must only read `len` bytes from `data`, must not retain
    /// the pointer after returning, must not unwind, and must accept a
    /// dangling pointer when `len == 0`.
    pub unsafe fn from_raw(name: impl Into<String>, decode_fn: DecodeFn) -> Self {
        Self {
            name: name.into(),
            decode_fn,
            #[cfg(feature = "dylib")]
            _library: None,
        }
    }

    /// Load `symbol` from the shared library at `path`.
    ///
    /// The library is trusted build output of the implementation under
    /// test; loading it runs its initialisers.
    #[cfg(feature = "dylib")]
    pub fn load(path: &Path, symbol: &str) -> Result<Self, BridgeError> {
        // SAFETY: see the doc comment; the caller vouches for the library.
        let library = unsafe { libloading::Library::new(path) }.map_err(|source| {
            BridgeError::Load {
                path: path.to_path_buf(),
                source,
            }
        })?;

        // SAFETY: the symbol is declared with the `DecodeFn` signature by
        // the boundary contract. The copied pointer is only used while
        // `library` is kept alive in the returned value.
        let decode_fn: DecodeFn = unsafe { library.get::<DecodeFn>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|source| BridgeError::Symbol {
                symbol: symbol.to_string(),
                path: path.to_path_buf(),
                source,
            })?;

        log::debug!("loaded `{symbol}` from {}", path.display());
        Ok(Self {
            name: format!("{}:{symbol}", path.display()),
            decode_fn,
            _library: Some(library),
        })
    }

    /// Raw status for `input`.
    pub fn status(&self, input: &[u8]) -> c_int {
        if input.is_empty() {
            // Never form a pointer to the first of zero elements: pass an
            // aligned, non-null marker the callee must not dereference.
            let marker = NonNull::<u8>::dangling();
            // SAFETY: `len == 0`, the callee contract forbids dereferencing.
            return unsafe { (self.decode_fn)(marker.as_ptr(), 0) };
        }
        // SAFETY: `input` is borrowed for the whole call, so the pointer is
        // valid for `input.len()` bytes and cannot be mutated or freed until
        // the call returns.
        unsafe { (self.decode_fn)(input.as_ptr(), input.len()) }
    }
}

impl Decoder for ForeignDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, input: &[u8]) -> Outcome {
        outcome_from_status(self.status(input))
    }
}

impl std::fmt::Debug for ForeignDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignDecoder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn status_seven(_data: *const u8, _len: usize) -> c_int {
        7
    }

    unsafe extern "C" fn accepts_only_empty(data: *const u8, len: usize) -> c_int {
        assert!(!data.is_null());
        if len == 0 { 0 } else { 1 }
    }

    #[test]
    fn builtin_accepts_array_with_integer() {
        let bridge = ForeignDecoder::builtin();
        assert_eq!(bridge.decode(&[0x81, 0x18, 0x2A]), Outcome::Accepted);
        assert_eq!(bridge.decode(&[0xDE, 0xAD, 0xBE, 0xEF]), Outcome::Rejected);
    }

    #[test]
    fn any_nonzero_status_is_rejection() {
        let bridge = unsafe { ForeignDecoder::from_raw("seven", status_seven) };
        assert_eq!(bridge.status(&[0x00]), 7);
        assert_eq!(bridge.decode(&[0x00]), Outcome::Rejected);
        assert_eq!(outcome_from_status(-1), Outcome::Rejected);
        assert_eq!(outcome_from_status(0), Outcome::Accepted);
    }

    #[test]
    fn empty_input_passes_non_null_marker() {
        let bridge = unsafe { ForeignDecoder::from_raw("empty", accepts_only_empty) };
        assert_eq!(bridge.decode(&[]), Outcome::Accepted);
        assert_eq!(bridge.decode(&[0x00]), Outcome::Rejected);
    }

    #[test]
    fn builtin_lookup_by_name() {
        assert!(ForeignDecoder::builtin_named("cbor_from_slice").is_ok());
        assert!(ForeignDecoder::builtin_named("cbor_from_slice_strict").is_ok());
        assert!(matches!(
            ForeignDecoder::builtin_named("nope"),
            Err(BridgeError::UnknownBuiltin(_))
        ));
    }

    #[cfg(feature = "dylib")]
    #[test]
    fn missing_library_is_reported() {
        let err = ForeignDecoder::load(Path::new("/nonexistent/libnothing.so"), "decode")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Load { .. }));
    }
}
