// Loading a decoder under test from a shared library.
#![cfg(feature = "dylib")]

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::process::Command;

use cbordiff::bridge::{BridgeError, ForeignDecoder};
use cbordiff::oracle::{Decoder, Outcome};

/// The crate's own cdylib, built alongside the test binaries.
fn own_cdylib() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let deps = exe.parent()?;
    let file = format!("{DLL_PREFIX}cbordiff{DLL_SUFFIX}");
    [deps.join(&file), deps.parent()?.join(&file)]
        .into_iter()
        .find(|p| p.is_file())
}

#[test]
fn own_cdylib_decodes_through_loaded_symbol() {
    let Some(path) = own_cdylib() else {
        eprintln!("cdylib not found next to the test binary; skipping");
        return;
    };
    let decoder = ForeignDecoder::load(&path, "cbor_from_slice").unwrap();
    assert!(decoder.name().ends_with(":cbor_from_slice"));
    assert_eq!(decoder.decode(&[0x81, 0x18, 0x2A]), Outcome::Accepted);
    assert_eq!(decoder.decode(&[0xDE, 0xAD, 0xBE, 0xEF]), Outcome::Rejected);
    assert_eq!(decoder.decode(&[]), Outcome::Rejected);

    let strict = ForeignDecoder::load(&path, "cbor_from_slice_strict").unwrap();
    assert_eq!(strict.decode(&[0x18, 0x2A, 0x00]), Outcome::Rejected);
    assert_eq!(decoder.decode(&[0x18, 0x2A, 0x00]), Outcome::Accepted);
}

#[test]
fn absent_symbol_is_reported() {
    let Some(path) = own_cdylib() else {
        eprintln!("cdylib not found next to the test binary; skipping");
        return;
    };
    let err = ForeignDecoder::load(&path, "cbordiff_no_such_decoder").unwrap_err();
    match &err {
        BridgeError::Symbol { symbol, path: p, .. } => {
            assert_eq!(symbol, "cbordiff_no_such_decoder");
            assert_eq!(p, &path);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains("cbordiff_no_such_decoder"));
}

#[cfg(target_os = "linux")]
#[test]
fn system_library_without_decode_symbol() {
    let err = ForeignDecoder::load(Path::new("libc.so.6"), "cbor_from_slice").unwrap_err();
    assert!(matches!(err, BridgeError::Symbol { .. }), "{err}");
}

#[test]
fn cli_check_against_loaded_library() {
    let Some(path) = own_cdylib() else {
        eprintln!("cdylib not found next to the test binary; skipping");
        return;
    };
    let out = Command::new(env!("CARGO_BIN_EXE_cbordiff"))
        .args(["check", "--hex", "81182A", "--library"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("foreign:   accepted"));
}
