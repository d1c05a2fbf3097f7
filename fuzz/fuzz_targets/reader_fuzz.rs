#![no_main]
use cbordiff::cbor::{self, Limits};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The reader must never panic, only return errors.
    let lenient = cbor::read(data, &Limits::non_strict());
    let strict = cbor::read(data, &Limits::strict());

    if let Ok(consumed) = lenient {
        assert!(consumed >= 1 && consumed <= data.len());
    }
    // Strict acceptance is a subset of non-strict acceptance.
    if strict.is_ok() {
        assert_eq!(strict, lenient);
    }
});
