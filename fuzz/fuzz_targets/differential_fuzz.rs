#![no_main]
use std::sync::OnceLock;

use cbordiff::oracle::{Oracle, Verdict};
use cbordiff::report::to_hex;
use libfuzzer_sys::fuzz_target;

fn oracle() -> &'static Oracle {
    static ORACLE: OnceLock<Oracle> = OnceLock::new();
    ORACLE.get_or_init(Oracle::builtin)
}

fuzz_target!(|data: &[u8]| {
    // Panicking makes libFuzzer save the input as a crash artifact.
    if let Verdict::Divergent(record) = oracle().compare(data) {
        panic!("{record}\n  input: {}", to_hex(&record.input));
    }
});
