//! cbordiff: differential conformance fuzzing for CBOR decoders.
//!
//! A trusted reference decoder and an implementation under test, reached
//! through a C-ABI decode function, see the same candidate inputs. An input
//! the reference accepts but the implementation rejects is a divergence:
//! it is persisted, reported as hex and turned into a distinct exit code.
//!
//! The crate provides:
//! - The oracle and its decoders (`oracle`, `reference`, `bridge`)
//! - Seed corpus, sanity pass and failure corpus (`corpus`)
//! - Candidate generation and the fuzz driver (`mutate`, `driver`)
//! - Crash/hang isolation in a child process (`isolate`)
//! - A built-in CBOR reader exported over the C boundary (`cbor`, `ffi`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use cbordiff::corpus::{builtin_seeds, sanity_check};
//! use cbordiff::oracle::{Oracle, Verdict};
//!
//! let oracle = Oracle::builtin();
//! sanity_check(&oracle, &builtin_seeds()).unwrap();
//! assert_eq!(oracle.compare(&[0x81, 0x18, 0x2A]), Verdict::Agree);
//! ```

pub mod bridge;
pub mod cbor;
pub mod corpus;
pub mod driver;
pub mod ffi;
pub mod isolate;
pub mod mutate;
pub mod oracle;
pub mod reference;
pub mod report;

#[cfg(feature = "cli")]
pub mod cli;

pub use driver::{Budget, DriverOptions, FuzzDriver, RunSummary};
pub use oracle::{Decoder, Oracle, Outcome, Verdict};
pub use report::{ExitCode, Finding};
