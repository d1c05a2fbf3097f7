// Candidate generation.
//
// The driver pulls inputs through `CandidateSource`. Two sources are built
// in: `SeedReplay` (each corpus entry once, in order) and `Mutator`
// (stacked random byte-level mutations of corpus material, with a few
// CBOR-aware operators). Coverage-guided generation is provided by the
// libFuzzer target in `fuzz/`, which drives the same oracle.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cbor::head::{AI_EIGHT_BYTES, AI_INDEFINITE, AI_ONE_BYTE, BREAK, Major};
use crate::corpus::SeedEntry;

/// Default cap on generated input length.
pub const DEFAULT_MAX_LEN: usize = 4096;

/// Default maximum number of stacked mutations per candidate.
const DEFAULT_MAX_STACK: u32 = 6;

/// Bytes that tend to sit on decoder branch points.
const INTERESTING_BYTES: &[u8] = &[
    0x00, 0x01, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1F, 0x20, 0x3B, 0x40, 0x5F, 0x60, 0x7F, 0x80,
    0x9F, 0xA0, 0xBF, 0xC0, 0xD8, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA, 0xFB, 0xFF,
];

/// Produces the next candidate input.
pub trait CandidateSource: Send {
    /// Write the next candidate into `out` (cleared first). Returns `false`
    /// once the source is exhausted.
    fn next_candidate(&mut self, out: &mut Vec<u8>) -> bool;

    /// Called with each input that produced a finding when the run keeps
    /// going past findings.
    fn feedback(&mut self, _input: &[u8]) {}
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Yields each entry once.
#[derive(Debug, Clone)]
pub struct SeedReplay {
    entries: Vec<Vec<u8>>,
    next: usize,
}

impl SeedReplay {
    pub fn new(entries: Vec<Vec<u8>>) -> Self {
        Self { entries, next: 0 }
    }
}

impl CandidateSource for SeedReplay {
    fn next_candidate(&mut self, out: &mut Vec<u8>) -> bool {
        let Some(entry) = self.entries.get(self.next) else {
            return false;
        };
        out.clear();
        out.extend_from_slice(entry);
        self.next += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// Mutator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    FlipBit,
    SetByte,
    InsertByte,
    DeleteRange,
    DuplicateRange,
    Splice,
    InsertHead,
    Truncate,
}

const MUTATIONS: &[Mutation] = &[
    Mutation::FlipBit,
    Mutation::SetByte,
    Mutation::InsertByte,
    Mutation::DeleteRange,
    Mutation::DuplicateRange,
    Mutation::Splice,
    Mutation::InsertHead,
    Mutation::Truncate,
];

/// Random mutation engine over a pool of corpus inputs. Never exhausts.
#[derive(Debug, Clone)]
pub struct Mutator {
    pool: Vec<Vec<u8>>,
    rng: StdRng,
    max_len: usize,
    max_stack: u32,
}

impl Mutator {
    /// Deterministic for a given `seed` and pool.
    pub fn new(pool: Vec<Vec<u8>>, seed: u64) -> Self {
        Self {
            pool,
            rng: StdRng::seed_from_u64(seed),
            max_len: DEFAULT_MAX_LEN,
            max_stack: DEFAULT_MAX_STACK,
        }
    }

    pub fn from_seeds(seeds: &[SeedEntry], seed: u64) -> Self {
        Self::new(seeds.iter().map(|s| s.bytes.clone()).collect(), seed)
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    fn apply(&mut self, op: Mutation, buf: &mut Vec<u8>) {
        let len = buf.len();
        match op {
            Mutation::FlipBit if len > 0 => {
                let i = self.rng.random_range(0..len);
                buf[i] ^= 1u8 << self.rng.random_range(0..8u32);
            }
            Mutation::SetByte if len > 0 => {
                let i = self.rng.random_range(0..len);
                buf[i] = self.byte();
            }
            Mutation::InsertByte => {
                let i = self.rng.random_range(0..=len);
                let b = self.byte();
                buf.insert(i, b);
            }
            Mutation::DeleteRange if len > 0 => {
                let start = self.rng.random_range(0..len);
                let end = self.rng.random_range(start + 1..=len.min(start + 16));
                buf.drain(start..end);
            }
            Mutation::DuplicateRange if len > 0 => {
                let start = self.rng.random_range(0..len);
                let end = self.rng.random_range(start + 1..=len.min(start + 32));
                let chunk = buf[start..end].to_vec();
                let at = self.rng.random_range(0..=len);
                buf.splice(at..at, chunk);
            }
            Mutation::Splice if !self.pool.is_empty() => {
                let other = &self.pool[self.rng.random_range(0..self.pool.len())];
                if other.is_empty() {
                    return;
                }
                let from = self.rng.random_range(0..other.len());
                let tail = other[from..].to_vec();
                let at = self.rng.random_range(0..=len);
                buf.truncate(at);
                buf.extend_from_slice(&tail);
            }
            Mutation::InsertHead => {
                let head = self.head();
                let at = self.rng.random_range(0..=len);
                buf.splice(at..at, head);
            }
            Mutation::Truncate if len > 0 => {
                let keep = self.rng.random_range(0..len);
                buf.truncate(keep);
            }
            _ => {
                let b = self.byte();
                buf.push(b);
            }
        }
    }

    fn byte(&mut self) -> u8 {
        if self.rng.random_bool(0.5) {
            INTERESTING_BYTES[self.rng.random_range(0..INTERESTING_BYTES.len())]
        } else {
            self.rng.random()
        }
    }

    /// A random item head: initial byte plus a matching argument.
    fn head(&mut self) -> Vec<u8> {
        let major = Major::from_initial(self.rng.random_range(0..8u8) << 5);
        if self.rng.random_bool(0.1) {
            return vec![BREAK];
        }
        let info = match self.rng.random_range(0..6u8) {
            0 => self.rng.random_range(0..24),
            1 if major.allows_indefinite() => AI_INDEFINITE,
            n => AI_ONE_BYTE + (n - 1).min(AI_EIGHT_BYTES - AI_ONE_BYTE),
        };
        let mut head = vec![(major.bits() << 5) | info];
        let arg_len = match info {
            AI_ONE_BYTE..=AI_EIGHT_BYTES => 1usize << (info - AI_ONE_BYTE),
            _ => 0,
        };
        // Small arguments keep declared lengths near the real input size.
        for i in 0..arg_len {
            let b = if i + 1 == arg_len {
                self.rng.random_range(0..32)
            } else {
                0
            };
            head.push(b);
        }
        head
    }
}

impl CandidateSource for Mutator {
    fn next_candidate(&mut self, out: &mut Vec<u8>) -> bool {
        out.clear();
        if !self.pool.is_empty() {
            let base = &self.pool[self.rng.random_range(0..self.pool.len())];
            out.extend_from_slice(base);
        }
        let stack = self.rng.random_range(1..=self.max_stack);
        for _ in 0..stack {
            let op = MUTATIONS[self.rng.random_range(0..MUTATIONS.len())];
            self.apply(op, out);
        }
        out.truncate(self.max_len);
        true
    }

    /// Failing inputs join the pool so later candidates mutate them.
    fn feedback(&mut self, input: &[u8]) {
        self.pool.push(input.to_vec());
    }
}
