// Seed corpus, sanity pass and the persisted corpus of failing inputs.
//
// Seeds are raw byte blobs with a name and, for the built-in ones, the
// outcome every decoder is expected to produce. The sanity pass checks those
// expectations decoder by decoder before any randomized exploration; a
// mismatch there is a setup failure, not a divergence.
//
// The failure corpus is a directory of raw input files. Writes go through a
// temporary file and a rename so a reader never sees a partial fixture.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::oracle::{Decoder, Oracle, Outcome};
use crate::report::{Finding, to_hex};

// ---------------------------------------------------------------------------
// Seeds
// ---------------------------------------------------------------------------

/// A named candidate input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Outcome every decoder must produce, if known.
    pub expect: Option<Outcome>,
}

impl SeedEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>, expect: Option<Outcome>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            expect,
        }
    }
}

const BUILTIN_SEEDS: &[(&str, &[u8], Outcome)] = &[
    ("array-one-int", &[0x81, 0x18, 0x2A], Outcome::Accepted),
    ("uint-42", &[0x18, 0x2A], Outcome::Accepted),
    ("map-foo-10", &[0xA1, 0x63, 0x66, 0x6F, 0x6F, 0x0A], Outcome::Accepted),
    (
        "map-bytes-foo",
        &[
            0xA2, 0x65, 0x62, 0x79, 0x74, 0x65, 0x73, 0x41, 0x01, 0x63, 0x66, 0x6F, 0x6F, 0x18,
            0x2A,
        ],
        Outcome::Accepted,
    ),
    ("garbage-deadbeef", &[0xDE, 0xAD, 0xBE, 0xEF], Outcome::Rejected),
    ("truncated-uint", &[0x18], Outcome::Rejected),
    ("empty", &[], Outcome::Rejected),
    // `false` in the two-byte simple form, which is not well-formed.
    ("simple-false-two-byte", &[0xF8, 0x14], Outcome::Rejected),
];

// Inputs that once diverged between the two decoders.
const REGRESSION_SEEDS: &[(&str, &[u8])] = &[
    (
        "dup-keys-trailing",
        &[0xA2, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00],
    ),
    (
        "negative-keys-double",
        &[
            0xA2, 0x30, 0x30, 0x31, 0xFB, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30,
        ],
    ),
    (
        "unassigned-simple",
        &[0xA3, 0x30, 0x30, 0x38, 0x30, 0x30, 0x31, 0xE8],
    ),
    (
        "text-key",
        &[
            0xA2, 0x65, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x63, 0x30, 0x30, 0x30, 0x38, 0x0B,
        ],
    ),
    (
        "negative-u64-argument",
        &[
            0xA2, 0x31, 0x3B, 0xFB, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30,
        ],
    ),
];

/// Fixtures with known ground truth for every conforming decoder.
pub fn builtin_seeds() -> Vec<SeedEntry> {
    BUILTIN_SEEDS
        .iter()
        .map(|&(name, bytes, expect)| SeedEntry::new(name, bytes, Some(expect)))
        .collect()
}

/// Past divergences. Mutation material only; no expectation is attached.
pub fn regression_seeds() -> Vec<SeedEntry> {
    REGRESSION_SEEDS
        .iter()
        .map(|&(name, bytes)| SeedEntry::new(name, bytes, None))
        .collect()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CorpusError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error(
        "seed `{seed}`: {decoder} decoder {actual}, expected {expected} (input {})",
        to_hex(.input)
    )]
    SeedMismatch {
        seed: String,
        decoder: String,
        expected: Outcome,
        actual: Outcome,
        input: Vec<u8>,
    },
    #[error("no seeds with expected outcomes to check")]
    NoSeeds,
}

// ---------------------------------------------------------------------------
// Directory loading
// ---------------------------------------------------------------------------

/// Load every regular file in `dir` as a seed, sorted by name.
pub fn load_dir(dir: &Path) -> Result<Vec<SeedEntry>, CorpusError> {
    let mut seeds = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CorpusError::io(dir, e))? {
        let entry = entry.map_err(|e| CorpusError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| CorpusError::io(&path, e))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| CorpusError::io(&path, e))?;
        seeds.push(SeedEntry::new(name, bytes, None));
    }
    seeds.sort_by(|a, b| a.name.cmp(&b.name));
    log::debug!("loaded {} corpus entries from {}", seeds.len(), dir.display());
    Ok(seeds)
}

// ---------------------------------------------------------------------------
// Sanity pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SanityReport {
    /// Seeds with an expectation that were checked.
    pub checked: usize,
    /// Seeds without an expectation.
    pub skipped: usize,
}

fn check_decoder(decoder: &dyn Decoder, seed: &SeedEntry, expected: Outcome) -> Result<(), SetupError> {
    let actual = decoder.decode(&seed.bytes);
    if actual != expected {
        return Err(SetupError::SeedMismatch {
            seed: seed.name.clone(),
            decoder: decoder.name().to_string(),
            expected,
            actual,
            input: seed.bytes.clone(),
        });
    }
    Ok(())
}

/// Check every seed's expected outcome against each decoder on its own.
pub fn sanity_check(oracle: &Oracle, seeds: &[SeedEntry]) -> Result<SanityReport, SetupError> {
    let mut report = SanityReport::default();
    for seed in seeds {
        let Some(expected) = seed.expect else {
            report.skipped += 1;
            continue;
        };
        check_decoder(oracle.reference(), seed, expected)?;
        check_decoder(oracle.foreign(), seed, expected)?;
        report.checked += 1;
    }
    if report.checked == 0 {
        return Err(SetupError::NoSeeds);
    }
    log::info!(
        "sanity pass: {} seeds checked, {} without expectation",
        report.checked,
        report.skipped
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Failure corpus
// ---------------------------------------------------------------------------

/// Directory of inputs that failed a previous run.
#[derive(Debug, Clone)]
pub struct FailureCorpus {
    dir: PathBuf,
}

impl FailureCorpus {
    /// Open (and create if needed) the corpus directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CorpusError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// All persisted inputs.
    pub fn entries(&self) -> Result<Vec<SeedEntry>, CorpusError> {
        load_dir(&self.dir)
    }

    /// Persist a finding's input. Identical inputs map to the same file, so
    /// persisting twice is a no-op. Returns the fixture path.
    ///
    /// Callers running several workers must serialize calls.
    pub fn persist(&self, finding: &Finding) -> Result<PathBuf, CorpusError> {
        let path = self.dir.join(entry_name(finding.label(), finding.input()));
        if path.exists() {
            return Ok(path);
        }
        let tmp = self.dir.join(format!(
            ".{}.tmp",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        ));
        fs::write(&tmp, finding.input()).map_err(|e| CorpusError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| CorpusError::io(&path, e))?;
        log::info!("persisted {} to {}", finding.label(), path.display());
        Ok(path)
    }
}

/// `<label>-<16 hex digits of a content hash>`.
pub fn entry_name(label: &str, input: &[u8]) -> String {
    format!("{label}-{}", content_id(input))
}

#[cfg(feature = "file-io")]
fn content_id(input: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(input);
    to_hex(&digest[..8]).to_ascii_lowercase()
}

#[cfg(not(feature = "file-io"))]
fn content_id(input: &[u8]) -> String {
    // FNV-1a, 64-bit.
    let hash = input.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01B3)
    });
    format!("{hash:016x}")
}
