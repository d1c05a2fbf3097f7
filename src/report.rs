// Findings, exit codes and the hex form used to print reproducing inputs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::oracle::{DivergenceRecord, Outcome};

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// Process outcome of a run. Every failure class has its own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Pass,
    /// Usage, I/O or library loading error.
    Error,
    /// The sanity pass failed: a harness/build problem, not a decoder bug.
    Setup,
    Divergence,
    /// The implementation under test crashed or hung.
    Instability,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Error => 1,
            Self::Setup => 2,
            Self::Divergence => 3,
            Self::Instability => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Hex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("odd number of hex digits")]
    OddLength,
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

/// Uppercase hex, no separators.
pub fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0F) as usize] as char);
    }
    out
}

/// Parse hex, ignoring whitespace, `:` separators and a leading `0x`.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, HexError> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let digits: Vec<u8> = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or(HexError::InvalidDigit(c))
        })
        .collect::<Result<_, _>>()?;
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    Ok(digits.chunks_exact(2).map(|p| (p[0] << 4) | p[1]).collect())
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstabilityKind {
    /// The isolated trial ended abnormally. `code` is `None` when the child
    /// was killed by a signal.
    Crash { code: Option<i32> },
    /// The isolated trial exceeded its time limit.
    Hang { timeout: Duration },
}

/// The implementation under test could not produce an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstabilityRecord {
    pub kind: InstabilityKind,
    pub input: Vec<u8>,
    pub reference: Outcome,
}

impl fmt::Display for InstabilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            InstabilityKind::Crash { code: Some(code) } => {
                write!(f, "crash: foreign decoder exited with status {code}")?
            }
            InstabilityKind::Crash { code: None } => {
                write!(f, "crash: foreign decoder killed by signal")?
            }
            InstabilityKind::Hang { timeout } => {
                write!(f, "hang: foreign decoder exceeded {timeout:?}")?
            }
        }
        write!(
            f,
            ", reference {}, {} bytes",
            self.reference,
            self.input.len()
        )
    }
}

/// Anything that fails a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Divergence(DivergenceRecord),
    Instability(InstabilityRecord),
}

impl Finding {
    pub fn input(&self) -> &[u8] {
        match self {
            Self::Divergence(r) => &r.input,
            Self::Instability(r) => &r.input,
        }
    }

    /// Short label, also used as the failure-corpus file name prefix.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Divergence(r) => r.kind.label(),
            Self::Instability(r) => match r.kind {
                InstabilityKind::Crash { .. } => "crash",
                InstabilityKind::Hang { .. } => "hang",
            },
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Divergence(_) => ExitCode::Divergence,
            Self::Instability(_) => ExitCode::Instability,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Divergence(r) => write!(f, "{r}")?,
            Self::Instability(r) => write!(f, "{r}")?,
        }
        write!(f, "\n  input: {}", to_hex(self.input()))
    }
}
