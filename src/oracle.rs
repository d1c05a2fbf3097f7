// Differential oracle: one candidate input, two decoders, one verdict.
//
// The reference decoder defines the lower bound of acceptance. A finding is
// raised when the reference accepts an input that the implementation under
// test rejects. The converse is only reported in bidirectional mode.

use std::fmt;

use crate::bridge::ForeignDecoder;
use crate::reference::ReferenceDecoder;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of running one decoder over one candidate input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decoder trait
// ---------------------------------------------------------------------------

/// A decoder reduced to its accept/reject signal.
///
/// Implementations must not retain or modify `input`, and must return the
/// same outcome for the same bytes.
pub trait Decoder: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    fn decode(&self, input: &[u8]) -> Outcome;
}

/// Adapts a closure into a `Decoder`.
pub struct FnDecoder<F> {
    name: String,
    f: F,
}

impl<F> FnDecoder<F>
where
    F: Fn(&[u8]) -> Outcome + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Decoder for FnDecoder<F>
where
    F: Fn(&[u8]) -> Outcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, input: &[u8]) -> Outcome {
        (self.f)(input)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Which disagreements count as findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Only "reference accepts, implementation rejects".
    #[default]
    ReferenceLowerBound,
    /// Also "implementation accepts, reference rejects".
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DivergenceKind {
    /// The reference accepted bytes the implementation under test rejected.
    ForeignRejected,
    /// The implementation under test accepted bytes the reference rejected.
    ForeignAccepted,
}

impl DivergenceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::ForeignRejected => "divergence",
            Self::ForeignAccepted => "permissive",
        }
    }
}

/// The comparison rule, separated from the decode calls.
pub fn classify(reference: Outcome, foreign: Outcome, direction: Direction) -> Option<DivergenceKind> {
    match (reference, foreign) {
        (Outcome::Accepted, Outcome::Rejected) => Some(DivergenceKind::ForeignRejected),
        (Outcome::Rejected, Outcome::Accepted) if direction == Direction::Bidirectional => {
            Some(DivergenceKind::ForeignAccepted)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Trial + verdict
// ---------------------------------------------------------------------------

/// Both outcomes for one candidate input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trial<'a> {
    pub input: &'a [u8],
    pub reference: Outcome,
    pub foreign: Outcome,
}

/// A disagreement, with an owned copy of the triggering input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergenceRecord {
    pub kind: DivergenceKind,
    pub input: Vec<u8>,
    pub reference: Outcome,
    pub foreign: Outcome,
}

impl fmt::Display for DivergenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: reference {}, foreign {}, {} bytes",
            self.kind.label(),
            self.reference,
            self.foreign,
            self.input.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Agree,
    Divergent(DivergenceRecord),
}

impl Verdict {
    #[inline]
    pub fn is_divergent(&self) -> bool {
        matches!(self, Self::Divergent(_))
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

pub struct Oracle {
    reference: Box<dyn Decoder>,
    foreign: Box<dyn Decoder>,
    direction: Direction,
}

impl Oracle {
    pub fn new(reference: Box<dyn Decoder>, foreign: Box<dyn Decoder>) -> Self {
        Self {
            reference,
            foreign,
            direction: Direction::default(),
        }
    }

    /// `ciborium` reference against the crate's own exported decoder.
    pub fn builtin() -> Self {
        Self::new(
            Box::new(ReferenceDecoder::default()),
            Box::new(ForeignDecoder::builtin()),
        )
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn reference(&self) -> &dyn Decoder {
        self.reference.as_ref()
    }

    pub fn foreign(&self) -> &dyn Decoder {
        self.foreign.as_ref()
    }

    /// Run both decoders over the same borrowed bytes.
    pub fn trial<'a>(&self, input: &'a [u8]) -> Trial<'a> {
        let reference = self.reference.decode(input);
        let foreign = self.foreign.decode(input);
        log::trace!(
            "trial: {} bytes, {}={reference}, {}={foreign}",
            input.len(),
            self.reference.name(),
            self.foreign.name()
        );
        Trial {
            input,
            reference,
            foreign,
        }
    }

    /// Build the verdict for outcomes obtained elsewhere (e.g. an isolated
    /// child process running the foreign decoder).
    pub fn judge(&self, input: &[u8], reference: Outcome, foreign: Outcome) -> Verdict {
        match classify(reference, foreign, self.direction) {
            None => Verdict::Agree,
            Some(kind) => Verdict::Divergent(DivergenceRecord {
                kind,
                input: input.to_vec(),
                reference,
                foreign,
            }),
        }
    }

    pub fn compare(&self, input: &[u8]) -> Verdict {
        let trial = self.trial(input);
        self.judge(input, trial.reference, trial.foreign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(name: &str, outcome: Outcome) -> Box<dyn Decoder> {
        Box::new(FnDecoder::new(name, move |_: &[u8]| outcome))
    }

    #[test]
    fn classification_table() {
        use Outcome::*;
        let d = Direction::ReferenceLowerBound;
        assert_eq!(classify(Accepted, Accepted, d), None);
        assert_eq!(classify(Rejected, Rejected, d), None);
        assert_eq!(classify(Rejected, Accepted, d), None);
        assert_eq!(
            classify(Accepted, Rejected, d),
            Some(DivergenceKind::ForeignRejected)
        );
    }

    #[test]
    fn bidirectional_flags_permissive_foreign() {
        use Outcome::*;
        let d = Direction::Bidirectional;
        assert_eq!(
            classify(Rejected, Accepted, d),
            Some(DivergenceKind::ForeignAccepted)
        );
        assert_eq!(
            classify(Accepted, Rejected, d),
            Some(DivergenceKind::ForeignRejected)
        );
        assert_eq!(classify(Rejected, Rejected, d), None);
    }

    #[test]
    fn reference_rejection_always_agrees() {
        for foreign in [Outcome::Accepted, Outcome::Rejected] {
            let oracle = Oracle::new(fixed("ref", Outcome::Rejected), fixed("iut", foreign));
            assert_eq!(oracle.compare(b"\x81\x18\x2a"), Verdict::Agree);
        }
    }

    #[test]
    fn divergence_carries_input() {
        let oracle = Oracle::new(
            fixed("ref", Outcome::Accepted),
            fixed("iut", Outcome::Rejected),
        );
        match oracle.compare(&[0x18, 0x2A]) {
            Verdict::Divergent(record) => {
                assert_eq!(record.input, vec![0x18, 0x2A]);
                assert_eq!(record.kind, DivergenceKind::ForeignRejected);
                assert_eq!(record.reference, Outcome::Accepted);
                assert_eq!(record.foreign, Outcome::Rejected);
            }
            Verdict::Agree => panic!("expected divergence"),
        }
    }

    #[test]
    fn both_decoders_see_identical_bytes() {
        use std::sync::Mutex;
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        let b = seen.clone();
        let oracle = Oracle::new(
            Box::new(FnDecoder::new("ref", move |input: &[u8]| {
                a.lock().unwrap().push(input.to_vec());
                Outcome::Accepted
            })),
            Box::new(FnDecoder::new("iut", move |input: &[u8]| {
                b.lock().unwrap().push(input.to_vec());
                Outcome::Accepted
            })),
        );
        oracle.compare(&[1, 2, 3]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[test]
    fn builtin_pair_agrees_on_known_inputs() {
        let oracle = Oracle::builtin();
        let trial = oracle.trial(&[0x81, 0x18, 0x2A]);
        assert_eq!(trial.reference, Outcome::Accepted);
        assert_eq!(trial.foreign, Outcome::Accepted);
        let trial = oracle.trial(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(trial.reference, Outcome::Rejected);
        assert_eq!(trial.foreign, Outcome::Rejected);
        assert_eq!(oracle.compare(&[]), Verdict::Agree);
    }

    #[test]
    fn builtin_pair_rejects_two_byte_simple_below_32() {
        let oracle = Oracle::builtin();
        for input in [&[0xF8, 0x14][..], &[0xF8, 0x17], &[0xA1, 0xF8, 0x16, 0x43, 0x66, 0x6F, 0x0A]] {
            let trial = oracle.trial(input);
            assert_eq!(trial.reference, Outcome::Rejected, "{input:02X?}");
            assert_eq!(trial.foreign, Outcome::Rejected, "{input:02X?}");
            assert_eq!(oracle.compare(input), Verdict::Agree);
        }
    }
}
