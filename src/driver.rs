// Fuzz driver: feeds candidates to the oracle until a finding, the budget,
// cancellation or the end of the candidate stream.
//
// A run has three phases, sharing one trial budget:
//   1. re-check every input in the failure corpus
//   2. replay the seed corpus
//   3. draw from the mutation engine
//
// Cancellation and budget are checked between trials only, so a trial is
// never torn. Findings are persisted before the run stops and are always
// part of the returned summary.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::corpus::{CorpusError, FailureCorpus, SeedEntry};
use crate::isolate::{ChildOutcome, Isolation, IsolationError};
use crate::mutate::{CandidateSource, SeedReplay};
use crate::oracle::{Oracle, Verdict};
use crate::report::{ExitCode, Finding, InstabilityKind, InstabilityRecord, to_hex};

const PROGRESS_INTERVAL: u64 = 100_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failure corpus: {0}")]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Isolation(#[from] IsolationError),
    #[cfg(feature = "parallel")]
    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Limits owned by the caller. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Budget {
    pub max_trials: Option<u64>,
    pub max_time: Option<Duration>,
}

impl Budget {
    pub fn trials(n: u64) -> Self {
        Self {
            max_trials: Some(n),
            max_time: None,
        }
    }

    pub fn time(limit: Duration) -> Self {
        Self {
            max_trials: None,
            max_time: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    pub budget: Budget,
    /// Continue after a finding instead of stopping the run.
    pub keep_going: bool,
    pub isolation: Isolation,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Finding,
    BudgetExhausted,
    Cancelled,
    /// The candidate source ran dry.
    Exhausted,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finding => "finding",
            Self::BudgetExhausted => "budget",
            Self::Cancelled => "cancelled",
            Self::Exhausted => "exhausted",
        }
    }

    // Priority when workers stop for different reasons.
    #[cfg(feature = "parallel")]
    fn rank(self) -> u8 {
        match self {
            Self::Finding => 3,
            Self::Cancelled => 2,
            Self::BudgetExhausted => 1,
            Self::Exhausted => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub trials: u64,
    pub agreements: u64,
    pub findings: Vec<Finding>,
    pub elapsed: Duration,
    pub stop: StopReason,
}

impl RunSummary {
    pub fn divergences(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| matches!(f, Finding::Divergence(_)))
            .count()
    }

    pub fn instabilities(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| matches!(f, Finding::Instability(_)))
            .count()
    }

    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.divergences() > 0 {
            ExitCode::Divergence
        } else if self.instabilities() > 0 {
            ExitCode::Instability
        } else {
            ExitCode::Pass
        }
    }
}

// ---------------------------------------------------------------------------
// Run state shared by workers
// ---------------------------------------------------------------------------

struct RunState<'c> {
    started: Instant,
    trials: AtomicU64,
    agreements: AtomicU64,
    findings: Mutex<Vec<Finding>>,
    halted: AtomicBool,
    cancel: &'c AtomicBool,
}

impl<'c> RunState<'c> {
    fn new(cancel: &'c AtomicBool) -> Self {
        Self {
            started: Instant::now(),
            trials: AtomicU64::new(0),
            agreements: AtomicU64::new(0),
            findings: Mutex::new(Vec::new()),
            halted: AtomicBool::new(false),
            cancel,
        }
    }

    fn into_summary(self, stop: StopReason) -> RunSummary {
        let findings = self
            .findings
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        RunSummary {
            trials: self.trials.into_inner(),
            agreements: self.agreements.into_inner(),
            findings,
            elapsed: self.started.elapsed(),
            stop,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct FuzzDriver<'a> {
    oracle: &'a Oracle,
    seeds: Vec<SeedEntry>,
    failures: Option<Mutex<FailureCorpus>>,
    options: DriverOptions,
}

impl<'a> FuzzDriver<'a> {
    pub fn new(oracle: &'a Oracle, seeds: Vec<SeedEntry>, options: DriverOptions) -> Self {
        Self {
            oracle,
            seeds,
            failures: None,
            options,
        }
    }

    /// Persist findings to `corpus` and re-check its entries first.
    pub fn with_failure_corpus(mut self, corpus: FailureCorpus) -> Self {
        self.failures = Some(Mutex::new(corpus));
        self
    }

    /// Run all phases on the calling thread.
    pub fn run(
        &self,
        source: &mut dyn CandidateSource,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, DriverError> {
        let state = RunState::new(cancel);
        if let Some(stop) = self.replay_phases(&state)? {
            return Ok(self.finish(state, stop));
        }
        log::debug!("exploring with mutation engine");
        let stop = self.drive(source, &state)?;
        Ok(self.finish(state, stop))
    }

    /// Replay phases on the calling thread, then `workers` independent
    /// mutation workers. `make_source(i)` builds worker `i`'s source.
    #[cfg(feature = "parallel")]
    pub fn run_parallel<F, S>(
        &self,
        workers: usize,
        make_source: F,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, DriverError>
    where
        F: Fn(usize) -> S + Sync,
        S: CandidateSource,
    {
        use rayon::prelude::*;

        let workers = workers.max(1);
        let state = RunState::new(cancel);
        if let Some(stop) = self.replay_phases(&state)? {
            return Ok(self.finish(state, stop));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cbordiff-worker-{i}"))
            .build()?;
        log::debug!("exploring with {workers} workers");
        let results: Vec<Result<StopReason, DriverError>> = pool.install(|| {
            (0..workers)
                .into_par_iter()
                .map(|i| {
                    let mut source = make_source(i);
                    let result = self.drive(&mut source, &state);
                    if result.is_err() {
                        state.halted.store(true, Ordering::SeqCst);
                    }
                    result
                })
                .collect()
        });

        let mut stop = StopReason::Exhausted;
        for result in results {
            let reason = result?;
            if reason.rank() > stop.rank() {
                stop = reason;
            }
        }
        Ok(self.finish(state, stop))
    }

    fn finish(&self, state: RunState<'_>, stop: StopReason) -> RunSummary {
        let summary = state.into_summary(stop);
        log::info!(
            "run finished ({}): {} trials, {} agreements, {} divergences, {} instabilities in {:.1?}",
            stop.as_str(),
            summary.trials,
            summary.agreements,
            summary.divergences(),
            summary.instabilities(),
            summary.elapsed
        );
        summary
    }

    /// Phases 1 and 2. `Some` if the run must stop.
    fn replay_phases(&self, state: &RunState<'_>) -> Result<Option<StopReason>, DriverError> {
        if let Some(failures) = &self.failures {
            let known = lock(failures).entries()?;
            if !known.is_empty() {
                log::info!("re-checking {} known failing inputs", known.len());
            }
            let mut replay = SeedReplay::new(known.into_iter().map(|e| e.bytes).collect());
            let stop = self.drive(&mut replay, state)?;
            if stop != StopReason::Exhausted {
                return Ok(Some(stop));
            }
        }

        log::debug!("replaying {} seeds", self.seeds.len());
        let mut replay = SeedReplay::new(self.seeds.iter().map(|s| s.bytes.clone()).collect());
        let stop = self.drive(&mut replay, state)?;
        if stop != StopReason::Exhausted {
            return Ok(Some(stop));
        }
        Ok(None)
    }

    fn stop_reason(&self, state: &RunState<'_>) -> Option<StopReason> {
        if state.halted.load(Ordering::SeqCst) {
            return Some(StopReason::Finding);
        }
        if state.cancel.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }
        if let Some(limit) = self.options.budget.max_time {
            if state.started.elapsed() >= limit {
                return Some(StopReason::BudgetExhausted);
            }
        }
        None
    }

    /// Reserve one trial from the budget.
    fn claim_trial(&self, state: &RunState<'_>) -> bool {
        let n = state.trials.fetch_add(1, Ordering::SeqCst);
        match self.options.budget.max_trials {
            Some(max) if n >= max => {
                state.trials.fetch_sub(1, Ordering::SeqCst);
                false
            }
            _ => true,
        }
    }

    /// Pull candidates from `source` until a stop condition.
    fn drive(
        &self,
        source: &mut dyn CandidateSource,
        state: &RunState<'_>,
    ) -> Result<StopReason, DriverError> {
        let mut input = Vec::new();
        loop {
            if let Some(reason) = self.stop_reason(state) {
                return Ok(reason);
            }
            if !source.next_candidate(&mut input) {
                return Ok(StopReason::Exhausted);
            }
            if !self.claim_trial(state) {
                return Ok(StopReason::BudgetExhausted);
            }
            if self.execute(&input, state)? && self.options.keep_going {
                source.feedback(&input);
            }
        }
    }

    /// Run one trial. Returns whether it produced a finding.
    fn execute(&self, input: &[u8], state: &RunState<'_>) -> Result<bool, DriverError> {
        let finding = match &self.options.isolation {
            Isolation::InProcess => match self.oracle.compare(input) {
                Verdict::Agree => None,
                Verdict::Divergent(record) => Some(Finding::Divergence(record)),
            },
            Isolation::Subprocess(child) => {
                let reference = self.oracle.reference().decode(input);
                match child.run(input)? {
                    ChildOutcome::Completed(foreign) => {
                        match self.oracle.judge(input, reference, foreign) {
                            Verdict::Agree => None,
                            Verdict::Divergent(record) => Some(Finding::Divergence(record)),
                        }
                    }
                    ChildOutcome::Crashed(code) => Some(Finding::Instability(InstabilityRecord {
                        kind: InstabilityKind::Crash { code },
                        input: input.to_vec(),
                        reference,
                    })),
                    ChildOutcome::TimedOut => Some(Finding::Instability(InstabilityRecord {
                        kind: InstabilityKind::Hang {
                            timeout: child.timeout,
                        },
                        input: input.to_vec(),
                        reference,
                    })),
                }
            }
        };

        match finding {
            None => {
                let agreed = state.agreements.fetch_add(1, Ordering::Relaxed) + 1;
                if agreed % PROGRESS_INTERVAL == 0 {
                    log::info!("{agreed} agreeing trials");
                }
                Ok(false)
            }
            Some(finding) => {
                self.record(finding, state)?;
                Ok(true)
            }
        }
    }

    fn record(&self, finding: Finding, state: &RunState<'_>) -> Result<(), DriverError> {
        match &finding {
            Finding::Divergence(r) => log::error!("{r}; input {}", to_hex(&r.input)),
            Finding::Instability(r) => log::warn!("{r}; input {}", to_hex(&r.input)),
        }
        if let Some(failures) = &self.failures {
            lock(failures).persist(&finding)?;
        }
        lock(&state.findings).push(finding);
        if !self.options.keep_going {
            state.halted.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

// A poisoned lock only means another worker panicked mid-push; the data is
// still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::builtin_seeds;
    use crate::mutate::Mutator;
    use crate::oracle::{Decoder, FnDecoder, Outcome};
    use crate::reference::ReferenceDecoder;
    use tempfile::tempdir;

    /// Foreign decoder that rejects every input starting with 0x81.
    fn rejects_arrays_of_one() -> Box<dyn Decoder> {
        Box::new(FnDecoder::new("iut", |input: &[u8]| {
            if input.first() == Some(&0x81) {
                Outcome::Rejected
            } else {
                crate::bridge::ForeignDecoder::builtin().decode(input)
            }
        }))
    }

    fn broken_oracle() -> Oracle {
        Oracle::new(
            Box::new(ReferenceDecoder::default()),
            rejects_arrays_of_one(),
        )
    }

    #[test]
    fn builtin_pair_passes_seed_replay() {
        let oracle = Oracle::builtin();
        let driver = FuzzDriver::new(&oracle, builtin_seeds(), DriverOptions::default());
        let cancel = AtomicBool::new(false);
        let mut empty = SeedReplay::new(Vec::new());
        let summary = driver.run(&mut empty, &cancel).unwrap();
        assert!(summary.passed());
        assert_eq!(summary.trials, builtin_seeds().len() as u64);
        assert_eq!(summary.stop, StopReason::Exhausted);
        assert_eq!(summary.exit_code(), ExitCode::Pass);
    }

    #[test]
    fn stops_on_first_divergence_and_persists_it() {
        let dir = tempdir().unwrap();
        let oracle = broken_oracle();
        let failures = FailureCorpus::open(dir.path()).unwrap();
        let driver = FuzzDriver::new(&oracle, builtin_seeds(), DriverOptions::default())
            .with_failure_corpus(failures.clone());
        let cancel = AtomicBool::new(false);
        let mut source = Mutator::from_seeds(&builtin_seeds(), 1);

        let summary = driver.run(&mut source, &cancel).unwrap();
        assert_eq!(summary.stop, StopReason::Finding);
        assert_eq!(summary.findings.len(), 1);
        assert_eq!(summary.findings[0].input(), &[0x81, 0x18, 0x2A]);
        assert_eq!(summary.exit_code(), ExitCode::Divergence);

        let persisted = failures.entries().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].bytes, vec![0x81, 0x18, 0x2A]);
    }

    #[test]
    fn known_failures_are_rechecked_first() {
        let dir = tempdir().unwrap();
        let failures = FailureCorpus::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("divergence-manual"), [0x81, 0x00]).unwrap();

        let oracle = broken_oracle();
        let driver = FuzzDriver::new(&oracle, Vec::new(), DriverOptions::default())
            .with_failure_corpus(failures);
        let cancel = AtomicBool::new(false);
        let summary = driver
            .run(&mut SeedReplay::new(Vec::new()), &cancel)
            .unwrap();
        assert_eq!(summary.trials, 1);
        assert_eq!(summary.findings[0].input(), &[0x81, 0x00]);
    }

    #[test]
    fn keep_going_collects_every_finding() {
        let oracle = broken_oracle();
        let options = DriverOptions {
            keep_going: true,
            ..Default::default()
        };
        let seeds = vec![
            SeedEntry::new("a", vec![0x81, 0x01], None),
            SeedEntry::new("b", vec![0x01], None),
            SeedEntry::new("c", vec![0x81, 0x02], None),
        ];
        let driver = FuzzDriver::new(&oracle, seeds, options);
        let cancel = AtomicBool::new(false);
        let summary = driver
            .run(&mut SeedReplay::new(Vec::new()), &cancel)
            .unwrap();
        assert_eq!(summary.trials, 3);
        assert_eq!(summary.agreements, 1);
        assert_eq!(summary.divergences(), 2);
        assert_eq!(summary.stop, StopReason::Exhausted);
    }

    #[test]
    fn keep_going_feeds_findings_back_to_the_source() {
        struct Recorder {
            queue: Vec<Vec<u8>>,
            fed: Vec<Vec<u8>>,
        }
        impl CandidateSource for Recorder {
            fn next_candidate(&mut self, out: &mut Vec<u8>) -> bool {
                let Some(next) = self.queue.pop() else {
                    return false;
                };
                *out = next;
                true
            }
            fn feedback(&mut self, input: &[u8]) {
                self.fed.push(input.to_vec());
            }
        }

        let oracle = broken_oracle();
        let cancel = AtomicBool::new(false);
        for (keep_going, expected) in [(true, vec![vec![0x81, 0x05]]), (false, Vec::new())] {
            let options = DriverOptions {
                keep_going,
                ..Default::default()
            };
            let driver = FuzzDriver::new(&oracle, Vec::new(), options);
            let mut source = Recorder {
                queue: vec![vec![0x81, 0x05], vec![0x01]],
                fed: Vec::new(),
            };
            let summary = driver.run(&mut source, &cancel).unwrap();
            assert_eq!(summary.divergences(), 1);
            assert_eq!(source.fed, expected);
        }
    }

    #[test]
    fn trial_budget_is_exact() {
        let oracle = Oracle::builtin();
        let options = DriverOptions {
            budget: Budget::trials(50),
            ..Default::default()
        };
        let driver = FuzzDriver::new(&oracle, Vec::new(), options);
        let cancel = AtomicBool::new(false);
        // Only well-formed single bytes, so the builtin pair always agrees.
        let mut source = SeedReplay::new((0u8..=0x17).map(|b| vec![b]).cycle().take(500).collect());
        let summary = driver.run(&mut source, &cancel).unwrap();
        assert_eq!(summary.trials, 50);
        assert_eq!(summary.stop, StopReason::BudgetExhausted);
    }

    #[test]
    fn cancellation_is_honoured_between_trials() {
        let oracle = Oracle::builtin();
        let driver = FuzzDriver::new(&oracle, builtin_seeds(), DriverOptions::default());
        let cancel = AtomicBool::new(true);
        let mut source = Mutator::from_seeds(&builtin_seeds(), 5);
        let summary = driver.run(&mut source, &cancel).unwrap();
        assert_eq!(summary.trials, 0);
        assert_eq!(summary.stop, StopReason::Cancelled);
    }

    #[test]
    fn time_budget_stops_unbounded_source() {
        let oracle = Oracle::builtin();
        let options = DriverOptions {
            budget: Budget::time(Duration::from_millis(50)),
            ..Default::default()
        };
        let driver = FuzzDriver::new(&oracle, Vec::new(), options);
        let cancel = AtomicBool::new(false);
        // Agreeing inputs only: single unsigned integers.
        struct Ints(u8);
        impl CandidateSource for Ints {
            fn next_candidate(&mut self, out: &mut Vec<u8>) -> bool {
                out.clear();
                out.push(self.0 % 24);
                self.0 = self.0.wrapping_add(1);
                true
            }
        }
        let summary = driver.run(&mut Ints(0), &cancel).unwrap();
        assert_eq!(summary.stop, StopReason::BudgetExhausted);
        assert!(summary.trials > 0);
        assert!(summary.passed());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_workers_share_budget() {
        let oracle = Oracle::builtin();
        let options = DriverOptions {
            budget: Budget::trials(400),
            ..Default::default()
        };
        let driver = FuzzDriver::new(&oracle, Vec::new(), options);
        let cancel = AtomicBool::new(false);
        let summary = driver
            .run_parallel(
                4,
                |i| SeedReplay::new(vec![vec![i as u8]; 1000]),
                &cancel,
            )
            .unwrap();
        assert_eq!(summary.trials, 400);
        assert!(summary.passed());
    }
}
