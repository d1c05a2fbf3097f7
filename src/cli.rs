// Command-line front end for cbordiff.
//
// Subcommands map one-to-one onto library operations; this module only
// parses arguments, wires the oracle together and turns results into exit
// codes.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::bridge::{BridgeError, ForeignDecoder};
use crate::cbor::MAX_NESTING_LEVEL;
use crate::corpus::{self, FailureCorpus, SeedEntry};
use crate::driver::{Budget, DriverOptions, FuzzDriver, RunSummary};
use crate::ffi;
use crate::isolate::{self, ChildTrial, DEFAULT_TIMEOUT, Isolation};
use crate::mutate::{DEFAULT_MAX_LEN, Mutator};
use crate::oracle::{Direction, Oracle, Verdict};
use crate::reference::{DEFAULT_REFERENCE_DEPTH, ReferenceDecoder};
use crate::report::{ExitCode, Finding, parse_hex, to_hex};

const DEFAULT_FAILURES_DIR: &str = "fuzz/failures";

/// Exit status after a second interrupt.
const INTERRUPTED: i32 = 130;

/// Set by the Ctrl-C handler; the driver checks it between trials.
static CANCEL: AtomicBool = AtomicBool::new(false);

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

/// Byte count with optional K, M or G suffix.
fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

/// Duration with `ms`, `s`, `m` or `h` suffix. A bare number is seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".into());
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_part, unit) = s.split_at(split);
    let num: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration '{s}': {e}"))?;
    let millis = match unit.trim() {
        "ms" => Some(num),
        "" | "s" => num.checked_mul(1000),
        "m" => num.checked_mul(60_000),
        "h" => num.checked_mul(3_600_000),
        other => return Err(format!("unknown duration unit '{other}' in '{s}'")),
    };
    millis
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Differential conformance fuzzer for CBOR decoders.
#[derive(Parser, Debug)]
#[command(
    name = "cbordiff",
    version,
    about = "Differential conformance fuzzer for CBOR decoders",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output results as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Sanity pass, then fuzz until a finding or the budget runs out.
    Run(RunArgs),
    /// Check the built-in seeds against each decoder.
    Sanity(DecoderArgs),
    /// Run a single trial and print both outcomes.
    Check(CheckArgs),
    /// Child side of an isolated trial: decode stdin with the foreign decoder.
    #[command(hide = true)]
    Trial(DecoderArgs),
    /// List seed and failure corpus entries.
    Corpus(CorpusArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug, Clone)]
struct DecoderArgs {
    /// Shared library exporting the decoder under test (default: built-in).
    #[arg(long, value_hint = ValueHint::FilePath)]
    library: Option<PathBuf>,

    /// Exported decode symbol.
    #[arg(long, default_value = ffi::SYMBOL)]
    symbol: String,

    /// Test the built-in decoder's strict profile.
    #[arg(long, conflicts_with_all = ["library", "symbol"])]
    strict: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    decoder: DecoderArgs,

    /// Directory of extra seeds (repeatable).
    #[arg(long, value_hint = ValueHint::DirPath)]
    corpus: Vec<PathBuf>,

    /// Directory where failing inputs are persisted and re-checked.
    #[arg(long, value_hint = ValueHint::DirPath, default_value = DEFAULT_FAILURES_DIR)]
    failures: PathBuf,

    /// Stop after this many trials.
    #[arg(long = "max-trials")]
    max_trials: Option<u64>,

    /// Stop after this long (e.g. 30s, 5m, 1h).
    #[arg(long = "max-time", value_parser = parse_duration)]
    max_time: Option<Duration>,

    /// Mutation RNG seed (default: random, logged).
    #[arg(long)]
    seed: Option<u64>,

    /// Largest generated input (supports K/M/G suffix).
    #[arg(long = "max-len", value_parser = parse_byte_size, default_value_t = DEFAULT_MAX_LEN as u64)]
    max_len: u64,

    /// Number of mutation workers.
    #[cfg(feature = "parallel")]
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Run the foreign decoder in a child process per trial.
    #[arg(long)]
    isolate: bool,

    /// Per-trial limit in isolation mode.
    #[arg(long, value_parser = parse_duration, default_value = "5s", requires = "isolate")]
    timeout: Duration,

    /// Also report inputs only the decoder under test accepts.
    #[arg(long)]
    bidirectional: bool,

    /// Keep fuzzing after a finding.
    #[arg(long = "keep-going")]
    keep_going: bool,

    /// Skip the sanity pass.
    #[arg(long = "skip-sanity")]
    skip_sanity: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    decoder: DecoderArgs,

    /// Input as hex instead of a file.
    #[arg(long, conflicts_with = "file")]
    hex: Option<String>,

    /// Also report inputs only the decoder under test accepts.
    #[arg(long)]
    bidirectional: bool,

    /// Input file.
    #[arg(value_hint = ValueHint::FilePath, required_unless_present = "hex")]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CorpusArgs {
    /// Failure corpus directory to list.
    #[arg(long, value_hint = ValueHint::DirPath, default_value = DEFAULT_FAILURES_DIR)]
    failures: PathBuf,

    /// Extra seed directory to list (repeatable).
    #[arg(long, value_hint = ValueHint::DirPath)]
    corpus: Vec<PathBuf>,
}

struct Globals {
    quiet: bool,
    json_output: bool,
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("cbordiff".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv)
        && let Cmd::Run(args) = cli.command
    {
        let _ = driver_options(&args, None);
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_foreign(args: &DecoderArgs) -> Result<ForeignDecoder, BridgeError> {
    if args.strict {
        return Ok(ForeignDecoder::builtin_strict());
    }
    match &args.library {
        #[cfg(feature = "dylib")]
        Some(path) => ForeignDecoder::load(path, &args.symbol),
        #[cfg(not(feature = "dylib"))]
        Some(_) => Err(BridgeError::UnknownBuiltin(format!(
            "{} (built without `dylib`, --library unavailable)",
            args.symbol
        ))),
        None => ForeignDecoder::builtin_named(&args.symbol),
    }
}

fn build_oracle(args: &DecoderArgs, bidirectional: bool) -> Result<Oracle, BridgeError> {
    let foreign = build_foreign(args)?;
    let direction = if bidirectional {
        Direction::Bidirectional
    } else {
        Direction::ReferenceLowerBound
    };
    Ok(Oracle::new(Box::new(ReferenceDecoder::default()), Box::new(foreign)).with_direction(direction))
}

/// Arguments that make a `trial` child load the same foreign decoder.
fn child_args(args: &DecoderArgs) -> Vec<OsString> {
    let mut out: Vec<OsString> = vec!["trial".into()];
    if args.strict {
        out.push("--strict".into());
        return out;
    }
    if let Some(library) = &args.library {
        out.push("--library".into());
        out.push(library.clone().into_os_string());
    }
    out.push("--symbol".into());
    out.push(args.symbol.clone().into());
    out
}

/// `exe` is the program re-invoked for isolated trials.
fn driver_options(args: &RunArgs, exe: Option<PathBuf>) -> DriverOptions {
    let isolation = match exe {
        Some(program) if args.isolate => Isolation::Subprocess(
            ChildTrial::new(program, child_args(&args.decoder)).with_timeout(args.timeout),
        ),
        _ => Isolation::InProcess,
    };
    DriverOptions {
        budget: Budget {
            max_trials: args.max_trials,
            max_time: args.max_time,
        },
        keep_going: args.keep_going,
        isolation,
    }
}

// ---------------------------------------------------------------------------
// Run command
// ---------------------------------------------------------------------------

fn cmd_run(args: &RunArgs, globals: &Globals) -> i32 {
    let oracle = match build_oracle(&args.decoder, args.bidirectional) {
        Ok(oracle) => oracle,
        Err(e) => {
            eprintln!("cbordiff: {e}");
            return ExitCode::Error.code();
        }
    };

    let mut seeds = corpus::builtin_seeds();
    seeds.extend(corpus::regression_seeds());
    for dir in &args.corpus {
        match corpus::load_dir(dir) {
            Ok(loaded) => seeds.extend(loaded),
            Err(e) => {
                eprintln!("cbordiff: corpus: {e}");
                return ExitCode::Error.code();
            }
        }
    }

    if !args.skip_sanity
        && let Err(e) = corpus::sanity_check(&oracle, &seeds)
    {
        eprintln!("cbordiff: setup failure: {e}");
        return ExitCode::Setup.code();
    }

    let failures = match FailureCorpus::open(&args.failures) {
        Ok(failures) => failures,
        Err(e) => {
            eprintln!("cbordiff: failure corpus: {e}");
            return ExitCode::Error.code();
        }
    };
    let mut pool = seeds.clone();
    match failures.entries() {
        Ok(known) => pool.extend(known),
        Err(e) => {
            eprintln!("cbordiff: failure corpus: {e}");
            return ExitCode::Error.code();
        }
    }

    let exe = if args.isolate {
        match std::env::current_exe() {
            Ok(exe) => Some(exe),
            Err(e) => {
                eprintln!("cbordiff: cannot locate own executable for --isolate: {e}");
                return ExitCode::Error.code();
            }
        }
    } else {
        None
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    log::info!("mutation seed {seed}");
    let max_len = usize::try_from(args.max_len).unwrap_or(usize::MAX);
    let driver = FuzzDriver::new(&oracle, seeds, driver_options(args, exe))
        .with_failure_corpus(failures);
    install_cancel_handler();

    let result = run_driver(&driver, &pool, seed, max_len, args, &CANCEL);
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("cbordiff: {e}");
            return ExitCode::Error.code();
        }
    };

    for finding in &summary.findings {
        eprintln!("cbordiff: {finding}");
    }
    if !globals.quiet {
        eprintln!(
            "cbordiff: {} trials, {} agreements, {} divergences, {} instabilities ({})",
            summary.trials,
            summary.agreements,
            summary.divergences(),
            summary.instabilities(),
            summary.stop.as_str()
        );
    }
    if globals.json_output {
        print_json(&summary_json(&summary, seed));
    }
    summary.exit_code().code()
}

/// First Ctrl-C stops the run after the current trial, keeping the summary
/// and exit code. A second one exits immediately.
fn install_cancel_handler() {
    let installed = ctrlc::set_handler(|| {
        if CANCEL.swap(true, Ordering::SeqCst) {
            process::exit(INTERRUPTED);
        }
        eprintln!("\ncbordiff: interrupted, finishing current trial (Ctrl-C again to abort)");
    });
    if let Err(e) = installed {
        log::warn!("cannot install Ctrl-C handler: {e}");
    }
}

#[cfg(feature = "parallel")]
fn run_driver(
    driver: &FuzzDriver<'_>,
    pool: &[SeedEntry],
    seed: u64,
    max_len: usize,
    args: &RunArgs,
    cancel: &AtomicBool,
) -> Result<RunSummary, crate::driver::DriverError> {
    if args.workers > 1 {
        return driver.run_parallel(
            args.workers,
            |i| Mutator::from_seeds(pool, seed.wrapping_add(i as u64)).with_max_len(max_len),
            cancel,
        );
    }
    let mut source = Mutator::from_seeds(pool, seed).with_max_len(max_len);
    driver.run(&mut source, cancel)
}

#[cfg(not(feature = "parallel"))]
fn run_driver(
    driver: &FuzzDriver<'_>,
    pool: &[SeedEntry],
    seed: u64,
    max_len: usize,
    _args: &RunArgs,
    cancel: &AtomicBool,
) -> Result<RunSummary, crate::driver::DriverError> {
    let mut source = Mutator::from_seeds(pool, seed).with_max_len(max_len);
    driver.run(&mut source, cancel)
}

fn summary_json(summary: &RunSummary, seed: u64) -> serde_json::Value {
    let findings: Vec<_> = summary
        .findings
        .iter()
        .map(|f| {
            serde_json::json!({
                "kind": f.label(),
                "input": to_hex(f.input()),
            })
        })
        .collect();
    serde_json::json!({
        "command": "run",
        "seed": seed,
        "trials": summary.trials,
        "agreements": summary.agreements,
        "divergences": summary.divergences(),
        "instabilities": summary.instabilities(),
        "elapsed_ms": summary.elapsed.as_millis() as u64,
        "stop": summary.stop.as_str(),
        "findings": findings,
        "exit_code": summary.exit_code().code(),
    })
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => eprintln!("{text}"),
        Err(e) => eprintln!("cbordiff: json: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Sanity / check / trial
// ---------------------------------------------------------------------------

fn cmd_sanity(args: &DecoderArgs, globals: &Globals) -> i32 {
    let oracle = match build_oracle(args, false) {
        Ok(oracle) => oracle,
        Err(e) => {
            eprintln!("cbordiff: {e}");
            return ExitCode::Error.code();
        }
    };
    let seeds = corpus::builtin_seeds();
    let (code, checked) = match corpus::sanity_check(&oracle, &seeds) {
        Ok(report) => {
            if !globals.quiet {
                eprintln!(
                    "cbordiff: sanity pass ok: {} seeds, {} and {}",
                    report.checked,
                    oracle.reference().name(),
                    oracle.foreign().name()
                );
            }
            (ExitCode::Pass, report.checked)
        }
        Err(e) => {
            eprintln!("cbordiff: setup failure: {e}");
            (ExitCode::Setup, 0)
        }
    };
    if globals.json_output {
        print_json(&serde_json::json!({
            "command": "sanity",
            "foreign": oracle.foreign().name(),
            "checked": checked,
            "exit_code": code.code(),
        }));
    }
    code.code()
}

fn cmd_check(args: &CheckArgs, globals: &Globals) -> i32 {
    let input = match (&args.hex, &args.file) {
        (Some(hex), _) => match parse_hex(hex) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("cbordiff: --hex: {e}");
                return ExitCode::Error.code();
            }
        },
        (None, Some(path)) => match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("cbordiff: {}: {e}", path.display());
                return ExitCode::Error.code();
            }
        },
        (None, None) => {
            eprintln!("cbordiff: check needs a file or --hex");
            return ExitCode::Error.code();
        }
    };
    let oracle = match build_oracle(&args.decoder, args.bidirectional) {
        Ok(oracle) => oracle,
        Err(e) => {
            eprintln!("cbordiff: {e}");
            return ExitCode::Error.code();
        }
    };

    let trial = oracle.trial(&input);
    let verdict = oracle.judge(&input, trial.reference, trial.foreign);
    let (label, code) = match &verdict {
        Verdict::Agree => ("agree", ExitCode::Pass),
        Verdict::Divergent(record) => (record.kind.label(), ExitCode::Divergence),
    };

    if !globals.quiet {
        println!("input:     {}", to_hex(&input));
        println!("reference: {}", trial.reference);
        println!("foreign:   {} ({})", trial.foreign, oracle.foreign().name());
        println!("verdict:   {label}");
    }
    if let Verdict::Divergent(record) = verdict {
        eprintln!("cbordiff: {}", Finding::Divergence(record));
    }
    if globals.json_output {
        print_json(&serde_json::json!({
            "command": "check",
            "input": to_hex(&input),
            "reference": trial.reference.as_str(),
            "foreign": trial.foreign.as_str(),
            "verdict": label,
            "exit_code": code.code(),
        }));
    }
    code.code()
}

fn cmd_trial(args: &DecoderArgs) -> i32 {
    let foreign = match build_foreign(args) {
        Ok(foreign) => foreign,
        Err(e) => {
            eprintln!("cbordiff: {e}");
            return ExitCode::Error.code();
        }
    };
    match isolate::run_child(&foreign, io::stdin().lock()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("cbordiff: stdin: {e}");
            ExitCode::Error.code()
        }
    }
}

// ---------------------------------------------------------------------------
// Corpus / config
// ---------------------------------------------------------------------------

fn print_entries(section: &str, entries: &[SeedEntry]) {
    println!("{section}:");
    for entry in entries {
        let expect = entry.expect.map_or("-", |o| o.as_str());
        println!("  {:<24} {:<9} {}", entry.name, expect, to_hex(&entry.bytes));
    }
}

fn cmd_corpus(args: &CorpusArgs) -> i32 {
    print_entries("builtin", &corpus::builtin_seeds());
    print_entries("regression", &corpus::regression_seeds());
    for dir in &args.corpus {
        match corpus::load_dir(dir) {
            Ok(entries) => print_entries(&dir.display().to_string(), &entries),
            Err(e) => {
                eprintln!("cbordiff: corpus: {e}");
                return ExitCode::Error.code();
            }
        }
    }
    // A missing failure corpus just means nothing has failed yet.
    if args.failures.is_dir() {
        match corpus::load_dir(&args.failures) {
            Ok(entries) => print_entries(&args.failures.display().to_string(), &entries),
            Err(e) => {
                eprintln!("cbordiff: failure corpus: {e}");
                return ExitCode::Error.code();
            }
        }
    }
    ExitCode::Pass.code()
}

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("cbordiff version {version}");

    let dylib = cfg!(feature = "dylib") as u8;
    let file_io = cfg!(feature = "file-io") as u8;
    let parallel = cfg!(feature = "parallel") as u8;

    eprintln!("DYLIB={dylib}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("PARALLEL={parallel}");
    eprintln!("SYMBOL={}", ffi::SYMBOL);
    eprintln!("SYMBOL_STRICT={}", ffi::SYMBOL_STRICT);
    eprintln!("MAX_NESTING_LEVEL={MAX_NESTING_LEVEL}");
    eprintln!("REFERENCE_DEPTH={DEFAULT_REFERENCE_DEPTH}");
    eprintln!("DEFAULT_MAX_LEN={DEFAULT_MAX_LEN}");
    eprintln!("DEFAULT_TIMEOUT={DEFAULT_TIMEOUT:?}");
    eprintln!("DEFAULT_FAILURES_DIR={DEFAULT_FAILURES_DIR}");

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn log_filter(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    }
}

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.quiet, cli.verbose)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let globals = Globals {
        quiet: cli.quiet,
        json_output: cli.json_output,
    };

    let exit_code = match &cli.command {
        Cmd::Run(args) => cmd_run(args, &globals),
        Cmd::Sanity(args) => cmd_sanity(args, &globals),
        Cmd::Check(args) => cmd_check(args, &globals),
        Cmd::Trial(args) => cmd_trial(args),
        Cmd::Corpus(args) => cmd_corpus(args),
        Cmd::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
