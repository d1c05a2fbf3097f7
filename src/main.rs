fn main() {
    #[cfg(feature = "cli")]
    cbordiff::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("cbordiff: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
