fn main() {
    #[cfg(feature = "cli")]
    crossrep::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("crossrep: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
