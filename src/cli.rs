// Command-line interface for crossrep.
//
// Two subcommands share the core engine: `scatter` builds the fingerprint
// map from the reference stream, `gather` probes it with the test stream.
// Parameter values that shape the map (shingle length, moduli, batch size)
// must be identical across the two invocations; the map file name encodes
// the distinguishing pair (M_DIV, L) so mismatches fail fast.

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::config::{DV_MAX, FilterConfig};
use crate::io::{self, GatherStats, ScatterStats};

// ---------------------------------------------------------------------------
// Byte size parsing
// ---------------------------------------------------------------------------

/// Parse a byte count with an optional binary-scale suffix: `k`/`K` (2^10),
/// `m`/`M` (2^20), `g`/`G` (2^30). Stream lengths and batch sizes on the
/// command line go through this.
fn parse_byte_size(arg: &str) -> Result<u64, String> {
    let arg = arg.trim();
    let (digits, shift) = match arg.char_indices().last() {
        None => return Err("empty size".to_string()),
        Some((i, 'k' | 'K')) => (&arg[..i], 10u32),
        Some((i, 'm' | 'M')) => (&arg[..i], 20),
        Some((i, 'g' | 'G')) => (&arg[..i], 30),
        Some(_) => (arg, 0),
    };
    let count: u64 = digits
        .trim_end()
        .parse()
        .map_err(|e| format!("bad size '{arg}': {e}"))?;
    count
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("size '{arg}' does not fit in 64 bits"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Probabilistic cross-repetition filter over byte streams.
#[derive(Parser, Debug)]
#[command(
    name = "crossrep",
    version,
    about = "Cross-repetition filter: scatter a reference map, gather test candidates",
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

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build the fingerprint map from the reference stream.
    Scatter(ScatterArgs),
    /// Probe the map with the test stream and report surviving positions.
    Gather(GatherArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct FilterParamArgs {
    /// Shingle length L in bytes.
    #[arg(long = "shingle-length", default_value_t = 5)]
    shingle_length: usize,

    /// Minimum reported common-substring length LP (>= shingle length).
    /// Only gather probes runs, but both stages must be launched with the
    /// same parameter set.
    #[arg(long = "prefix-length", default_value_t = 10)]
    prefix_length: usize,

    /// Common-hash modulus.
    #[arg(long = "common-modulus", default_value_t = 1_000_000_007)]
    common_modulus: u64,

    /// Diversified-hash modulus (must fit in a byte).
    #[arg(long = "diversity-modulus", default_value_t = 67)]
    diversity_modulus: u64,

    /// Shingle slots per pipeline batch.
    #[arg(long = "batch-size", value_parser = parse_byte_size, default_value = "8K")]
    batch_size: u64,

    /// Inject the diagnostic demo-string span (alters stream contents!).
    #[arg(long)]
    demo: bool,
}

#[derive(Args, Debug)]
struct ScatterArgs {
    /// Master file holding reference + test streams.
    #[arg(long = "master-path", value_hint = ValueHint::FilePath)]
    master_path: PathBuf,

    /// Map file prefix; "_<M_DIV>_<L>.map" is appended.
    #[arg(long = "map-path", value_hint = ValueHint::AnyPath)]
    map_path: PathBuf,

    /// Reference stream length ns (supports K/M/G suffix).
    #[arg(long = "reference-length", value_parser = parse_byte_size)]
    reference_length: u64,

    #[command(flatten)]
    params: FilterParamArgs,
}

#[derive(Args, Debug)]
struct GatherArgs {
    /// Master file holding reference + test streams.
    #[arg(long = "master-path", value_hint = ValueHint::FilePath)]
    master_path: PathBuf,

    /// Map file prefix; "_<M_DIV>_<L>.map" is appended.
    #[arg(long = "map-path", value_hint = ValueHint::AnyPath)]
    map_path: PathBuf,

    /// Reference stream length ns (supports K/M/G suffix).
    #[arg(long = "reference-length", value_parser = parse_byte_size)]
    reference_length: u64,

    /// Test stream length NS (supports K/M/G suffix).
    #[arg(long = "test-length", value_parser = parse_byte_size)]
    test_length: u64,

    #[command(flatten)]
    params: FilterParamArgs,
}

fn build_config(params: &FilterParamArgs, reference_length: u64) -> FilterConfig {
    FilterConfig {
        shingle_len: params.shingle_length,
        prefix_len: params.prefix_length,
        common_modulus: params.common_modulus,
        div_modulus: params.diversity_modulus,
        reference_len: reference_length,
        batch_size: params.batch_size as usize,
        ..FilterConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Banner and stats output
// ---------------------------------------------------------------------------

fn print_banner(title: &str, cfg: &FilterConfig, master_path: &Path, map_path: &Path) {
    println!();
    println!("{title}");
    println!("{}", "=".repeat(title.len()));
    println!("master file           : {}", master_path.display());
    println!("map    file           : {}", map_path.display());
    println!("reference length ns   : {}", cfg.reference_len);
    if cfg.test_len > 0 {
        println!("test      length NS   : {}", cfg.test_len);
        println!("prefix  length LP     : {}", cfg.prefix_len);
    }
    println!("shingle length L      : {}", cfg.shingle_len);
    println!("carry   length LC     : {}", cfg.carry_len());
    println!("batch size            : {}", cfg.batch_size);
    println!("common modulus        : {}", cfg.common_modulus);
    println!("diversity modulus     : {}", cfg.div_modulus);
    if cfg.test_len > 0 {
        // Expected cross repetitions of length LP in random data.
        let ecr = (1.0f64 / 256.0).powi(cfg.prefix_len as i32)
            * cfg.reference_len as f64
            * cfg.test_len as f64;
        println!("expected cross repetitions of length LP:");
        println!(" - Ecr(sxS, LP)       : {ecr:14.1}");
        println!(" - Ecr(sxS, LP) / NS  : {:14.9}", ecr / cfg.test_len as f64);
    }
    println!();
}

fn print_scatter_stats(stats: &ScatterStats, verbose: u8) {
    println!("map setup_time        : {}", stats.setup_time);
    println!("map written           : {}", stats.map_path.display());
    if verbose > 0 {
        println!("shingles recorded     : {}", stats.shingles);
        println!("batches               : {}", stats.batches);
        println!("map length            : {}", stats.map_len);
    }
    println!("elapsed               : {} ms", stats.elapsed.as_millis());
}

fn print_gather_stats(stats: &GatherStats, verbose: u8) {
    println!("results");
    println!("-------");
    println!(
        "longest residual substring(s)  : {} bytes (upper limit)",
        stats.longest_candidate
    );
    println!("number of residual substrings  : {} (residue)", stats.residue);
    println!("filtration ratio :");
    println!(" - measured               : {:13.9} (residue / shingles)", stats.filtration_ratio);
    println!(" - expected optimum       : {:13.9}", stats.expected_ratio);
    if verbose > 0 {
        println!("shingles checked          : {}", stats.shingles);
        println!("batches                   : {}", stats.batches);
        println!("map setup_time            : {}", stats.setup_time);
    }
    println!("elapsed                   : {} ms", stats.elapsed.as_millis());
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_scatter(args: &ScatterArgs, quiet: bool, verbose: u8, json: bool) -> i32 {
    let cfg = build_config(&args.params, args.reference_length);
    let map_path = io::map_file_name(&args.map_path, &cfg);

    if !quiet {
        print_banner("scatter", &cfg, &args.master_path, &map_path);
    }

    match io::scatter_file(&cfg, &args.master_path, &args.map_path, args.params.demo) {
        Ok(stats) => {
            if !quiet {
                print_scatter_stats(&stats, verbose);
            }
            if json {
                let json = serde_json::json!({
                    "command": "scatter",
                    "map_path": stats.map_path.display().to_string(),
                    "setup_time": stats.setup_time,
                    "shingles": stats.shingles,
                    "batches": stats.batches,
                    "map_len": stats.map_len,
                    "elapsed_ms": stats.elapsed.as_millis() as u64,
                });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
            }
            0
        }
        Err(e) => {
            eprintln!("crossrep: scatter: {e}");
            e.exit_code()
        }
    }
}

fn cmd_gather(args: &GatherArgs, quiet: bool, verbose: u8, json: bool) -> i32 {
    let mut cfg = build_config(&args.params, args.reference_length);
    cfg.test_len = args.test_length;
    let map_path = io::map_file_name(&args.map_path, &cfg);

    if !quiet {
        print_banner("gather", &cfg, &args.master_path, &map_path);
    }

    match io::gather_file(&cfg, &args.master_path, &args.map_path, args.params.demo) {
        Ok(stats) => {
            if !quiet {
                print_gather_stats(&stats, verbose);
            }
            if json {
                let json = serde_json::json!({
                    "command": "gather",
                    "map_path": stats.map_path.display().to_string(),
                    "residue": stats.residue,
                    "max_count": stats.max_count,
                    "longest_candidate": stats.longest_candidate,
                    "shingles": stats.shingles,
                    "batches": stats.batches,
                    "filtration_ratio": stats.filtration_ratio,
                    "expected_ratio": stats.expected_ratio,
                    "elapsed_ms": stats.elapsed.as_millis() as u64,
                });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
            }
            0
        }
        Err(e) => {
            eprintln!("crossrep: gather: {e}");
            e.exit_code()
        }
    }
}

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("crossrep version {version} (Rust), Copyright (C) crossrep contributors");
    eprintln!("Licensed under the Apache License, Version 2.0");

    let defaults = FilterConfig::default();
    let ptr_size = std::mem::size_of::<*const ()>();
    eprintln!("DV_MAX={DV_MAX}");
    eprintln!("DEFAULT_SHINGLE_LENGTH={}", defaults.shingle_len);
    eprintln!("DEFAULT_PREFIX_LENGTH={}", defaults.prefix_len);
    eprintln!("DEFAULT_COMMON_MODULUS={}", defaults.common_modulus);
    eprintln!("DEFAULT_COMMON_BASE={}", defaults.common_base);
    eprintln!("DEFAULT_DIVERSITY_MODULUS={}", defaults.div_modulus);
    eprintln!("DEFAULT_BATCH_SIZE={}", defaults.batch_size);
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;
    let verbose = cli.verbose.min(2);
    let json = cli.json_output;

    let exit_code = match &cli.command {
        Cmd::Scatter(args) => cmd_scatter(args, quiet, verbose, json),
        Cmd::Gather(args) => cmd_gather(args, quiet, verbose, json),
        Cmd::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
