#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args, clippy::module_name_repetitions)]

mod converter;
mod error;
mod mat;
mod stats;
mod structs;

use clap::Parser;
use converter::ConvertOptions;
use error::{Result, TfceError};
use stats::permutation::TfcePermutationTest;
use stats::report::{check_report_path, write_report, RunReport};
use std::path::PathBuf;
use structs::{ClusterTest, PermutationConfig, Tail};
use tracing::Level;

/// Threshold-free cluster permutation test on a MATLAB `testVals` matrix
///
/// Reads `testVals` (cases x samples) from INPUT, runs a one-sample TFCE
/// sign-flip permutation test along the sample axis, and writes the
/// per-sample cluster p-values to OUTPUT as the column vector `cluster_pv`.
#[derive(Parser, Debug)]
#[command(name = "tfce-perm")]
#[command(author, version, about, long_about)]
struct Args {
    /// MAT-file containing `testVals`
    input: PathBuf,

    /// MAT-file to write `cluster_pv` to (overwritten)
    output: PathBuf,

    /// Seed for the permutation RNG (default: OS entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Size of the null distribution, observed data included
    #[arg(short = 'n', long, default_value = "1024")]
    n_permutations: usize,

    /// Which excursions of the t statistic count as evidence
    #[arg(long, value_enum, default_value = "both")]
    tail: Tail,

    /// Worker threads for the permutation loop (default: all cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Write zlib-compressed (v7 style) MAT elements
    #[arg(long)]
    compress: bool,

    /// Also write the signed TFCE statistic `T_obs` and null distribution `H0`
    #[arg(long)]
    include_stats: bool,

    /// Write a JSON run summary to this path; its directory is checked
    /// before OUTPUT is written
    #[arg(long)]
    report: Option<PathBuf>,

    /// Significance level used in the run summary
    #[arg(long, default_value = "0.05")]
    alpha: f64,

    /// Log progress (-v) or decoding detail (-vv) to stderr
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    execute(&args)
}

/// Run the conversion described by `args`
fn execute(args: &Args) -> Result<()> {
    if !(args.alpha > 0.0 && args.alpha <= 1.0) {
        return Err(TfceError::Config(format!(
            "alpha must be in (0, 1], got {}",
            args.alpha
        )));
    }

    if let Some(path) = &args.report {
        check_report_path(path)?;
    }

    // Threshold sweep and adjacency stay at their fixed defaults
    let test = TfcePermutationTest::new(PermutationConfig {
        tail: args.tail,
        n_permutations: args.n_permutations,
        seed: args.seed,
        n_jobs: args.jobs,
        ..PermutationConfig::default()
    })?;

    let options = ConvertOptions {
        compress: args.compress,
        include_stats: args.include_stats,
    };
    let summary = converter::convert(&args.input, &args.output, &test, &options)?;

    let report = RunReport::new(
        &args.input,
        &args.output,
        (summary.n_cases, summary.n_samples),
        test.config(),
        &summary.outcome,
        args.alpha,
    );
    tracing::info!("{}", report.summary());
    if let Some(path) = &args.report {
        write_report(path, &report)?;
        tracing::info!("report written to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_two_paths() {
        assert!(Args::try_parse_from(["tfce-perm"]).is_err());
        assert!(Args::try_parse_from(["tfce-perm", "in.mat"]).is_err());
    }

    #[test]
    fn test_defaults_match_fixed_invocation() {
        let args = Args::try_parse_from(["tfce-perm", "in.mat", "out.mat"]).expect("parse");
        assert_eq!(args.input, PathBuf::from("in.mat"));
        assert_eq!(args.output, PathBuf::from("out.mat"));
        assert_eq!(args.n_permutations, 1024);
        assert_eq!(args.tail, Tail::Both);
        assert!(args.seed.is_none());
        assert!(!args.compress);
        assert!(!args.include_stats);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_options() {
        let args = Args::try_parse_from([
            "tfce-perm",
            "in.mat",
            "out.mat",
            "--seed",
            "7",
            "-n",
            "500",
            "--tail",
            "upper",
            "-j",
            "2",
            "--compress",
            "--include-stats",
            "-vv",
        ])
        .expect("parse");
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.n_permutations, 500);
        assert_eq!(args.tail, Tail::Upper);
        assert_eq!(args.jobs, Some(2));
        assert!(args.compress);
        assert!(args.include_stats);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_bad_report_path_writes_nothing() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let input = dir.path().join("in.mat");
        let output = dir.path().join("out.mat");
        let mut writer = mat::MatWriter::new(false);
        writer
            .add_matrix(
                "testVals",
                ndarray::array![[0.5, 1.0], [1.5, 0.2], [0.9, 0.7]].view(),
            )
            .expect("add");
        writer.write_to(&input).expect("write");

        let report = dir.path().join("missing").join("report.json");
        let args = Args::try_parse_from([
            "tfce-perm",
            input.to_str().expect("utf8"),
            output.to_str().expect("utf8"),
            "--report",
            report.to_str().expect("utf8"),
        ])
        .expect("parse");

        assert!(matches!(execute(&args), Err(TfceError::Config(_))));
        assert!(!output.exists());
    }
}
