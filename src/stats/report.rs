//! Run summary written as `--report` JSON

use crate::error::{Result, TfceError};
use crate::structs::{PermutationConfig, Tail, TestOutcome, TfceThreshold};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Machine-readable summary of one conversion
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub input: String,
    pub output: String,
    pub n_cases: usize,
    pub n_samples: usize,
    pub tail: Tail,
    pub threshold: TfceThreshold,
    pub n_permutations: usize,
    pub exact: bool,
    pub seed: Option<u64>,
    pub alpha: f64,
    pub n_significant: usize,
    pub min_pvalue: Option<f64>,
}

impl RunReport {
    #[must_use]
    pub fn new(
        input: &Path,
        output: &Path,
        (n_cases, n_samples): (usize, usize),
        config: &PermutationConfig,
        outcome: &TestOutcome,
        alpha: f64,
    ) -> Self {
        Self {
            input: input.display().to_string(),
            output: output.display().to_string(),
            n_cases,
            n_samples,
            tail: config.tail,
            threshold: config.threshold,
            n_permutations: outcome.n_permutations(),
            exact: outcome.exact,
            seed: config.seed,
            alpha,
            n_significant: outcome.significant_count(alpha),
            min_pvalue: outcome.min_pvalue(),
        }
    }

    /// One-line description for the log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} of {} samples significant at alpha={} (min p={}, {} permutations{})",
            self.n_significant,
            self.n_samples,
            self.alpha,
            self.min_pvalue
                .map_or_else(|| "n/a".to_string(), |p| format!("{p:.4}")),
            self.n_permutations,
            if self.exact { ", exact" } else { "" }
        )
    }
}

/// Fail early if the report could not be written later
///
/// # Errors
/// Returns error if `path` is a directory or its parent directory is missing
pub fn check_report_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Err(TfceError::Config(format!(
            "report path {} is a directory",
            path.display()
        )));
    }
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Err(TfceError::Config(format!(
            "report directory {} does not exist",
            parent.display()
        )));
    }
    Ok(())
}

/// Write the report as pretty JSON
///
/// # Errors
/// Returns error if serialization fails or the file cannot be written
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    Ok(())
}
