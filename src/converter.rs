//! MAT-file in, cluster p-values out

use crate::error::Result;
use crate::mat::{read_variable, MatWriter};
use crate::structs::{ClusterTest, TestOutcome};
use std::path::Path;

/// Input matrix, cases x samples
pub const INPUT_VARIABLE: &str = "testVals";
/// Cluster p-values, written as a column vector
pub const OUTPUT_VARIABLE: &str = "cluster_pv";
/// Signed TFCE statistic, written with `include_stats`
pub const STAT_VARIABLE: &str = "T_obs";
/// Permutation distribution, written with `include_stats`
pub const NULL_VARIABLE: &str = "H0";

/// Output options that do not affect the test itself
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    pub compress: bool,
    pub include_stats: bool,
}

/// What a conversion produced
#[derive(Debug, Clone)]
pub struct ConvertSummary {
    pub n_cases: usize,
    pub n_samples: usize,
    pub outcome: TestOutcome,
}

/// Load `testVals` from `input`, run `test`, and write `cluster_pv` to `output`
///
/// The output file is only created once the test has succeeded.
///
/// # Errors
/// Returns error if the input cannot be read or lacks `testVals`, the test
/// fails, or the output cannot be written
pub fn convert(
    input: &Path,
    output: &Path,
    test: &dyn ClusterTest,
    options: &ConvertOptions,
) -> Result<ConvertSummary> {
    let data = read_variable(input, INPUT_VARIABLE)?;
    let (n_cases, n_samples) = data.dim();
    tracing::info!(
        "loaded '{INPUT_VARIABLE}' from {}: {n_cases} cases x {n_samples} samples",
        input.display()
    );

    let outcome = test.run(data.view())?;

    let mut writer = MatWriter::new(options.compress);
    writer.add_column(OUTPUT_VARIABLE, outcome.cluster_pv.view())?;
    if options.include_stats {
        writer.add_column(STAT_VARIABLE, outcome.t_obs.view())?;
        writer.add_column(NULL_VARIABLE, outcome.h0.view())?;
    }
    writer.write_to(output)?;
    tracing::info!(
        "wrote {} p-values to {}",
        outcome.cluster_pv.len(),
        output.display()
    );

    Ok(ConvertSummary {
        n_cases,
        n_samples,
        outcome,
    })
}
