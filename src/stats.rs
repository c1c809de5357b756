pub mod permutation;
pub mod report;
pub mod tfce;
pub mod ttest;
