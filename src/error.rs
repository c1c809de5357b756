use thiserror::Error;

#[derive(Error, Debug)]
pub enum TfceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MAT-file format error: {0}")]
    MatFormat(String),

    #[error("variable '{name}' not found in MAT-file (found: {available})")]
    MissingVariable { name: String, available: String },

    #[error("Invalid input data: {0}")]
    InvalidData(String),

    #[error("Permutation test error: {0}")]
    Computation(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TfceError>;
