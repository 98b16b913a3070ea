use thiserror::Error;

/// Failures of the region pipeline. All of them abort the run.
#[derive(Debug, Error)]
pub enum CpvError {
    /// The inputs break the sorted, aligned, non-empty contract
    #[error("input contract violation: {0}")]
    InputContract(String),

    /// A malformed line in one of the tab-separated inputs
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// A correlation matrix that cannot be factored or combined
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CpvError>;
