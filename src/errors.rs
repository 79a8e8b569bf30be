use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Configuration load failed: {0}")]
    ConfigLoad(String),

    #[error("No files to process. Please check your selection or the extension configuration.")]
    EmptyCandidateSet,

    #[error("Could not open file: {} - {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No content produced. Every processed file was empty.")]
    EmptyArtifact,

    #[error("Invalid ignore pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("IO Error: {0}")]
    IoError(String),

    #[error("Output error: {0}")]
    OutputError(String),

    #[error("Watch Error: {0}")]
    WatchError(String),

    #[error("Tokenizer Error: {0}")]
    TokenizerError(String),

    #[error("Processing worker failed: {0}")]
    WorkerFailed(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl ProcessorError {
    /// True for the failures that abort a job mid-flight, as opposed to
    /// the ones raised before any file was read.
    pub fn is_read_failure(&self) -> bool {
        matches!(self, ProcessorError::FileRead { .. })
    }
}

impl From<std::io::Error> for ProcessorError {
    fn from(err: std::io::Error) -> Self {
        ProcessorError::IoError(err.to_string())
    }
}
