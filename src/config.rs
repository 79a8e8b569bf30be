use crate::discovery::DEFAULT_MAX_DEPTH;
use crate::job::LARGE_SELECTION_THRESHOLD_BYTES;
use crate::scheduler::DEFAULT_SHUTDOWN_GRACE;
use std::time::Duration;

pub const DEFAULT_IGNORE_FILE_NAME: &str = ".gitignore";

/// Runtime knobs for a root session and the jobs it starts.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub ignore_file_name: String,
    pub max_depth: usize,
    pub shutdown_grace: Duration,
    pub yield_between_files: bool,
    pub large_selection_threshold_bytes: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            ignore_file_name: DEFAULT_IGNORE_FILE_NAME.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            yield_between_files: true,
            large_selection_threshold_bytes: LARGE_SELECTION_THRESHOLD_BYTES,
        }
    }
}
