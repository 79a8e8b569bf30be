pub mod classifier;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod ignore;
pub mod job;
pub mod logger;
pub mod output;
pub mod policy;
pub mod reporting;
pub mod scheduler;
pub mod session;
pub mod trie;
pub mod watch;

pub use classifier::{classify, ClassificationReason, ClassificationResult, InclusionClassifier};
pub use config::ProcessorConfig;
pub use errors::ProcessorError;
pub use ignore::{IgnorePattern, IgnorePatterns, PatternSource};
pub use job::{
    AggregatedArtifact, AggregationJob, JobEvent, JobHandle, JobOutcome, JobState, JobSubscriber,
    JobSupervisor,
};
pub use policy::{ConfigSource, Policy, PolicyStore};
pub use scheduler::JobScheduler;
pub use session::RootSession;
