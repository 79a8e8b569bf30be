use clap::{Parser, Subcommand};
use codebase_processor::classifier::relative_path;
use codebase_processor::config::DEFAULT_IGNORE_FILE_NAME;
use codebase_processor::discovery::DEFAULT_MAX_DEPTH;
use codebase_processor::logger::initialize_logger;
use codebase_processor::output::{default_output_name, format_file_size, ArtifactSink, FileSink, StdoutSink};
use codebase_processor::reporting::print_stats;
use codebase_processor::{
    AggregatedArtifact, ConfigSource, JobOutcome, JobSubscriber, PolicyStore, ProcessorConfig,
    ProcessorError, RootSession,
};
use std::path::{Path, PathBuf};
use tiktoken_rs::get_bpe_from_model;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    cmd: SubCommands,
}

#[derive(Subcommand, Debug, Clone)]
enum SubCommands {
    /// Pack the qualifying files under a root into one text artifact
    Pack(PackArgs),
    /// Show how each file under a root is classified, without reading it
    Classify(ClassifyArgs),
}

#[derive(Parser, Debug, Clone)]
struct CommonArgs {
    /// Project root to process
    root: PathBuf,
    #[arg(short = 'c', long, env = "CODEBASE_PROCESSOR_CONFIG", help = "JSON policy file")]
    config: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_IGNORE_FILE_NAME)]
    ignore_file: String,
    #[arg(short = 'd', long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

#[derive(Parser, Debug, Clone)]
struct PackArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(short = 'o', long, help = "Output file (defaults to <root-name>_processed.txt)")]
    output: Option<PathBuf>,
    #[arg(long, conflicts_with = "output", help = "Write the artifact to stdout")]
    stdout: bool,
    #[arg(long, help = "Prefix the output file with a UTF-8 byte order mark")]
    bom: bool,
    #[arg(short = 'f', long = "file", help = "Explicit candidate files instead of scanning the root")]
    files: Option<Vec<PathBuf>>,
    #[arg(short = 's', long, default_value = "false")]
    no_stats: bool,
    #[arg(short = 'M', long, default_value = "gpt-4o")]
    model: String,
    #[arg(short = 'y', long, help = "Proceed even if the selection is very large")]
    yes: bool,
}

#[derive(Parser, Debug, Clone)]
struct ClassifyArgs {
    #[command(flatten)]
    common: CommonArgs,
}

/// Mirrors job progress into the log.
struct LogProgress;

impl JobSubscriber for LogProgress {
    fn on_progress(&mut self, current: usize, total: usize) {
        if total > 0 {
            debug!("Progress: {} of {} ({}%)", current, total, current * 100 / total);
        }
    }

    fn on_current_file(&mut self, path: &Path) {
        debug!("Processing file: {}", path.display());
    }

    fn on_statistics(&mut self, processed_count: usize, total_bytes: u64) {
        debug!(
            "Files processed: {}, total size: {}",
            processed_count,
            format_file_size(total_bytes)
        );
    }
}

async fn open_session(common: &CommonArgs) -> Result<RootSession, ProcessorError> {
    let source = match &common.config {
        Some(path) => ConfigSource::File(path.clone()),
        None => ConfigSource::Defaults,
    };
    let store = PolicyStore::new(source);
    let config = ProcessorConfig {
        ignore_file_name: common.ignore_file.clone(),
        max_depth: common.max_depth,
        ..ProcessorConfig::default()
    };
    RootSession::open(&common.root, &store, config).await
}

fn count_tokens(artifact: &AggregatedArtifact, model: &str) -> Result<usize, ProcessorError> {
    let tokenizer =
        get_bpe_from_model(model).map_err(|e| ProcessorError::TokenizerError(e.to_string()))?;
    Ok(tokenizer.encode_ordinary(&artifact.text).len())
}

async fn pack(args: PackArgs) -> Result<(), ProcessorError> {
    let session = open_session(&args.common).await?;
    let candidates = match args.files.clone() {
        Some(files) => files
            .into_iter()
            .map(|f| if f.is_absolute() { f } else { session.root().join(f) })
            .collect(),
        None => session.collect_candidates(),
    };

    let summary = session.preflight(&candidates).await;
    if summary.exceeds(session.config().large_selection_threshold_bytes) && !args.yes {
        return Err(ProcessorError::Cancelled(format!(
            "selection of {} files totals {}; rerun with --yes to proceed",
            summary.file_count(),
            format_file_size(summary.total_size)
        )));
    }

    let handle = session.start_job(candidates).await;
    let outcome = handle
        .drain(&mut LogProgress)
        .await
        .ok_or_else(|| ProcessorError::WorkerFailed("job ended without an outcome".to_string()))?;

    let artifact = match outcome {
        JobOutcome::Completed(artifact) => artifact,
        JobOutcome::Failed { error, .. } => return Err(error),
        JobOutcome::Cancelled { processed_count, .. } => {
            return Err(ProcessorError::Cancelled(format!(
                "stopped after {} files",
                processed_count
            )))
        }
    };

    if args.stdout {
        StdoutSink.write_artifact(&artifact).await?;
    } else {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_output_name(session.root())));
        FileSink::new(path).with_bom(args.bom).write_artifact(&artifact).await?;
    }

    info!(
        "Files processed: {}, total size: {}",
        artifact.file_count,
        format_file_size(artifact.total_bytes)
    );

    if !args.no_stats {
        print_stats(&artifact.files);
        match count_tokens(&artifact, &args.model) {
            Ok(tokens) => info!("Artifact is {} tokens for {}", tokens, args.model),
            Err(e) => warn!("{}", e),
        }
    }
    Ok(())
}

async fn classify(args: ClassifyArgs) -> Result<(), ProcessorError> {
    let session = open_session(&args.common).await?;
    let root = session.root().to_path_buf();
    let classifier = session.classifier();

    let mut included = 0usize;
    let mut total = 0usize;
    for entry in walkdir::WalkDir::new(&root)
        .min_depth(1)
        .max_depth(args.common.max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let result = classifier.classify_file(entry.path()).await;
        if result.is_directory() {
            continue;
        }
        total += 1;
        if result.is_processable() {
            included += 1;
        }
        println!(
            "{}\t{}\t{}",
            if result.included { "+" } else { "-" },
            result.reason,
            relative_path(&result.path, &root)
        );
    }
    info!("{} of {} files would be included", included, total);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();
    initialize_logger();

    let result = match cli_args.cmd {
        SubCommands::Pack(args) => pack(args).await,
        SubCommands::Classify(args) => classify(args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
