use crate::errors::ProcessorError;
use crate::job::AggregatedArtifact;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Formats a byte count as `bytes`, `KB`, `MB` or `GB`.
pub fn format_file_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["bytes", "KB", "MB", "GB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", size, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// `<root-dir-name>_processed.txt`, or `processed.txt` for a nameless root.
pub fn default_output_name(root: &Path) -> String {
    match root.file_name() {
        Some(name) => format!("{}_processed.txt", name.to_string_lossy()),
        None => "processed.txt".to_string(),
    }
}

#[async_trait]
pub trait ArtifactSink {
    async fn write_artifact(&self, artifact: &AggregatedArtifact) -> Result<(), ProcessorError>;
}

/// Writes the artifact to a file, replacing any previous contents.
pub struct FileSink {
    path: PathBuf,
    bom: bool,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink {
            path: path.into(),
            bom: false,
        }
    }

    pub fn with_bom(mut self, bom: bool) -> Self {
        self.bom = bom;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ArtifactSink for FileSink {
    async fn write_artifact(&self, artifact: &AggregatedArtifact) -> Result<(), ProcessorError> {
        let map_err = |e: std::io::Error| {
            ProcessorError::OutputError(format!("could not save {}: {}", self.path.display(), e))
        };
        let mut file = tokio::fs::File::create(&self.path).await.map_err(map_err)?;
        if self.bom {
            file.write_all(UTF8_BOM).await.map_err(map_err)?;
        }
        file.write_all(artifact.text.as_bytes()).await.map_err(map_err)?;
        file.flush().await.map_err(map_err)?;
        info!(
            "Saved {} files ({}) to {}",
            artifact.file_count,
            format_file_size(artifact.total_bytes),
            self.path.display()
        );
        Ok(())
    }
}

pub struct StdoutSink;

#[async_trait]
impl ArtifactSink for StdoutSink {
    async fn write_artifact(&self, artifact: &AggregatedArtifact) -> Result<(), ProcessorError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(artifact.text.as_bytes())
            .await
            .map_err(|e| ProcessorError::OutputError(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| ProcessorError::OutputError(e.to_string()))?;
        debug!("Wrote {} bytes to stdout", artifact.text.len());
        Ok(())
    }
}
