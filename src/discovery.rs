use crate::classifier::InclusionClassifier;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Sorts paths in ascending lexicographic order of their textual form and
/// drops duplicates.
pub fn ordered_set<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut keyed: Vec<(String, PathBuf)> = paths
        .into_iter()
        .map(Into::into)
        .map(|p: PathBuf| (p.to_string_lossy().replace('\\', "/"), p))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    keyed.into_iter().map(|(_, p)| p).collect()
}

/// Walks `root` and returns every file the classifier would process.
/// Rejected directories are pruned rather than descended into, and nothing
/// deeper than `max_depth` levels below the root is visited.
pub fn collect_candidates(root: &Path, classifier: &InclusionClassifier, max_depth: usize) -> Vec<PathBuf> {
    debug!(
        "Collecting candidates under {} (max depth {})",
        root.display(),
        max_depth
    );

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let keep = classifier.classify(entry.path(), true, 0).included;
            if !keep {
                trace!("Pruning directory: {}", entry.path().display());
            }
            keep
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let result = classifier.classify(entry.path(), false, size);
        if result.is_processable() {
            trace!("Auto selecting: {}", entry.path().display());
            files.push(entry.into_path());
        }
    }

    let files = ordered_set(files);
    debug!("Total auto-selected files: {}", files.len());
    files
}
