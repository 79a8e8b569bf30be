use crate::ignore::IgnorePatterns;
use crate::policy::Policy;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationReason {
    ExcludedDirectory,
    IgnoredByPattern,
    TooLarge,
    ExtensionNotAllowed,
    Directory,
    Allowed,
}

impl fmt::Display for ClassificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ClassificationReason::ExcludedDirectory => "excluded directory",
            ClassificationReason::IgnoredByPattern => "ignored by pattern",
            ClassificationReason::TooLarge => "too large",
            ClassificationReason::ExtensionNotAllowed => "extension not allowed",
            ClassificationReason::Directory => "directory",
            ClassificationReason::Allowed => "allowed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub path: PathBuf,
    pub included: bool,
    pub reason: ClassificationReason,
    pub size_bytes: u64,
}

impl ClassificationResult {
    pub fn is_directory(&self) -> bool {
        self.reason == ClassificationReason::Directory
    }

    /// Included and not a directory: the file will be read by a job.
    pub fn is_processable(&self) -> bool {
        self.included && !self.is_directory()
    }
}

/// Root-relative form of `path` with `/` separators. Paths outside the
/// root climb out of it with `..` segments; a path sharing no prefix with
/// the root at all is returned whole.
pub fn relative_path(path: &Path, root: &Path) -> String {
    if let Ok(relative) = path.strip_prefix(root) {
        return relative.to_string_lossy().replace('\\', "/");
    }

    let path_parts: Vec<Component> = path.components().collect();
    let root_parts: Vec<Component> = root.components().collect();
    let common = path_parts
        .iter()
        .zip(&root_parts)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return path.to_string_lossy().replace('\\', "/");
    }

    let mut segments: Vec<String> = vec!["..".to_string(); root_parts.len() - common];
    segments.extend(
        path_parts[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    segments.join("/")
}

/// Lower-cased text after the last `.` of the file name, empty if none.
pub fn file_extension(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
        .unwrap_or_default()
}

/// Decides whether a single path qualifies. The rules apply in a fixed
/// order and the first one that fires wins.
pub fn classify(
    path: &Path,
    root: &Path,
    policy: &Policy,
    patterns: &IgnorePatterns,
    is_directory: bool,
    size_bytes: u64,
) -> ClassificationResult {
    let relative = relative_path(path, root);
    let result = |included: bool, reason: ClassificationReason| ClassificationResult {
        path: path.to_path_buf(),
        included,
        reason,
        size_bytes,
    };

    if relative
        .split('/')
        .any(|segment| policy.is_excluded_directory(segment))
    {
        trace!("Excluded directory: {}", relative);
        return result(false, ClassificationReason::ExcludedDirectory);
    }

    if is_directory {
        return result(true, ClassificationReason::Directory);
    }

    if patterns.should_ignore(&relative) {
        return result(false, ClassificationReason::IgnoredByPattern);
    }

    if size_bytes > policy.max_file_size_bytes() {
        trace!(
            "File too large: {} ({} > {} bytes)",
            relative,
            size_bytes,
            policy.max_file_size_bytes()
        );
        return result(false, ClassificationReason::TooLarge);
    }

    let extension = file_extension(path);
    if policy.allows_extension(&extension) {
        trace!("Including file: {}", relative);
        result(true, ClassificationReason::Allowed)
    } else {
        trace!("Excluding file (extension not allowed): {}", relative);
        result(false, ClassificationReason::ExtensionNotAllowed)
    }
}

/// A policy and pattern snapshot bound to one root. Cheap to clone and
/// safe to share across threads; it never changes after construction.
#[derive(Debug, Clone)]
pub struct InclusionClassifier {
    root: PathBuf,
    policy: Arc<Policy>,
    patterns: Arc<IgnorePatterns>,
}

impl InclusionClassifier {
    pub fn new(root: impl Into<PathBuf>, policy: Arc<Policy>, patterns: IgnorePatterns) -> Self {
        InclusionClassifier {
            root: root.into(),
            policy,
            patterns: Arc::new(patterns),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn patterns(&self) -> &IgnorePatterns {
        &self.patterns
    }

    pub fn classify(&self, path: &Path, is_directory: bool, size_bytes: u64) -> ClassificationResult {
        classify(
            path,
            &self.root,
            &self.policy,
            &self.patterns,
            is_directory,
            size_bytes,
        )
    }

    /// Classifies using the file system's view of `path`. A path whose
    /// metadata cannot be read is treated as an empty regular file, so a
    /// vanished candidate surfaces later as a read failure rather than
    /// being dropped silently.
    pub fn classify_path(&self, path: &Path) -> ClassificationResult {
        self.classify_stat(path, std::fs::metadata(path))
    }

    /// Same as [`classify_path`](Self::classify_path), without blocking the
    /// runtime on the stat call.
    pub async fn classify_file(&self, path: &Path) -> ClassificationResult {
        self.classify_stat(path, tokio::fs::metadata(path).await)
    }

    fn classify_stat(&self, path: &Path, metadata: io::Result<Metadata>) -> ClassificationResult {
        match metadata {
            Ok(metadata) => self.classify(path, metadata.is_dir(), metadata.len()),
            Err(e) => {
                debug!("Could not stat {}: {}", path.display(), e);
                self.classify(path, false, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn classifier(extensions: &[&str], excluded: &[&str], max: u64, project: &[&str]) -> InclusionClassifier {
        let policy = Policy::new(extensions.iter(), excluded.iter(), max);
        let project: Vec<String> = project.iter().map(|s| s.to_string()).collect();
        let patterns = IgnorePatterns::new(&[], &project);
        InclusionClassifier::new("/proj", Arc::new(policy), patterns)
    }

    #[test]
    fn test_excluded_directory_wins_over_extension() {
        let c = classifier(&["txt"], &["build"], MB, &[]);
        let result = c.classify(Path::new("/proj/build/notes.txt"), false, 10);
        assert!(!result.included);
        assert_eq!(result.reason, ClassificationReason::ExcludedDirectory);

        let nested = c.classify(Path::new("/proj/src/build/deep/notes.txt"), false, 10);
        assert_eq!(nested.reason, ClassificationReason::ExcludedDirectory);
    }

    #[test]
    fn test_excluded_directory_wins_over_directory() {
        let c = classifier(&["txt"], &["build"], MB, &[]);
        let result = c.classify(Path::new("/proj/build"), true, 0);
        assert_eq!(result.reason, ClassificationReason::ExcludedDirectory);
    }

    #[test]
    fn test_directories_are_included_despite_patterns() {
        let c = classifier(&["txt"], &[], MB, &["docs*"]);
        let result = c.classify(Path::new("/proj/docs"), true, 0);
        assert!(result.included);
        assert!(result.is_directory());
        assert!(!result.is_processable());
    }

    #[test]
    fn test_pattern_before_size_and_extension() {
        let c = classifier(&["log"], &[], 1, &["*.log"]);
        let result = c.classify(Path::new("/proj/big.log"), false, 100);
        assert_eq!(result.reason, ClassificationReason::IgnoredByPattern);
    }

    #[test]
    fn test_size_boundary() {
        let c = classifier(&["txt"], &[], 100, &[]);
        let exact = c.classify(Path::new("/proj/a.txt"), false, 100);
        assert!(exact.included);
        assert_eq!(exact.reason, ClassificationReason::Allowed);

        let over = c.classify(Path::new("/proj/a.txt"), false, 101);
        assert!(!over.included);
        assert_eq!(over.reason, ClassificationReason::TooLarge);
    }

    #[test]
    fn test_extension_rules() {
        let c = classifier(&["md", "gitignore"], &[], MB, &[]);
        assert!(c.classify(Path::new("/proj/README.MD"), false, 1).included);
        assert!(c.classify(Path::new("/proj/.gitignore"), false, 1).included);

        let none = c.classify(Path::new("/proj/Makefile"), false, 1);
        assert_eq!(none.reason, ClassificationReason::ExtensionNotAllowed);
        let other = c.classify(Path::new("/proj/archive.tar.gz"), false, 1);
        assert_eq!(other.reason, ClassificationReason::ExtensionNotAllowed);
    }

    #[test]
    fn test_deterministic() {
        let c = classifier(&["rs"], &["target"], MB, &["gen/"]);
        for path in ["/proj/src/lib.rs", "/proj/gen/x.rs", "/proj/target/a.rs", "/proj/a.py"] {
            let first = c.classify(Path::new(path), false, 42);
            for _ in 0..5 {
                assert_eq!(c.classify(Path::new(path), false, 42), first);
            }
        }
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Path::new("a/b/Main.CPP")), "cpp");
        assert_eq!(file_extension(Path::new("a.b/noext")), "");
        assert_eq!(file_extension(Path::new("trailing.")), "");
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(relative_path(Path::new("/proj/src/a.rs"), Path::new("/proj")), "src/a.rs");
        assert_eq!(relative_path(Path::new("/other/a.rs"), Path::new("/proj")), "../other/a.rs");
        assert_eq!(
            relative_path(Path::new("/proj-b/src/x.rs"), Path::new("/proj/sub")),
            "../../proj-b/src/x.rs"
        );
        assert_eq!(relative_path(Path::new("rel/a.rs"), Path::new("/proj")), "rel/a.rs");
    }

    #[tokio::test]
    async fn test_classify_file_uses_async_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir(root.join("docs")).await.unwrap();
        tokio::fs::write(root.join("notes.txt"), "12345").await.unwrap();

        let policy = Policy::new(["txt"], Vec::<String>::new(), MB);
        let c = InclusionClassifier::new(root, Arc::new(policy), IgnorePatterns::default());

        let file = c.classify_file(&root.join("notes.txt")).await;
        assert_eq!(file.size_bytes, 5);
        assert!(file.is_processable());
        assert!(c.classify_file(&root.join("docs")).await.is_directory());

        let missing = c.classify_file(&root.join("gone.txt")).await;
        assert_eq!(missing, c.classify_path(&root.join("gone.txt")));
        assert!(missing.is_processable());
    }

    #[test]
    fn test_classify_path_missing_file() {
        let c = classifier(&["txt"], &[], MB, &[]);
        let result = c.classify_path(Path::new("/proj/does/not/exist.txt"));
        assert!(result.is_processable());
        assert_eq!(result.size_bytes, 0);
    }
}
