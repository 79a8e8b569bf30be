use crate::errors::ProcessorError;
use crate::policy::Policy;
use glob::{MatchOptions, Pattern};
use std::fmt;
use std::path::Path;
use tracing::{debug, trace, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSource {
    Default,
    ProjectFile,
}

/// A compiled wildcard rule. `*` crosses path separators and matching is
/// case-insensitive against the whole root-relative path.
#[derive(Clone)]
pub struct IgnorePattern {
    raw: String,
    source: PatternSource,
    matcher: Pattern,
}

impl IgnorePattern {
    pub fn compile(raw: &str, source: PatternSource) -> Result<Self, ProcessorError> {
        let normalized = normalize_pattern(raw);
        let matcher = Pattern::new(&normalized)
            .map_err(|e| ProcessorError::InvalidPattern(raw.to_string(), e.to_string()))?;
        Ok(IgnorePattern {
            raw: normalized,
            source,
            matcher,
        })
    }

    pub fn matches(&self, root_relative_path: &str) -> bool {
        let path = root_relative_path.replace('\\', "/");
        self.matcher.matches_with(&path, MATCH_OPTIONS)
    }

    /// The pattern as stored, after directory normalisation.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn source(&self) -> PatternSource {
        self.source
    }
}

impl fmt::Debug for IgnorePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnorePattern")
            .field("raw", &self.raw)
            .field("source", &self.source)
            .finish()
    }
}

/// `build/` becomes `build/*`; a leading `/` is dropped since every path we
/// match against is already root-relative. Runs of `*` collapse to one, as
/// a single `*` already crosses separators.
pub fn normalize_pattern(raw: &str) -> String {
    let trimmed = raw.trim();
    let anchored = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let directory = anchored.ends_with('/');

    let mut normalized = String::with_capacity(anchored.len() + 1);
    for ch in anchored.chars().chain(directory.then_some('*')) {
        if ch == '*' && normalized.ends_with('*') {
            continue;
        }
        normalized.push(ch);
    }
    normalized
}

/// Returns true on the first pattern, in order, that matches.
pub fn is_ignored(root_relative_path: &str, patterns: &[IgnorePattern]) -> bool {
    patterns.iter().any(|p| p.matches(root_relative_path))
}

/// Ordered pattern list: defaults first, then the project's ignore file.
#[derive(Debug, Clone, Default)]
pub struct IgnorePatterns {
    patterns: Vec<IgnorePattern>,
}

impl IgnorePatterns {
    pub fn new(defaults: &[String], project: &[String]) -> Self {
        let mut patterns = Vec::with_capacity(defaults.len() + project.len());
        patterns.extend(compile_all(defaults, PatternSource::Default));
        patterns.extend(compile_all(project, PatternSource::ProjectFile));
        debug!("Using {} ignore patterns", patterns.len());
        IgnorePatterns { patterns }
    }

    /// Default patterns derived from the policy's excluded directory names.
    pub fn default_patterns(policy: &Policy) -> Vec<String> {
        policy
            .excluded_directories()
            .iter()
            .flat_map(|name| [name.clone(), format!("{}/", name)])
            .collect()
    }

    pub fn from_policy(policy: &Policy, project: &[String]) -> Self {
        IgnorePatterns::new(&IgnorePatterns::default_patterns(policy), project)
    }

    pub fn should_ignore<P: AsRef<Path>>(&self, path: P) -> bool {
        let path_str = path.as_ref().to_string_lossy().replace('\\', "/");
        let ignored = is_ignored(&path_str, &self.patterns);
        if ignored {
            trace!("Ignored by patterns: {}", path_str);
        }
        ignored
    }

    pub fn first_match(&self, root_relative_path: &str) -> Option<&IgnorePattern> {
        self.patterns.iter().find(|p| p.matches(root_relative_path))
    }

    pub fn patterns(&self) -> &[IgnorePattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile_all(raw: &[String], source: PatternSource) -> Vec<IgnorePattern> {
    raw.iter()
        .filter_map(|p| match IgnorePattern::compile(p, source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("{}", e);
                None
            }
        })
        .collect()
}

/// Parses ignore-file text: blank lines and `#` comments are skipped.
/// Negated (`!`) lines are not supported and are skipped too.
pub fn parse_ignore_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            if line.starts_with('!') {
                debug!("Skipping unsupported negated pattern: {}", line);
                return false;
            }
            true
        })
        .map(normalize_pattern)
        .collect()
}

/// Reads the project ignore file. A missing file yields no patterns.
pub async fn load_ignore_file(path: &Path) -> Result<Vec<String>, ProcessorError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let patterns = parse_ignore_file(&content);
            debug!("Read {} patterns from {}", patterns.len(), path.display());
            Ok(patterns)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            trace!("No ignore file at {}", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(ProcessorError::IoError(format!(
            "could not read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(raw: &str) -> IgnorePattern {
        IgnorePattern::compile(raw, PatternSource::ProjectFile).unwrap()
    }

    #[test]
    fn test_trailing_slash_matches_like_star() {
        let slash = compile("out/");
        let star = compile("out/*");
        assert_eq!(slash.raw(), "out/*");
        for path in ["out/release/app.bin", "out/a", "out", "src/out/a", "output/a"] {
            assert_eq!(slash.matches(path), star.matches(path), "path {}", path);
        }
        assert!(slash.matches("out/release/app.bin"));
        assert!(!slash.matches("out"));
    }

    #[test]
    fn test_star_crosses_separators() {
        let pattern = compile("*.log");
        assert!(pattern.matches("debug.log"));
        assert!(pattern.matches("logs/2024/debug.log"));
        assert!(!pattern.matches("debug.log.txt"));
    }

    #[test]
    fn test_double_star_collapses() {
        assert_eq!(normalize_pattern("**.tmp"), "*.tmp");
        assert_eq!(normalize_pattern("cache/**/"), "cache/*/*");

        let patterns = IgnorePatterns::new(&[], &["**.tmp".to_string(), "src/**gen*".to_string()]);
        assert_eq!(patterns.len(), 2);
        assert!(patterns.should_ignore("a/b.tmp"));
        assert!(patterns.should_ignore("src/api/generated.rs"));
        assert!(patterns.should_ignore("src/gen"));
        assert!(!patterns.should_ignore("lib/generated.rs"));
    }

    #[test]
    fn test_case_insensitive() {
        let pattern = compile("Docs/*.MD");
        assert!(pattern.matches("docs/readme.md"));
        assert!(pattern.matches("DOCS/README.md"));
    }

    #[test]
    fn test_backslashes_are_normalized() {
        let pattern = compile("build/*");
        assert!(pattern.matches("build\\debug\\x.o"));
    }

    #[test]
    fn test_invalid_patterns_are_skipped() {
        assert!(IgnorePattern::compile("[", PatternSource::Default).is_err());
        let patterns = IgnorePatterns::new(&["[".to_string(), "*.tmp".to_string()], &[]);
        assert_eq!(patterns.len(), 1);
        assert!(patterns.should_ignore("a.tmp"));
    }

    #[test]
    fn test_order_and_sources() {
        let patterns = IgnorePatterns::new(&["*.tmp".to_string()], &["cache.tmp".to_string()]);
        let hit = patterns.first_match("cache.tmp").unwrap();
        assert_eq!(hit.source(), PatternSource::Default);
        assert_eq!(patterns.patterns()[1].source(), PatternSource::ProjectFile);
        assert!(!patterns.should_ignore("main.rs"));
    }

    #[test]
    fn test_parse_ignore_file() {
        let content = "# comment\n\n  target/  \n*.pyc\n/dist\n!keep.pyc\n";
        assert_eq!(
            parse_ignore_file(content),
            vec!["target/*".to_string(), "*.pyc".to_string(), "dist".to_string()]
        );
    }

    #[test]
    fn test_default_patterns_from_policy() {
        let policy = Policy::new(["rs"], ["node_modules"], 1024);
        let patterns = IgnorePatterns::from_policy(&policy, &[]);
        assert!(patterns.should_ignore("node_modules"));
        assert!(patterns.should_ignore("node_modules/lib/index.js"));
        assert!(!patterns.should_ignore("src/main.rs"));
    }

    #[tokio::test]
    async fn test_missing_ignore_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = load_ignore_file(&dir.path().join(".gitignore")).await.unwrap();
        assert!(patterns.is_empty());
    }
}
