use crate::errors::ProcessorError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Immutable inclusion rules: which extensions are text, which directory
/// names are never entered, and how large a single file may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    allowed_extensions: BTreeSet<String>,
    excluded_directories: BTreeSet<String>,
    max_file_size_bytes: u64,
}

impl Policy {
    /// Builds a policy, normalising extensions (lower-case, no leading dot).
    /// A zero size cap is replaced by the default cap.
    pub fn new<E, D, S1, S2>(extensions: E, excluded_directories: D, max_file_size_bytes: u64) -> Self
    where
        E: IntoIterator<Item = S1>,
        D: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let allowed_extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        let excluded_directories = excluded_directories
            .into_iter()
            .map(|d| d.as_ref().trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let max_file_size_bytes = if max_file_size_bytes == 0 {
            DEFAULT_MAX_FILE_SIZE_MB * BYTES_PER_MB
        } else {
            max_file_size_bytes
        };

        Policy {
            allowed_extensions,
            excluded_directories,
            max_file_size_bytes,
        }
    }

    pub fn allowed_extensions(&self) -> &BTreeSet<String> {
        &self.allowed_extensions
    }

    pub fn excluded_directories(&self) -> &BTreeSet<String> {
        &self.excluded_directories
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.contains(extension)
    }

    pub fn is_excluded_directory(&self, name: &str) -> bool {
        self.excluded_directories.contains(name)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            allowed_extensions: BTreeSet::new(),
            excluded_directories: BTreeSet::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_MB * BYTES_PER_MB,
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// On-disk shape of the policy file. Every field is lenient: a missing or
/// mistyped field falls back to its default without failing the others.
#[derive(Debug, Deserialize, Default)]
struct PolicyFile {
    #[serde(default, deserialize_with = "lenient_strings")]
    text_extensions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    excluded_directories: Vec<String>,
    #[serde(default, deserialize_with = "lenient_size")]
    max_file_size_mb: Option<u64>,
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let whole = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 1.0).map(|f| f as u64));
    Ok(whole.filter(|mb| *mb > 0))
}

/// Where the policy comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Inline(String),
    Defaults,
}

/// Parses a policy, reporting why it could not be loaded.
pub fn try_load(source: &ConfigSource) -> Result<Policy, ProcessorError> {
    let text = match source {
        ConfigSource::Defaults => return Ok(Policy::default()),
        ConfigSource::Inline(text) => text.clone(),
        ConfigSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
            ProcessorError::ConfigLoad(format!("could not open {}: {}", path.display(), e))
        })?,
    };

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| ProcessorError::ConfigLoad(format!("invalid JSON configuration: {}", e)))?;
    if !value.is_object() {
        return Err(ProcessorError::ConfigLoad(
            "invalid JSON configuration: top level is not an object".to_string(),
        ));
    }
    let parsed: PolicyFile = serde_json::from_value(value)
        .map_err(|e| ProcessorError::ConfigLoad(format!("invalid JSON configuration: {}", e)))?;

    let max_mb = parsed.max_file_size_mb.unwrap_or(DEFAULT_MAX_FILE_SIZE_MB);
    let policy = Policy::new(
        parsed.text_extensions,
        parsed.excluded_directories,
        max_mb.saturating_mul(BYTES_PER_MB),
    );
    debug!(
        "Loaded policy: {} extensions, {} excluded directories, max {} bytes",
        policy.allowed_extensions.len(),
        policy.excluded_directories.len(),
        policy.max_file_size_bytes
    );
    Ok(policy)
}

/// Loads a policy, never failing: problems are logged and the default
/// policy is returned instead.
pub fn load(source: &ConfigSource) -> Policy {
    match try_load(source) {
        Ok(policy) => policy,
        Err(e) => {
            warn!("{}; falling back to default policy", e);
            Policy::default()
        }
    }
}

/// Loads the policy once on first use and hands out the same snapshot
/// afterwards, including to concurrent first callers.
#[derive(Debug)]
pub struct PolicyStore {
    source: ConfigSource,
    policy: OnceCell<Arc<Policy>>,
}

impl PolicyStore {
    pub fn new(source: ConfigSource) -> Self {
        PolicyStore {
            source,
            policy: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Arc<Policy> {
        self.policy
            .get_or_init(|| Arc::new(load(&self.source)))
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.policy.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_parses_all_fields() {
        let source = ConfigSource::Inline(
            r#"{"text_extensions": ["RS", ".md"], "excluded_directories": ["target"], "max_file_size_mb": 2}"#
                .to_string(),
        );
        let policy = try_load(&source).unwrap();
        assert!(policy.allows_extension("rs"));
        assert!(policy.allows_extension("md"));
        assert!(policy.is_excluded_directory("target"));
        assert_eq!(policy.max_file_size_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_mistyped_fields_fall_back_individually() {
        let source = ConfigSource::Inline(
            r#"{"text_extensions": "rs", "excluded_directories": ["build", 7], "max_file_size_mb": -3}"#
                .to_string(),
        );
        let policy = try_load(&source).unwrap();
        assert!(policy.allowed_extensions().is_empty());
        assert_eq!(policy.excluded_directories().len(), 1);
        assert_eq!(policy.max_file_size_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_malformed_source_yields_default() {
        let source = ConfigSource::Inline("not json".to_string());
        assert!(matches!(try_load(&source), Err(ProcessorError::ConfigLoad(_))));
        assert_eq!(load(&source), Policy::default());

        let source = ConfigSource::Inline("[1, 2]".to_string());
        assert_eq!(load(&source), Policy::default());
    }

    #[traced_test]
    #[test]
    fn test_fallback_is_logged() {
        let policy = load(&ConfigSource::Inline("{".to_string()));
        assert_eq!(policy, Policy::default());
        assert!(logs_contain("falling back to default policy"));
    }

    #[test]
    fn test_missing_file_yields_default() {
        let source = ConfigSource::File(PathBuf::from("/definitely/not/here.json"));
        assert_eq!(load(&source), Policy::default());
    }

    #[test]
    fn test_zero_size_cap_is_replaced() {
        let policy = Policy::new(["txt"], Vec::<String>::new(), 0);
        assert_eq!(policy.max_file_size_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_store_loads_once() {
        let store = Arc::new(PolicyStore::new(ConfigSource::Inline(
            r#"{"text_extensions": ["rs"]}"#.to_string(),
        )));
        assert!(!store.is_loaded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.get())
            })
            .collect();
        let policies: Vec<Arc<Policy>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for policy in &policies {
            assert!(Arc::ptr_eq(policy, &policies[0]));
        }
        assert!(store.is_loaded());
    }
}
