use std::collections::BTreeMap;
use tracing::trace;

/// Represents a node in a path trie.
#[derive(Debug, Default)]
pub struct TrieNode {
    pub children: BTreeMap<String, TrieNode>,
    pub bytes: Option<u64>,
}

impl TrieNode {
    pub fn new() -> Self {
        TrieNode::default()
    }

    /// Calculates the total number of bytes in the subtree.
    pub fn total_bytes(&self) -> u64 {
        self.bytes.unwrap_or(0)
            + self
                .children
                .values()
                .map(|child| child.total_bytes())
                .sum::<u64>()
    }

    pub fn is_file(&self) -> bool {
        self.bytes.is_some()
    }
}

/// Root-relative `/`-separated paths arranged by directory.
#[derive(Debug, Default)]
pub struct Trie {
    root: TrieNode,
}

impl Trie {
    pub fn new() -> Self {
        Trie::default()
    }

    /// Inserts a path with its byte count into the trie.
    pub fn insert(&mut self, relative_path: &str, bytes: u64) {
        let mut current_node = &mut self.root;
        for component in relative_path.split('/').filter(|c| !c.is_empty()) {
            current_node = current_node
                .children
                .entry(component.to_string())
                .or_default();
        }
        if current_node.bytes.is_some() {
            trace!("Overwriting existing byte count for path: {}", relative_path);
        }
        current_node.bytes = Some(bytes);
    }

    pub fn root(&self) -> &TrieNode {
        &self.root
    }
}
