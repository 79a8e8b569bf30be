use crate::job::ProcessedFile;
use crate::output::format_file_size;
use crate::trie::{Trie, TrieNode};
use tracing::{debug, info};

/// Renders the processed files as a directory tree with per-directory
/// byte totals, one line per node.
pub fn render_tree(files: &[ProcessedFile]) -> Vec<String> {
    let mut trie = Trie::new();
    for file in files {
        trie.insert(&file.relative_path, file.bytes);
    }

    let mut lines = vec![format!(
        "Overall ({})",
        format_file_size(trie.root().total_bytes())
    )];
    render_node(trie.root(), "", &mut lines);
    lines
}

fn render_node(node: &TrieNode, prefix: &str, lines: &mut Vec<String>) {
    let count = node.children.len();
    for (i, (name, child)) in node.children.iter().enumerate() {
        let is_last = i + 1 == count;
        let connector = if is_last { "┗━━" } else { "┣━━" };

        if child.is_file() && child.children.is_empty() {
            lines.push(format!(
                "{}{} 📄 {} ({})",
                prefix,
                connector,
                name,
                format_file_size(child.total_bytes())
            ));
        } else {
            lines.push(format!(
                "{}{}📂 {} ({})",
                prefix,
                connector,
                name,
                format_file_size(child.total_bytes())
            ));
            let new_prefix = format!("{}{}    ", prefix, if is_last { " " } else { "┃" });
            render_node(child, &new_prefix, lines);
        }
    }
}

/// Logs the size tree for the processed files.
pub fn print_stats(files: &[ProcessedFile]) {
    debug!("Printing statistics for {} files", files.len());
    for line in render_tree(files) {
        info!("{}", line);
    }
}
