//! Command implementations for the `rcm` binary

pub mod convert;
pub mod export;
pub mod flow;
pub mod import;
pub mod index;
pub mod orphans;
pub mod query;

use std::path::Path;

use crate::archive::ArchiveLayout;
use crate::config::Config;
use crate::flow::{vcs, FlowEngine};

/// Flow engine for one archive root, with the configured backend
pub fn engine(config: &Config, root: &Path) -> FlowEngine {
    FlowEngine::new(ArchiveLayout::new(root), vcs::from_config(&config.vcs, root))
}

/// `a, b,c` → `["a", "b", "c"]`
pub fn split_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// First line of a title, cut to `width` characters
pub(crate) fn truncate_title(title: &str, width: usize) -> String {
    let line = title.lines().next().unwrap_or(title);
    if line.chars().count() > width {
        let cut: String = line.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// `2026-02-01T09:00:00Z` → `2026-02-01`
pub(crate) fn date_part(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags(Some("rust, cli,,yaml ")), vec!["rust", "cli", "yaml"]);
        assert!(split_tags(None).is_empty());
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short\nsecond line", 10), "short");
        assert_eq!(truncate_title("a very long session title", 10), "a very ...");
    }
}
