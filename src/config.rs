//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::model::{FidelityLevel, Platform};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    #[serde(default)]
    pub vcs: VcsConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

/// Archive roots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Root used by import/flow commands when `--root` is omitted
    #[serde(default)]
    pub default_root: Option<String>,

    /// Roots scanned by the indexer
    #[serde(default)]
    pub roots: Vec<String>,
}

/// Import defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_enabled")]
    pub auto_commit: bool,

    #[serde(default)]
    pub fidelity: FidelityLevel,

    #[serde(default)]
    pub default_tags: Vec<String>,
}

/// Individual adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub status: Option<String>, // 'active', 'frozen', 'deprecated'

    /// Where the platform keeps its transcripts (used for orphan discovery)
    #[serde(default)]
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsBackend {
    #[default]
    Git,
    None,
}

/// Version-control configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VcsConfig {
    #[serde(default)]
    pub backend: VcsBackend,

    #[serde(default)]
    pub author_name: Option<String>,

    #[serde(default)]
    pub author_email: Option<String>,
}

/// Index export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_output")]
    pub output: String,
}

// Default value functions
fn default_enabled() -> bool {
    true
}

fn default_index_output() -> String {
    "~/.local/share/rcm/session-index.json".to_string()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            fidelity: FidelityLevel::Standard,
            default_tags: vec![],
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            output: default_index_output(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./rcm.yaml (current directory)
    /// 3. ~/.config/rcm/rcm.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "rcm.yaml".to_string(),
            shellexpand::tilde("~/.config/rcm/rcm.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                tracing::debug!(path = %search_path, "loaded configuration");
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Root for single-root commands: explicit flag, configured default, then cwd
    pub fn resolve_root(&self, explicit: Option<&str>) -> PathBuf {
        explicit
            .map(expand)
            .or_else(|| self.archive.default_root.as_deref().map(expand))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
    }

    /// Roots for the indexer: explicit flags win over configuration
    pub fn index_roots(&self, explicit: &[String]) -> Vec<PathBuf> {
        if !explicit.is_empty() {
            return explicit.iter().map(|r| expand(r)).collect();
        }
        if !self.archive.roots.is_empty() {
            return self.archive.roots.iter().map(|r| expand(r)).collect();
        }
        vec![self.resolve_root(None)]
    }

    pub fn index_output(&self) -> PathBuf {
        expand(&self.index.output)
    }

    /// Check if an adapter is enabled
    /// Returns false if:
    /// - Adapter is explicitly disabled
    /// - Adapter status is 'frozen' or 'deprecated'
    pub fn is_adapter_enabled(&self, platform: Platform) -> bool {
        self.adapters.get(platform.as_str()).map_or(true, |a| {
            if !a.enabled {
                return false;
            }
            !matches!(a.status.as_deref(), Some("frozen") | Some("deprecated"))
        })
    }

    /// Transcript directory for a platform, falling back to the Claude Code default
    pub fn adapter_path(&self, platform: Platform) -> Option<PathBuf> {
        self.adapters
            .get(platform.as_str())
            .and_then(|a| a.base_path.as_deref())
            .map(expand)
            .or_else(|| match platform {
                Platform::ClaudeCode => dirs::home_dir().map(|h| h.join(".claude/projects")),
                _ => None,
            })
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}
