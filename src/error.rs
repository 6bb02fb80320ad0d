//! Error taxonomy for conversion, archiving and flow transitions

use std::path::PathBuf;

use crate::model::FlowState;

pub type Result<T, E = RcmError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RcmError {
    /// Raw export is not syntactically valid for its platform.
    #[error("failed to parse {platform} export {path}: {message}")]
    Parse {
        platform: String,
        path: String,
        message: String,
    },

    /// Export parsed but held nothing that converts into a message.
    #[error("no usable entries in {platform} export {path}")]
    EmptyTranscript { platform: String, path: String },

    #[error(
        "invalid transition: {from} → {to}. Valid transitions from {from}: {}",
        format_states(.allowed)
    )]
    InvalidTransition {
        from: FlowState,
        to: FlowState,
        allowed: Vec<FlowState>,
    },

    #[error("record not found: {query}{}", state_suffix(.state))]
    RecordNotFound {
        query: String,
        state: Option<FlowState>,
    },

    #[error("{operation} failed ({}): {message}", describe_paths(.from, .to))]
    VersionControl {
        operation: &'static str,
        from: Option<PathBuf>,
        to: Option<PathBuf>,
        message: String,
    },

    #[error("canonical record already exists: {}", .0.display())]
    AlreadyArchived(PathBuf),

    #[error("unknown platform: {0} (expected claude-code, chatgpt or gemini)")]
    UnknownPlatform(String),

    #[error("unknown flow state: {0} (expected hypothesis, codified, validated or promoted)")]
    UnknownState(String),

    #[error("adapter for {0} is disabled in configuration")]
    AdapterDisabled(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RcmError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RcmError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn vcs(operation: &'static str, message: impl Into<String>) -> Self {
        RcmError::VersionControl {
            operation,
            from: None,
            to: None,
            message: message.into(),
        }
    }
}

fn format_states(states: &[FlowState]) -> String {
    if states.is_empty() {
        return "none".to_string();
    }
    states
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn state_suffix(state: &Option<FlowState>) -> String {
    state
        .map(|s| format!(" in state: {s}"))
        .unwrap_or_default()
}

fn describe_paths(from: &Option<PathBuf>, to: &Option<PathBuf>) -> String {
    match (from, to) {
        (Some(f), Some(t)) => format!("{} → {}", f.display(), t.display()),
        (Some(p), None) | (None, Some(p)) => p.display().to_string(),
        (None, None) => "repository".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_allowed_targets() {
        let err = RcmError::InvalidTransition {
            from: FlowState::Codified,
            to: FlowState::Promoted,
            allowed: vec![FlowState::Validated, FlowState::Hypothesis],
        };
        assert_eq!(
            err.to_string(),
            "invalid transition: codified → promoted. Valid transitions from codified: validated, hypothesis"
        );
    }

    #[test]
    fn record_not_found_mentions_state_filter() {
        let err = RcmError::RecordNotFound {
            query: "abcd1234".to_string(),
            state: Some(FlowState::Validated),
        };
        assert_eq!(err.to_string(), "record not found: abcd1234 in state: validated");

        let err = RcmError::RecordNotFound {
            query: "abcd1234".to_string(),
            state: None,
        };
        assert_eq!(err.to_string(), "record not found: abcd1234");
    }

    #[test]
    fn vcs_error_carries_move_context() {
        let err = RcmError::VersionControl {
            operation: "git mv",
            from: Some(PathBuf::from("flows/codified/a.yaml")),
            to: Some(PathBuf::from("flows/validated/a.yaml")),
            message: "fatal: bad source".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "git mv failed (flows/codified/a.yaml → flows/validated/a.yaml): fatal: bad source"
        );
    }
}
