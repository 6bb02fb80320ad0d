//! In-place update of the embedded flow state
//!
//! The record is parsed into a generic YAML value, the few affected keys are
//! replaced, and the document is serialized again. Mapping order survives the
//! round trip; comments do not.

use serde_yaml::{Mapping, Value};

use crate::error::Result;
use crate::model::FlowState;

pub(crate) struct StateUpdate<'a> {
    pub state: FlowState,
    pub quality_score: Option<u32>,
    /// Merged into `session.metadata.tags`, existing tags first
    pub tags: &'a [String],
}

pub(crate) fn apply(document: &str, update: &StateUpdate<'_>) -> Result<String> {
    let mut root: Mapping = serde_yaml::from_str(document)?;

    let session = child_mapping(&mut root, "session");
    let flow_state = child_mapping(session, "flow_state");
    flow_state.insert("current".into(), update.state.as_str().into());
    if let Some(score) = update.quality_score {
        flow_state.insert("quality_score".into(), Value::from(score));
    }

    if !update.tags.is_empty() {
        let metadata = child_mapping(session, "metadata");
        let tags = metadata
            .entry("tags".into())
            .or_insert_with(|| Value::Sequence(vec![]));
        match tags {
            Value::Sequence(existing) => {
                for tag in update.tags {
                    let tag = Value::from(tag.as_str());
                    if !existing.contains(&tag) {
                        existing.push(tag);
                    }
                }
            }
            other => {
                *other = Value::Sequence(
                    update.tags.iter().map(|t| Value::from(t.as_str())).collect(),
                );
            }
        }
    }

    Ok(serde_yaml::to_string(&root)?)
}

/// Mapping under `key`, created (or replaced when not a mapping) on demand
fn child_mapping<'m>(map: &'m mut Mapping, key: &str) -> &'m mut Mapping {
    let child = map
        .entry(key.into())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !child.is_mapping() {
        *child = Value::Mapping(Mapping::new());
    }
    match child {
        Value::Mapping(inner) => inner,
        _ => unreachable!("child was just made a mapping"),
    }
}
