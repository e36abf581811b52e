//! Reassemble validation outcomes and diffs for a snapshot from the graph.
//!
//! The linked entities' observations are parsed by key. Missing or malformed observations become
//! empty strings or `false`; a snapshot that does not exist yields an empty list.

use serde::{Deserialize, Serialize};

use crate::{
    error::SightlineError,
    observation::{self, find_value, value_or_empty},
    properties::{
        EntityKind, NodeSet, COMPARES_SOURCE_SNAPSHOT, COMPARES_TARGET_SNAPSHOT,
        PRODUCES_VALIDATION_RESULT,
    },
    query::GraphSource,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub validation_name: String,
    pub pass: bool,
    pub timestamp: String,
    pub explanation: String,
}

impl ValidationResult {
    pub fn from_observations(validation_name: &str, observations: &[String]) -> ValidationResult {
        ValidationResult {
            validation_name: validation_name.to_string(),
            pass: find_value(observations, observation::PASS)
                .map(|v| v.contains("true"))
                .unwrap_or(false),
            timestamp: value_or_empty(observations, observation::TIMESTAMP),
            explanation: value_or_empty(observations, observation::EXPLANATION),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub diff_name: String,
    pub timestamp: String,
    pub summary: String,
    pub source_snapshot_id: String,
    pub target_snapshot_id: String,
}

impl DiffResult {
    pub fn from_observations(diff_name: &str, observations: &[String]) -> DiffResult {
        DiffResult {
            diff_name: diff_name.to_string(),
            timestamp: value_or_empty(observations, observation::TIMESTAMP),
            summary: value_or_empty(observations, observation::SUMMARY),
            source_snapshot_id: value_or_empty(observations, observation::SOURCE_SNAPSHOT_ID),
            target_snapshot_id: value_or_empty(observations, observation::TARGET_SNAPSHOT_ID),
        }
    }
}

/// Open the snapshot and return its relations, or `None` if the snapshot entity is absent.
async fn snapshot_relations<S: GraphSource>(
    source: &S,
    snapshot_name: &str,
) -> Result<Option<NodeSet>, SightlineError> {
    let nodes = source.open_nodes(&[snapshot_name.to_string()]).await?;
    if nodes.entity(snapshot_name).is_none() {
        tracing::debug!("[aggregate] no snapshot entity '{}'", snapshot_name);
        return Ok(None);
    }
    Ok(Some(nodes))
}

/// Linked entities are looked up in one batch; names with no entity are reported with defaults.
async fn open_linked<S: GraphSource>(
    source: &S,
    names: Vec<String>,
) -> Result<Vec<(String, Vec<String>)>, SightlineError> {
    let linked = source.open_nodes(&names).await?;
    Ok(names
        .into_iter()
        .map(|name| {
            let observations = match linked.entity(&name) {
                Some(entity) => entity.observations.clone(),
                None => {
                    tracing::warn!("[aggregate] linked entity '{}' is missing", name);
                    Vec::new()
                }
            };
            (name, observations)
        })
        .collect())
}

#[tracing::instrument(level = "debug", skip(source))]
pub async fn validation_results_for<S: GraphSource>(
    source: &S,
    snapshot_id: &str,
) -> Result<Vec<ValidationResult>, SightlineError> {
    let snapshot_name = EntityKind::Snapshot.entity_name(snapshot_id);
    let Some(nodes) = snapshot_relations(source, &snapshot_name).await? else {
        return Ok(Vec::new());
    };
    let targets = nodes
        .outgoing(&snapshot_name, PRODUCES_VALIDATION_RESULT)
        .map(|r| r.to.clone())
        .collect::<Vec<_>>();
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    Ok(open_linked(source, targets)
        .await?
        .into_iter()
        .map(|(name, observations)| ValidationResult::from_observations(&name, &observations))
        .collect())
}

#[tracing::instrument(level = "debug", skip(source))]
pub async fn diffs_for<S: GraphSource>(
    source: &S,
    snapshot_id: &str,
) -> Result<Vec<DiffResult>, SightlineError> {
    let snapshot_name = EntityKind::Snapshot.entity_name(snapshot_id);
    let Some(nodes) = snapshot_relations(source, &snapshot_name).await? else {
        return Ok(Vec::new());
    };
    let mut diff_names = Vec::<String>::new();
    for relation in nodes.incoming(
        &snapshot_name,
        &[COMPARES_SOURCE_SNAPSHOT, COMPARES_TARGET_SNAPSHOT],
    ) {
        // A diff of a snapshot against itself touches it through both edge types.
        if !diff_names.contains(&relation.from) {
            diff_names.push(relation.from.clone());
        }
    }
    if diff_names.is_empty() {
        return Ok(Vec::new());
    }
    Ok(open_linked(source, diff_names)
        .await?
        .into_iter()
        .map(|(name, observations)| DiffResult::from_observations(&name, &observations))
        .collect())
}
