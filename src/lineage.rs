//! Version lineage over `hasPreviousVersion` edges.
//!
//! Two halves live here:
//!
//! - [`resolve_lineage`] walks from an artifact to its ancestors, newest first.
//! - [`link_previous_version`] writes a freshly recorded artifact together with an edge to the
//!   latest existing artifact with the same source identifier.
//!
//! ## Ordering rules
//!
//! Backends return relations in insertion order. When an artifact has several
//! `hasPreviousVersion` edges (branching history, or the same link recorded twice) the walk
//! follows the one recorded last.
//!
//! The linker picks the candidate with the lexically greatest `Timestamp:` value (ISO-8601 text
//! sorts chronologically). On a tie the candidate met first in search order wins. "Previous"
//! means "present in the store at search time": an artifact recorded out of order still links to
//! whatever is latest.
//!
//! ## Consistency
//!
//! [`link_previous_version`] searches for candidates, then writes the artifact and its edge in one
//! batch. The search and the write are not one transaction. Run it under a single writer (see
//! [`GraphService`](crate::service::GraphService)) or accept that a concurrent record can make the
//! chosen predecessor stale.

use std::collections::BTreeSet;

use crate::{
    error::SightlineError,
    observation::timestamp_of,
    properties::{Entity, EntityKind, Relation, HAS_PREVIOUS_VERSION},
    query::GraphSource,
};

/// Ancestor chain of `id` within `kind`'s namespace, starting with `id` itself.
///
/// Stops at the first identifier whose entity does not exist, whose predecessor edge points
/// outside the namespace, or that was already visited (cycle).
#[tracing::instrument(level = "debug", skip(source))]
pub async fn resolve_lineage<S: GraphSource>(
    source: &S,
    kind: EntityKind,
    id: &str,
) -> Result<Vec<String>, SightlineError> {
    let mut chain = Vec::new();
    let mut visited = BTreeSet::new();
    let mut current = id.to_string();
    loop {
        if !visited.insert(current.clone()) {
            tracing::warn!(
                "[resolve_lineage] cycle detected at '{}' while resolving '{}'; stopping",
                current,
                id
            );
            break;
        }
        chain.push(current.clone());

        let name = kind.entity_name(&current);
        let Some((_entity, relations)) = source.open_node(&name).await? else {
            break;
        };
        let Some(edge) = relations
            .iter()
            .rev()
            .find(|r| r.from == name && r.relation_type == HAS_PREVIOUS_VERSION)
        else {
            break;
        };
        match kind.strip(&edge.to) {
            Some(next) => current = next.to_string(),
            None => {
                tracing::debug!(
                    "[resolve_lineage] '{}' points outside the {} namespace; stopping",
                    edge.to,
                    kind
                );
                break;
            }
        }
    }
    Ok(chain)
}

/// Snapshot ids from `snapshot_id` back through its ancestors, newest first.
pub async fn snapshot_history<S: GraphSource>(
    source: &S,
    snapshot_id: &str,
) -> Result<Vec<String>, SightlineError> {
    resolve_lineage(source, EntityKind::Snapshot, snapshot_id).await
}

/// Choose the predecessor of `entity` among `candidates`.
///
/// A candidate qualifies when it is a different entity of the same kind that carries the exact
/// `source_observation` (for example `URL: https://example.com`).
pub fn select_previous<'a>(
    candidates: &'a [Entity],
    entity: &Entity,
    kind: EntityKind,
    source_observation: &str,
) -> Option<&'a Entity> {
    let mut best: Option<(&Entity, String)> = None;
    for candidate in candidates.iter().filter(|c| {
        c.name != entity.name
            && kind.owns(&c.name)
            && c.entity_type == kind.entity_type()
            && c.observations.iter().any(|o| o == source_observation)
    }) {
        let ts = timestamp_of(&candidate.observations);
        let is_later = match &best {
            Some((_, best_ts)) => ts > *best_ts,
            None => true,
        };
        if is_later {
            best = Some((candidate, ts));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Persist `entity` together with `entity -hasPreviousVersion-> latest`, where `latest` is the
/// most recent artifact sharing `source_observation`. Both rows go through one
/// [`GraphSource::write_batch`]. Returns the linked entity name, or `None` when there was nothing
/// to link to (the entity is still written).
#[tracing::instrument(level = "debug", skip(source, entity), fields(entity = %entity.name))]
pub async fn link_previous_version<S: GraphSource>(
    source: &S,
    entity: &Entity,
    kind: EntityKind,
    source_observation: &str,
) -> Result<Option<String>, SightlineError> {
    let candidates = source.search_nodes(source_observation).await?;
    let previous =
        select_previous(&candidates, entity, kind, source_observation).map(|p| p.name.clone());
    let link = previous
        .iter()
        .map(|previous| Relation::new(entity.name.clone(), previous.clone(), HAS_PREVIOUS_VERSION))
        .collect::<Vec<_>>();
    source
        .write_batch(std::slice::from_ref(entity), &link)
        .await?;
    match &previous {
        Some(previous) => {
            tracing::debug!("[link_previous_version] {} -> {}", entity.name, previous)
        }
        None => tracing::debug!("[link_previous_version] no earlier version of '{}'", entity.name),
    }
    Ok(previous)
}
