//! Node and edge types of the artifact knowledge graph.
//!
//! An [`Entity`] is a uniquely named, typed node carrying an ordered list of free-text
//! observations. A [`Relation`] is a directed, typed edge between two entity names. Relations are
//! not foreign keys: either endpoint may name an entity that was never created.
//!
//! Domain objects are namespaced by prefixing a kind tag and an underscore to an opaque
//! identifier (`Snapshot_X`, `Validation_Y`, ...). [`EntityKind`] owns that convention.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[cfg(feature = "service")]
use sqlx::{sqlite::SqliteRow, FromRow, Row};

/// Edge from a newer artifact to the artifact it supersedes.
pub const HAS_PREVIOUS_VERSION: &str = "hasPreviousVersion";
/// Edge from a snapshot to a validation outcome computed from it.
pub const PRODUCES_VALIDATION_RESULT: &str = "producesValidationResult";
/// Edge from a comparison result to the snapshot it diffed from.
pub const COMPARES_SOURCE_SNAPSHOT: &str = "comparesSourceSnapshot";
/// Edge from a comparison result to the snapshot it diffed against.
pub const COMPARES_TARGET_SNAPSHOT: &str = "comparesTargetSnapshot";
/// Edge from a reasoning step to the snapshot it discusses.
pub const REASONS_ABOUT: &str = "reasonsAbout";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl Entity {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, entity_type: T) -> Entity {
        Entity {
            name: name.into(),
            entity_type: entity_type.into(),
            observations: Vec::new(),
        }
    }

    pub fn with_observations<I, S>(mut self, observations: I) -> Entity
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observations
            .extend(observations.into_iter().map(Into::into));
        self
    }

    /// Case-sensitive substring match over name, type and every observation.
    pub fn matches_text(&self, query: &str) -> bool {
        self.name.contains(query)
            || self.entity_type.contains(query)
            || self.observations.iter().any(|o| o.contains(query))
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.entity_type)?;
        for obs in self.observations.iter() {
            write!(f, "\n\t{obs}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

impl Relation {
    pub fn new<F, T, R>(from: F, to: T, relation_type: R) -> Relation
    where
        F: Into<String>,
        T: Into<String>,
        R: Into<String>,
    {
        Relation {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -{}-> {}", self.from, self.relation_type, self.to)
    }
}

/// Observations to append to an existing entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationUpdate {
    pub entity_name: String,
    #[serde(default)]
    pub contents: Vec<String>,
}

/// Result of a batch lookup: the named entities plus every relation touching any of the names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl NodeSet {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Relations of `relation_type` leaving `from`, in store order.
    pub fn outgoing<'a>(
        &'a self,
        from: &'a str,
        relation_type: &'a str,
    ) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.from == from && r.relation_type == relation_type)
    }

    /// Relations of any of `relation_types` arriving at `to`, in store order.
    pub fn incoming<'a>(
        &'a self,
        to: &'a str,
        relation_types: &'a [&'a str],
    ) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.to == to && relation_types.contains(&r.relation_type.as_str()))
    }
}

/// The kinds of domain object recorded in the graph, each with its entity-name namespace and
/// entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Snapshot,
    Validation,
    Diff,
    Reasoning,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Snapshot => "Snapshot_",
            EntityKind::Validation => "Validation_",
            EntityKind::Diff => "Diff_",
            EntityKind::Reasoning => "Reasoning_",
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityKind::Snapshot => "artifact",
            EntityKind::Validation => "outcome",
            EntityKind::Diff => "comparison-result",
            EntityKind::Reasoning => "reasoning-step",
        }
    }

    /// `Snapshot` + `abc` -> `Snapshot_abc`
    pub fn entity_name(&self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }

    /// Inverse of [`EntityKind::entity_name`]; `None` when `name` is outside this namespace.
    pub fn strip<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix())
    }

    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(self.prefix())
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix().trim_end_matches('_'))
    }
}

/// Decode the stored observation column. Anything that is not a JSON array of strings is
/// tolerated and read as no observations.
pub(crate) fn decode_observations(name: &str, raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(obs) => obs,
        Err(e) => {
            tracing::warn!(
                "Entity '{}' has unreadable observations ({}); treating as empty",
                name,
                e
            );
            Vec::new()
        }
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for Entity {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let name: String = row.try_get("name")?;
        let entity_type: Option<String> = row.try_get("entity_type")?;
        let raw_obs: Option<&str> = row.try_get("observations")?;
        let observations = decode_observations(&name, raw_obs.unwrap_or("[]"));
        Ok(Entity {
            name,
            entity_type: entity_type.unwrap_or_default(),
            observations,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for Relation {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let from: Option<String> = row.try_get("from_entity")?;
        let to: Option<String> = row.try_get("to_entity")?;
        let relation_type: Option<String> = row.try_get("relation_type")?;
        Ok(Relation {
            from: from.unwrap_or_default(),
            to: to.unwrap_or_default(),
            relation_type: relation_type.unwrap_or_default(),
        })
    }
}
