//! In-process entity/relation store.
//!
//! [`MemoryGraph`] honors the same [`GraphSource`] contract as the SQLite
//! [`DbConnection`](crate::db::DbConnection) but keeps nothing across restarts. Entity iteration
//! follows write order the way SQLite returns rows by rowid: replacing an entity moves it to the
//! end, as `INSERT OR REPLACE` does.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::SightlineError,
    properties::{Entity, NodeSet, ObservationUpdate, Relation},
    query::GraphSource,
};

#[derive(Debug, Default)]
struct GraphState {
    entities: BTreeMap<String, Entity>,
    order: Vec<String>,
    relations: Vec<(u64, Relation)>,
    next_relation_id: u64,
}

impl GraphState {
    fn ordered_entities(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }
}

#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> MemoryGraph {
        MemoryGraph::default()
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.state.read().relations.len()
    }
}

impl GraphSource for MemoryGraph {
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<(), SightlineError> {
        let mut state = self.state.write();
        for entity in entities {
            if state
                .entities
                .insert(entity.name.clone(), entity.clone())
                .is_some()
            {
                state.order.retain(|name| name != &entity.name);
            }
            state.order.push(entity.name.clone());
        }
        Ok(())
    }

    async fn append_relations(&self, relations: &[Relation]) -> Result<(), SightlineError> {
        let mut state = self.state.write();
        for relation in relations {
            state.next_relation_id += 1;
            let id = state.next_relation_id;
            state.relations.push((id, relation.clone()));
        }
        Ok(())
    }

    async fn append_observations(&self, updates: &[ObservationUpdate]) -> Result<(), SightlineError> {
        let mut state = self.state.write();
        for update in updates {
            match state.entities.get_mut(&update.entity_name) {
                Some(entity) => entity.observations.extend(update.contents.iter().cloned()),
                None => tracing::debug!(
                    "[MemoryGraph] skipping observations for missing entity '{}'",
                    update.entity_name
                ),
            }
        }
        Ok(())
    }

    async fn search_nodes(&self, query: &str) -> Result<Vec<Entity>, SightlineError> {
        let state = self.state.read();
        Ok(state
            .ordered_entities()
            .filter(|e| e.matches_text(query))
            .cloned()
            .collect())
    }

    async fn open_nodes(&self, names: &[String]) -> Result<NodeSet, SightlineError> {
        if names.is_empty() {
            return Ok(NodeSet::default());
        }
        let wanted = names.iter().map(String::as_str).collect::<BTreeSet<&str>>();
        let state = self.state.read();
        let entities = state
            .ordered_entities()
            .filter(|e| wanted.contains(e.name.as_str()))
            .cloned()
            .collect();
        let relations = state
            .relations
            .iter()
            .filter(|(_, r)| wanted.contains(r.from.as_str()) || wanted.contains(r.to.as_str()))
            .map(|(_, r)| r.clone())
            .collect();
        Ok(NodeSet {
            entities,
            relations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::HAS_PREVIOUS_VERSION;

    #[tokio::test]
    async fn replacing_an_entity_moves_it_last() {
        let graph = MemoryGraph::new();
        graph
            .upsert_entities(&[Entity::new("A", "T"), Entity::new("B", "T")])
            .await
            .unwrap();
        graph
            .upsert_entities(&[Entity::new("A", "T").with_observations(["v2"])])
            .await
            .unwrap();

        let found = graph.search_nodes("T").await.unwrap();
        let names = found.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(found[1].observations, vec!["v2"]);
        assert_eq!(graph.entity_count(), 2);
    }

    #[tokio::test]
    async fn open_nodes_returns_dangling_relations_too() {
        let graph = MemoryGraph::new();
        graph.upsert_entities(&[Entity::new("A", "T")]).await.unwrap();
        graph
            .append_relations(&[
                Relation::new("A", "Ghost", HAS_PREVIOUS_VERSION),
                Relation::new("X", "Y", HAS_PREVIOUS_VERSION),
            ])
            .await
            .unwrap();

        let nodes = graph.open_nodes(&["A".to_string()]).await.unwrap();
        assert_eq!(nodes.entities.len(), 1);
        assert_eq!(nodes.relations, vec![Relation::new("A", "Ghost", HAS_PREVIOUS_VERSION)]);
        assert_eq!(graph.relation_count(), 2);
    }

    #[tokio::test]
    async fn observations_on_missing_entity_are_ignored() {
        let graph = MemoryGraph::new();
        graph
            .append_observations(&[ObservationUpdate {
                entity_name: "Nope".to_string(),
                contents: vec!["x".to_string()],
            }])
            .await
            .unwrap();
        assert_eq!(graph.entity_count(), 0);
        assert!(graph.open_node("Nope").await.unwrap().is_none());
    }
}
