use crate::{
    error::SightlineError,
    properties::{Entity, NodeSet, ObservationUpdate, Relation},
};

/// The entity/relation store contract shared by the SQLite backend
/// ([`DbConnection`](crate::db::DbConnection)) and the in-process
/// [`MemoryGraph`](crate::graph::MemoryGraph).
///
/// Reads that match nothing return empty collections. Only a failure of the backing storage is
/// reported as an error.
pub trait GraphSource: Sync {
    /// Insert-or-replace by name. Every row of one call is durable before the future resolves.
    fn upsert_entities(
        &self,
        entities: &[Entity],
    ) -> impl std::future::Future<Output = Result<(), SightlineError>> + Send;

    /// Append relations without any uniqueness check.
    fn append_relations(
        &self,
        relations: &[Relation],
    ) -> impl std::future::Future<Output = Result<(), SightlineError>> + Send;

    /// Append observation strings to existing entities, preserving order. Targets that do not
    /// exist are skipped silently.
    fn append_observations(
        &self,
        updates: &[ObservationUpdate],
    ) -> impl std::future::Future<Output = Result<(), SightlineError>> + Send;

    /// Upsert `entities` and append `relations` as one write. Backends with transactions apply
    /// both or neither; the provided implementation issues the two calls in order.
    fn write_batch(
        &self,
        entities: &[Entity],
        relations: &[Relation],
    ) -> impl std::future::Future<Output = Result<(), SightlineError>> + Send {
        async move {
            self.upsert_entities(entities).await?;
            self.append_relations(relations).await
        }
    }

    /// Case-sensitive substring search over name, entity type and observations.
    fn search_nodes(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Entity>, SightlineError>> + Send;

    /// Entities named in `names`, plus every relation whose `from` or `to` is any of `names`.
    /// Relations come back in insertion order.
    fn open_nodes(
        &self,
        names: &[String],
    ) -> impl std::future::Future<Output = Result<NodeSet, SightlineError>> + Send;

    /// Single-entity convenience over [`GraphSource::open_nodes`]. `None` when the entity does
    /// not exist; the relation list may still be non-empty in the store in that case but is not
    /// returned.
    fn open_node(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<(Entity, Vec<Relation>)>, SightlineError>>
           + Send {
        let names = vec![name.to_string()];
        async move {
            let mut nodes = self.open_nodes(&names).await?;
            let Some(idx) = nodes.entities.iter().position(|e| e.name == names[0]) else {
                return Ok(None);
            };
            let entity = nodes.entities.swap_remove(idx);
            Ok(Some((entity, nodes.relations)))
        }
    }
}
