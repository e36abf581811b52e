//! # sightline-core
//!
//! An artifact knowledge graph and lineage engine for web-page capture tooling.
//!
//! Browser automation captures snapshots of pages, validates them, and compares them. This crate
//! stores those artifacts as named entities in a small graph of typed, directed relations and
//! answers the questions the tooling asks of it afterwards: what came before this snapshot, which
//! validations ran against it, which diffs it took part in.
//!
//! ## Overview
//!
//! - **Entities** have a unique name, a type, and an ordered list of free-text observations. Most
//!   observations are `Key: value` strings; see [`observation`].
//! - **Relations** are appended, never replaced, and may point at names that do not exist.
//! - **Namespaces** are name prefixes: `Snapshot_`, `Validation_`, `Diff_`, `Reasoning_`
//!   ([`properties::EntityKind`]).
//!
//! ## Architecture
//!
//! - **[`query`]**: the [`query::GraphSource`] trait every store implements
//! - **[`db`]**: the SQLite-backed store (`service` feature)
//! - **[`graph`]**: an in-memory store with the same semantics
//! - **[`lineage`]**: `hasPreviousVersion` chain walking and predecessor selection
//! - **[`aggregate`]**: validation and diff results reassembled from observations
//! - **[`record`]**: writing new snapshots, validations, diffs and reasoning steps
//! - **[`commands`]** and **[`service`]**: the tool-dispatch boundary and its JSON-RPC line protocol
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "service")]
//! # async fn run() -> Result<(), sightline_core::SightlineError> {
//! use sightline_core::{commands::Op, service::GraphService};
//!
//! let service = GraphService::open("sightline.db".into()).await?;
//! let history = service.handle(Op::GetSnapshotHistory("42".to_string())).await?;
//! println!("{history}");
//! # Ok(())
//! # }
//! ```
//!
//! Stores can be used directly as well:
//!
//! ```rust
//! use sightline_core::{graph::MemoryGraph, lineage::snapshot_history, properties::Entity, query::GraphSource};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), sightline_core::SightlineError> {
//! let graph = MemoryGraph::new();
//! graph.upsert_entities(&[Entity::new("Snapshot_1", "artifact")]).await?;
//! assert_eq!(snapshot_history(&graph, "1").await?, vec!["1".to_string()]);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod commands;
pub mod config;
#[cfg(feature = "service")]
pub mod db;
pub mod error;
pub mod graph;
pub mod lineage;
pub mod observation;
pub mod properties;
pub mod query;
pub mod record;
pub mod service;

pub use error::*;
