//! Store, lineage and aggregation behavior against the SQLite backend.
#![cfg(feature = "service")]

mod common;

use common::open_test_db;
use sightline_core::{
    aggregate::{diffs_for, validation_results_for},
    db::{db_init, DbConnection},
    lineage::snapshot_history,
    properties::{Entity, ObservationUpdate, Relation, HAS_PREVIOUS_VERSION},
    query::GraphSource,
    record::{record_diff, record_snapshot, record_validation, SnapshotCapture, SnapshotComparison, ValidationOutcome},
    SightlineError,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use test_log::test;
use tracing_subscriber::{
    filter::LevelFilter,
    layer::{Context, SubscriberExt},
    Layer,
};

fn names(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|e| e.name.as_str()).collect()
}

/// Collects the names of spans that reach it.
struct SpanNames(Arc<Mutex<Vec<String>>>);

impl<S: tracing::Subscriber> Layer<S> for SpanNames {
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: Context<'_, S>,
    ) {
        self.0.lock().unwrap().push(attrs.metadata().name().to_string());
    }
}

fn store_spans_at(level: LevelFilter) -> Vec<String> {
    let names = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(SpanNames(names.clone()).with_filter(level));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    tracing::subscriber::with_default(subscriber, || {
        runtime.block_on(async {
            let temp_dir = TempDir::new().unwrap();
            let db = open_test_db(&temp_dir).await;
            db.upsert_entities(&[Entity::new("Snapshot_1", "artifact")]).await.unwrap();
            db.open_nodes(&["Snapshot_1".to_string()]).await.unwrap();
            db.search_nodes("Snapshot").await.unwrap();
            db.0.close().await;
        })
    });
    let recorded = names.lock().unwrap().clone();
    recorded
}

fn capture(url: &str, id: &str, captured_at: &str) -> SnapshotCapture {
    SnapshotCapture {
        url: url.to_string(),
        snapshot_id: Some(id.to_string()),
        captured_at: Some(captured_at.to_string()),
        ..Default::default()
    }
}

#[test(tokio::test)]
async fn test_create_entities_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    let entities = vec![
        Entity::new("Snapshot_A", "artifact").with_observations(["URL: https://a.dev"]),
        Entity::new("Snapshot_B", "artifact"),
    ];

    db.upsert_entities(&entities).await.unwrap();
    let once = db.open_nodes(&["Snapshot_A".to_string(), "Snapshot_B".to_string()]).await.unwrap();
    db.upsert_entities(&entities).await.unwrap();
    let twice = db.open_nodes(&["Snapshot_A".to_string(), "Snapshot_B".to_string()]).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(db.counts().await.unwrap(), (2, 0));
}

#[test(tokio::test)]
async fn test_observations_append_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    db.upsert_entities(&[Entity::new("Snapshot_A", "artifact").with_observations(["URL: u"])])
        .await
        .unwrap();

    for content in ["x", "y"] {
        db.append_observations(&[ObservationUpdate {
            entity_name: "Snapshot_A".to_string(),
            contents: vec![content.to_string()],
        }])
        .await
        .unwrap();
    }
    // Missing targets are a silent no-op.
    db.append_observations(&[ObservationUpdate {
        entity_name: "Snapshot_missing".to_string(),
        contents: vec!["z".to_string()],
    }])
    .await
    .unwrap();

    let (entity, _) = db.open_node("Snapshot_A").await.unwrap().unwrap();
    assert_eq!(entity.observations, vec!["URL: u", "x", "y"]);
    assert!(db.open_node("Snapshot_missing").await.unwrap().is_none());
}

#[test(tokio::test)]
async fn test_search_matches_name_type_and_observations() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    db.upsert_entities(&[
        Entity::new("Foo", "T").with_observations(["bar"]),
        Entity::new("Baz", "T"),
        Entity::new("Quote", "U").with_observations(["said \"hi\""]),
    ])
    .await
    .unwrap();

    assert_eq!(names(&db.search_nodes("bar").await.unwrap()), vec!["Foo"]);
    assert_eq!(names(&db.search_nodes("T").await.unwrap()), vec!["Foo", "Baz"]);
    assert_eq!(names(&db.search_nodes("\"hi\"").await.unwrap()), vec!["Quote"]);
    // Case-sensitive.
    assert!(db.search_nodes("BAR").await.unwrap().is_empty());
}

#[test(tokio::test)]
async fn test_open_nodes_round_trip_with_dangling_relations() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    let entity = Entity::new("Snapshot_1", "artifact").with_observations(["b", "a", "c"]);
    db.upsert_entities(std::slice::from_ref(&entity)).await.unwrap();
    db.append_relations(&[
        Relation::new("Snapshot_1", "Snapshot_gone", HAS_PREVIOUS_VERSION),
        Relation::new("Snapshot_1", "Snapshot_gone", HAS_PREVIOUS_VERSION),
    ])
    .await
    .unwrap();

    let nodes = db.open_nodes(&["Snapshot_1".to_string()]).await.unwrap();
    assert_eq!(nodes.entities, vec![entity]);
    // Relations are not deduplicated by triple.
    assert_eq!(nodes.relations.len(), 2);
    assert!(db.open_nodes(&[]).await.unwrap().entities.is_empty());
}

#[test(tokio::test)]
async fn test_lineage_chain_missing_and_cycles() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    db.upsert_entities(&[
        Entity::new("Snapshot_1", "artifact"),
        Entity::new("Snapshot_2", "artifact"),
        Entity::new("Snapshot_3", "artifact"),
        Entity::new("Snapshot_A", "artifact"),
        Entity::new("Snapshot_B", "artifact"),
    ])
    .await
    .unwrap();
    db.append_relations(&[
        Relation::new("Snapshot_3", "Snapshot_2", HAS_PREVIOUS_VERSION),
        Relation::new("Snapshot_2", "Snapshot_1", HAS_PREVIOUS_VERSION),
        Relation::new("Snapshot_A", "Snapshot_B", HAS_PREVIOUS_VERSION),
        Relation::new("Snapshot_B", "Snapshot_A", HAS_PREVIOUS_VERSION),
    ])
    .await
    .unwrap();

    assert_eq!(snapshot_history(&db, "3").await.unwrap(), vec!["3", "2", "1"]);
    assert_eq!(snapshot_history(&db, "1").await.unwrap(), vec!["1"]);
    assert_eq!(snapshot_history(&db, "nonexistent").await.unwrap(), vec!["nonexistent"]);
    assert_eq!(snapshot_history(&db, "A").await.unwrap(), vec!["A", "B"]);
}

#[test(tokio::test)]
async fn test_recorded_snapshot_links_to_latest_capture() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    let url = "https://example.com/page";

    // Recorded out of order: the later capture lands first.
    let t2 = record_snapshot(&db, &capture(url, "t2", "2024-01-02T00:00:00.000Z")).await.unwrap();
    let t1 = record_snapshot(&db, &capture(url, "t1", "2024-01-01T00:00:00.000Z")).await.unwrap();
    assert_eq!(t2.previous_snapshot_id, None);
    assert_eq!(t1.previous_snapshot_id.as_deref(), Some("t2"));

    let t3 = record_snapshot(&db, &capture(url, "t3", "2024-01-03T00:00:00.000Z")).await.unwrap();
    assert_eq!(t3.previous_snapshot_id.as_deref(), Some("t2"));

    // A different URL sharing a prefix is a different source.
    let other = record_snapshot(&db, &capture("https://example.com/page2", "o1", "2024-01-04T00:00:00.000Z"))
        .await
        .unwrap();
    assert_eq!(other.previous_snapshot_id, None);
    let t4 = record_snapshot(&db, &capture(url, "t4", "2024-01-05T00:00:00.000Z")).await.unwrap();
    assert_eq!(t4.previous_snapshot_id.as_deref(), Some("t3"));

    assert_eq!(snapshot_history(&db, "t4").await.unwrap(), vec!["t4", "t3", "t2"]);
}

#[test(tokio::test)]
async fn test_validations_and_diffs_aggregate() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    let url = "https://example.com";
    record_snapshot(&db, &capture(url, "s1", "2024-01-01T00:00:00.000Z")).await.unwrap();
    record_snapshot(&db, &capture(url, "s2", "2024-01-02T00:00:00.000Z")).await.unwrap();

    record_validation(
        &db,
        &ValidationOutcome {
            snapshot_id: "s1".to_string(),
            pass: true,
            explanation: vec!["h1 present".to_string(), "title matches".to_string()],
            validation_id: Some("v1".to_string()),
            timestamp: Some("2024-01-01T00:01:00.000Z".to_string()),
        },
    )
    .await
    .unwrap();
    // A hand-written outcome with no Pass observation.
    db.upsert_entities(&[Entity::new("Validation_v2", "outcome").with_observations(["noise"])])
        .await
        .unwrap();
    db.append_relations(&[Relation::new(
        "Snapshot_s1",
        "Validation_v2",
        "producesValidationResult",
    )])
    .await
    .unwrap();

    let validations = validation_results_for(&db, "s1").await.unwrap();
    assert_eq!(validations.len(), 2);
    assert!(validations[0].pass);
    assert_eq!(validations[0].explanation, "h1 present; title matches");
    assert_eq!(validations[1].validation_name, "Validation_v2");
    assert!(!validations[1].pass);
    assert_eq!(validations[1].timestamp, "");

    let diff = record_diff(
        &db,
        &SnapshotComparison {
            source_snapshot_id: "s1".to_string(),
            target_snapshot_id: "s2".to_string(),
            added_elements: vec!["div.banner".to_string()],
            diff_id: Some("d1".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(diff.summary, "1 added, 0 removed, 0 text changes, 0 style changes");

    let from_source = diffs_for(&db, "s1").await.unwrap();
    assert_eq!(from_source, diffs_for(&db, "s2").await.unwrap());
    assert_eq!(from_source.len(), 1);
    assert_eq!(from_source[0].diff_name, "Diff_d1");
    assert_eq!(from_source[0].source_snapshot_id, "s1");
    assert_eq!(from_source[0].target_snapshot_id, "s2");
}

#[test(tokio::test)]
async fn test_records_against_missing_snapshots_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    let err = record_validation(
        &db,
        &ValidationOutcome {
            snapshot_id: "ghost".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SightlineError::NotFound(_)));
    assert_eq!(db.counts().await.unwrap(), (0, 0));
}

#[test(tokio::test)]
async fn test_graph_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("persist.db");
    {
        let db = DbConnection(db_init(db_path.clone()).await.unwrap());
        db.upsert_entities(&[Entity::new("Snapshot_1", "artifact").with_observations(["URL: u"])])
            .await
            .unwrap();
        db.append_relations(&[Relation::new("Snapshot_1", "Snapshot_0", HAS_PREVIOUS_VERSION)])
            .await
            .unwrap();
        db.0.close().await;
    }

    let db = DbConnection(db_init(db_path).await.unwrap());
    assert_eq!(db.counts().await.unwrap(), (1, 1));
    let (entity, relations) = db.open_node("Snapshot_1").await.unwrap().unwrap();
    assert_eq!(entity.observations, vec!["URL: u"]);
    assert_eq!(relations, db.all_relations().await.unwrap());
}

#[test(tokio::test)]
async fn test_record_writes_entity_and_relations_together() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_test_db(&temp_dir).await;
    let url = "https://example.com";
    record_snapshot(&db, &capture(url, "s1", "2024-01-01T00:00:00.000Z")).await.unwrap();

    // The second capture of the same URL stages an edge; with the relations table gone the
    // whole batch must roll back.
    sqlx::query("DROP TABLE relations").execute(&db.0).await.unwrap();
    let err = record_snapshot(&db, &capture(url, "s2", "2024-01-02T00:00:00.000Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, SightlineError::Storage(_)));
    assert!(db.search_nodes("Snapshot_s2").await.unwrap().is_empty());

    let batch = db
        .write_batch(
            &[Entity::new("Snapshot_s3", "artifact")],
            &[Relation::new("Snapshot_s3", "Snapshot_s1", HAS_PREVIOUS_VERSION)],
        )
        .await;
    assert!(batch.is_err());
    assert!(db.search_nodes("Snapshot_s3").await.unwrap().is_empty());
    assert_eq!(names(&db.search_nodes("Snapshot_").await.unwrap()), vec!["Snapshot_s1"]);
}

#[test]
fn test_store_lookups_trace_at_debug_only() {
    let lookups = ["get_entities", "open_nodes", "search_nodes", "upsert_entities"];

    let at_info = store_spans_at(LevelFilter::INFO);
    assert!(
        at_info.iter().all(|name| !lookups.contains(&name.as_str())),
        "store spans leaked at INFO: {at_info:?}"
    );

    let at_debug = store_spans_at(LevelFilter::DEBUG);
    for lookup in lookups {
        assert!(at_debug.iter().any(|name| name == lookup), "missing span {lookup}: {at_debug:?}");
    }
}
