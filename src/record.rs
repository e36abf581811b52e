//! Turn collaborator outputs (a captured page, a validation run, a DOM/style diff, a reasoning
//! note) into entities and relations.
//!
//! The collaborators' payloads are opaque here: a DOM string, a style string, a base64 screenshot
//! and lists of added/removed/changed elements are summarized into observations, never parsed.

use serde::{Deserialize, Serialize};
use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime};
use uuid::Uuid;

use crate::{
    error::SightlineError,
    lineage::link_previous_version,
    observation::{self, Observation},
    properties::{
        Entity, EntityKind, Relation, COMPARES_SOURCE_SNAPSHOT, COMPARES_TARGET_SNAPSHOT,
        PRODUCES_VALIDATION_RESULT, REASONS_ABOUT,
    },
    query::GraphSource,
};

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// UTC now as `YYYY-MM-DDTHH:MM:SS.mmmZ`. Fixed width, so lexical order is chronological.
pub fn now_timestamp() -> Result<String, SightlineError> {
    Ok(OffsetDateTime::now_utc().format(TIMESTAMP_FORMAT)?)
}

fn timestamp_or_now(given: &Option<String>) -> Result<String, SightlineError> {
    match given {
        Some(timestamp) => Ok(timestamp.clone()),
        None => now_timestamp(),
    }
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A rendered page as produced by the capture collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCapture {
    pub url: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub captured_at: Option<String>,
    #[serde(default)]
    pub dom: Option<String>,
    #[serde(default)]
    pub styles: Option<String>,
    /// Base64-encoded image.
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_snapshot_id: Option<String>,
}

impl SnapshotCapture {
    /// The observation shared by every capture of the same page.
    pub fn source_observation(&self) -> String {
        Observation::new(observation::URL, &self.url).to_string()
    }

    fn to_entity(&self, snapshot_id: &str, timestamp: &str) -> Entity {
        let mut observations = vec![
            self.source_observation(),
            Observation::new(observation::TIMESTAMP, timestamp).to_string(),
        ];
        let sizes = [
            ("DOM length", &self.dom),
            ("Styles length", &self.styles),
            ("Screenshot base64 length", &self.screenshot),
            ("Text length", &self.text_content),
        ];
        for (key, payload) in sizes {
            if let Some(payload) = payload {
                observations.push(Observation::new(key, payload.len()).to_string());
            }
        }
        if let Some(viewport) = self.viewport {
            observations.push(
                Observation::new("Viewport", format!("{}x{}", viewport.width, viewport.height))
                    .to_string(),
            );
        }
        Entity::new(
            EntityKind::Snapshot.entity_name(snapshot_id),
            EntityKind::Snapshot.entity_type(),
        )
        .with_observations(observations)
    }
}

/// Persist a snapshot artifact and link it to the latest earlier capture of the same URL.
///
/// The caller must hold the store's write lock across this call; see
/// [`crate::lineage`] on the read-then-write race.
pub async fn record_snapshot<S: GraphSource>(
    source: &S,
    capture: &SnapshotCapture,
) -> Result<SnapshotRecord, SightlineError> {
    if capture.url.trim().is_empty() {
        return Err(SightlineError::Command(
            "recordSnapshot requires a non-empty url".to_string(),
        ));
    }
    let snapshot_id = capture.snapshot_id.clone().unwrap_or_else(fresh_id);
    let timestamp = timestamp_or_now(&capture.captured_at)?;
    let entity = capture.to_entity(&snapshot_id, &timestamp);

    let previous = link_previous_version(
        source,
        &entity,
        EntityKind::Snapshot,
        &capture.source_observation(),
    )
    .await?;
    tracing::info!(
        "Recorded snapshot {} of {} (previous: {:?})",
        snapshot_id,
        capture.url,
        previous
    );
    Ok(SnapshotRecord {
        snapshot_id,
        previous_snapshot_id: previous
            .as_deref()
            .and_then(|name| EntityKind::Snapshot.strip(name))
            .map(str::to_string),
    })
}

async fn require_snapshot<S: GraphSource>(source: &S, snapshot_id: &str) -> Result<(), SightlineError> {
    let name = EntityKind::Snapshot.entity_name(snapshot_id);
    match source.open_node(&name).await? {
        Some(_) => Ok(()),
        None => Err(SightlineError::NotFound(format!("Snapshot '{snapshot_id}'"))),
    }
}

/// Outcome of checking a snapshot against expectations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub snapshot_id: String,
    pub pass: bool,
    #[serde(default)]
    pub explanation: Vec<String>,
    #[serde(default)]
    pub validation_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub validation_id: String,
}

/// Persist a validation outcome for an existing snapshot.
pub async fn record_validation<S: GraphSource>(
    source: &S,
    outcome: &ValidationOutcome,
) -> Result<ValidationRecord, SightlineError> {
    require_snapshot(source, &outcome.snapshot_id).await?;
    let validation_id = outcome.validation_id.clone().unwrap_or_else(fresh_id);
    let timestamp = timestamp_or_now(&outcome.timestamp)?;
    let name = EntityKind::Validation.entity_name(&validation_id);

    let entity = Entity::new(name.clone(), EntityKind::Validation.entity_type()).with_observations([
        Observation::new(observation::PASS, outcome.pass),
        Observation::new(observation::TIMESTAMP, timestamp),
        Observation::new(observation::EXPLANATION, outcome.explanation.join("; ")),
    ]);
    let relation = Relation::new(
        EntityKind::Snapshot.entity_name(&outcome.snapshot_id),
        name,
        PRODUCES_VALIDATION_RESULT,
    );
    source.write_batch(&[entity], &[relation]).await?;
    tracing::info!(
        "Recorded validation {} for snapshot {} (pass: {})",
        validation_id,
        outcome.snapshot_id,
        outcome.pass
    );
    Ok(ValidationRecord { validation_id })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub selector: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleChange {
    pub selector: String,
    pub property: String,
    pub before: String,
    pub after: String,
}

/// Element and style differences between two snapshots, as computed by the diff collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotComparison {
    pub source_snapshot_id: String,
    pub target_snapshot_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub added_elements: Vec<String>,
    #[serde(default)]
    pub removed_elements: Vec<String>,
    #[serde(default)]
    pub changed_text: Vec<TextChange>,
    #[serde(default)]
    pub style_changes: Vec<StyleChange>,
    #[serde(default)]
    pub diff_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl SnapshotComparison {
    /// The caller's summary, or one derived from the change counts.
    pub fn summary(&self) -> String {
        match self.summary.as_deref().map(str::trim) {
            Some(summary) if !summary.is_empty() => summary.to_string(),
            _ => format!(
                "{} added, {} removed, {} text changes, {} style changes",
                self.added_elements.len(),
                self.removed_elements.len(),
                self.changed_text.len(),
                self.style_changes.len()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    pub diff_id: String,
    pub summary: String,
}

/// Persist a comparison result between two existing snapshots.
pub async fn record_diff<S: GraphSource>(
    source: &S,
    comparison: &SnapshotComparison,
) -> Result<DiffRecord, SightlineError> {
    require_snapshot(source, &comparison.source_snapshot_id).await?;
    require_snapshot(source, &comparison.target_snapshot_id).await?;
    let diff_id = comparison.diff_id.clone().unwrap_or_else(fresh_id);
    let timestamp = timestamp_or_now(&comparison.timestamp)?;
    let summary = comparison.summary();
    let name = EntityKind::Diff.entity_name(&diff_id);

    let mut observations = vec![
        Observation::new(observation::TIMESTAMP, timestamp),
        Observation::new(observation::SUMMARY, &summary),
        Observation::new(observation::SOURCE_SNAPSHOT_ID, &comparison.source_snapshot_id),
        Observation::new(observation::TARGET_SNAPSHOT_ID, &comparison.target_snapshot_id),
    ];
    if !comparison.added_elements.is_empty() {
        observations.push(Observation::new(
            "Added elements",
            comparison.added_elements.join(", "),
        ));
    }
    if !comparison.removed_elements.is_empty() {
        observations.push(Observation::new(
            "Removed elements",
            comparison.removed_elements.join(", "),
        ));
    }
    for change in comparison.style_changes.iter() {
        observations.push(Observation::new(
            "Style change",
            format!(
                "{} {}: '{}' -> '{}'",
                change.selector, change.property, change.before, change.after
            ),
        ));
    }

    let entity =
        Entity::new(name.clone(), EntityKind::Diff.entity_type()).with_observations(observations);
    let relations = [
        Relation::new(
            name.clone(),
            EntityKind::Snapshot.entity_name(&comparison.source_snapshot_id),
            COMPARES_SOURCE_SNAPSHOT,
        ),
        Relation::new(
            name,
            EntityKind::Snapshot.entity_name(&comparison.target_snapshot_id),
            COMPARES_TARGET_SNAPSHOT,
        ),
    ];
    source.write_batch(&[entity], &relations).await?;
    tracing::info!(
        "Recorded diff {} ({} -> {}): {}",
        diff_id,
        comparison.source_snapshot_id,
        comparison.target_snapshot_id,
        summary
    );
    Ok(DiffRecord { diff_id, summary })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub thought: String,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningRecord {
    pub step_id: String,
}

/// Persist a reasoning note, optionally attached to a snapshot. The snapshot need not exist.
pub async fn record_reasoning_step<S: GraphSource>(
    source: &S,
    step: &ReasoningStep,
) -> Result<ReasoningRecord, SightlineError> {
    let step_id = step.step_id.clone().unwrap_or_else(fresh_id);
    let name = EntityKind::Reasoning.entity_name(&step_id);
    let entity = Entity::new(name.clone(), EntityKind::Reasoning.entity_type()).with_observations([
        Observation::new(observation::TIMESTAMP, now_timestamp()?),
        Observation::new(observation::THOUGHT, &step.thought),
    ]);
    let relations = step
        .snapshot_id
        .iter()
        .map(|snapshot_id| {
            Relation::new(
                name.clone(),
                EntityKind::Snapshot.entity_name(snapshot_id),
                REASONS_ABOUT,
            )
        })
        .collect::<Vec<_>>();
    source.write_batch(&[entity], &relations).await?;
    Ok(ReasoningRecord { step_id })
}
