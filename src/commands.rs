use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

use crate::{
    aggregate::{DiffResult, ValidationResult},
    error::SightlineError,
    properties::{Entity, NodeSet, ObservationUpdate, Relation},
    record::{
        DiffRecord, ReasoningRecord, ReasoningStep, SnapshotCapture, SnapshotComparison,
        SnapshotRecord, ValidationOutcome, ValidationRecord,
    },
};

/// A named tool exposed at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescription {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOLS: &[ToolDescription] = &[
    ToolDescription {
        name: "createEntities",
        description: "Create or replace entities by name",
    },
    ToolDescription {
        name: "createRelations",
        description: "Append directed, typed relations between entity names",
    },
    ToolDescription {
        name: "addObservations",
        description: "Append observations to existing entities",
    },
    ToolDescription {
        name: "searchNodes",
        description: "Case-sensitive substring search over entity name, type and observations",
    },
    ToolDescription {
        name: "openNodes",
        description: "Fetch entities by name together with every relation touching them",
    },
    ToolDescription {
        name: "getSnapshotHistory",
        description: "Snapshot ids from the given snapshot back through its previous versions",
    },
    ToolDescription {
        name: "getValidationResults",
        description: "Validation outcomes recorded for a snapshot",
    },
    ToolDescription {
        name: "getSnapshotDiffs",
        description: "Comparison results in which a snapshot took part",
    },
    ToolDescription {
        name: "recordSnapshot",
        description: "Record a captured page and link it to the previous capture of its URL",
    },
    ToolDescription {
        name: "recordValidation",
        description: "Record a validation outcome for a snapshot",
    },
    ToolDescription {
        name: "recordDiff",
        description: "Record a comparison between two snapshots",
    },
    ToolDescription {
        name: "recordReasoningStep",
        description: "Record a reasoning note, optionally about a snapshot",
    },
    ToolDescription {
        name: "listTools",
        description: "List the available tools",
    },
];

#[derive(Debug, Clone, Deserialize)]
struct EntitiesParams {
    entities: Vec<Entity>,
}

#[derive(Debug, Clone, Deserialize)]
struct RelationsParams {
    relations: Vec<Relation>,
}

#[derive(Debug, Clone, Deserialize)]
struct ObservationsParams {
    observations: Vec<ObservationUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryParams {
    query: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NamesParams {
    names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotParams {
    snapshot_id: String,
}

/// Operations callable at the tool-dispatch boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateEntities(Vec<Entity>),
    CreateRelations(Vec<Relation>),
    AddObservations(Vec<ObservationUpdate>),
    SearchNodes(String),
    OpenNodes(Vec<String>),
    GetSnapshotHistory(String),
    GetValidationResults(String),
    GetSnapshotDiffs(String),
    RecordSnapshot(SnapshotCapture),
    RecordValidation(ValidationOutcome),
    RecordDiff(SnapshotComparison),
    RecordReasoningStep(ReasoningStep),
    ListTools,
}

fn params<T: for<'de> Deserialize<'de>>(method: &str, params: Value) -> Result<T, SightlineError> {
    serde_json::from_value(params)
        .map_err(|e| SightlineError::Command(format!("invalid params for {method}: {e}")))
}

impl Op {
    /// Decode a method name and its params. MCP-style `tools/call` (`{name, arguments}`) and
    /// `tools/list` are accepted as aliases.
    pub fn from_request(method: &str, raw: Value) -> Result<Op, SightlineError> {
        let op = match method {
            "createEntities" => Op::CreateEntities(params::<EntitiesParams>(method, raw)?.entities),
            "createRelations" => {
                Op::CreateRelations(params::<RelationsParams>(method, raw)?.relations)
            }
            "addObservations" => {
                Op::AddObservations(params::<ObservationsParams>(method, raw)?.observations)
            }
            "searchNodes" => Op::SearchNodes(params::<QueryParams>(method, raw)?.query),
            "openNodes" => Op::OpenNodes(params::<NamesParams>(method, raw)?.names),
            "getSnapshotHistory" => {
                Op::GetSnapshotHistory(params::<SnapshotParams>(method, raw)?.snapshot_id)
            }
            "getValidationResults" => {
                Op::GetValidationResults(params::<SnapshotParams>(method, raw)?.snapshot_id)
            }
            "getSnapshotDiffs" => {
                Op::GetSnapshotDiffs(params::<SnapshotParams>(method, raw)?.snapshot_id)
            }
            "recordSnapshot" => Op::RecordSnapshot(params(method, raw)?),
            "recordValidation" => Op::RecordValidation(params(method, raw)?),
            "recordDiff" => Op::RecordDiff(params(method, raw)?),
            "recordReasoningStep" => Op::RecordReasoningStep(params(method, raw)?),
            "listTools" | "tools/list" => Op::ListTools,
            "tools/call" => {
                let name = raw
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SightlineError::Command("tools/call requires a name".to_string()))?
                    .to_string();
                if name == "tools/call" {
                    return Err(SightlineError::UnknownTool(name));
                }
                let arguments = raw.get("arguments").cloned().unwrap_or(Value::Null);
                return Op::from_request(&name, arguments);
            }
            other => return Err(SightlineError::UnknownTool(other.to_string())),
        };
        Ok(op)
    }

    /// Whether the operation writes to the store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Op::CreateEntities(_)
                | Op::CreateRelations(_)
                | Op::AddObservations(_)
                | Op::RecordSnapshot(_)
                | Op::RecordValidation(_)
                | Op::RecordDiff(_)
                | Op::RecordReasoningStep(_)
        )
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Op::CreateEntities(v) => write!(
                f,
                "CreateEntities({})",
                v.iter()
                    .map(|e| e.name.clone())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
            Op::CreateRelations(v) => write!(f, "CreateRelations({} relations)", v.len()),
            Op::AddObservations(v) => write!(
                f,
                "AddObservations({})",
                v.iter()
                    .map(|u| u.entity_name.clone())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
            Op::SearchNodes(q) => write!(f, "SearchNodes({q})"),
            Op::OpenNodes(names) => write!(f, "OpenNodes({})", names.join(", ")),
            Op::GetSnapshotHistory(id) => write!(f, "GetSnapshotHistory({id})"),
            Op::GetValidationResults(id) => write!(f, "GetValidationResults({id})"),
            Op::GetSnapshotDiffs(id) => write!(f, "GetSnapshotDiffs({id})"),
            Op::RecordSnapshot(c) => write!(f, "RecordSnapshot({})", c.url),
            Op::RecordValidation(v) => {
                write!(f, "RecordValidation({}, pass: {})", v.snapshot_id, v.pass)
            }
            Op::RecordDiff(d) => write!(
                f,
                "RecordDiff({} -> {})",
                d.source_snapshot_id, d.target_snapshot_id
            ),
            Op::RecordReasoningStep(_) => write!(f, "RecordReasoningStep"),
            Op::ListTools => write!(f, "ListTools"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpResult {
    Ok,
    Entities(Vec<Entity>),
    Nodes(NodeSet),
    History(Vec<String>),
    Validations(Vec<ValidationResult>),
    Diffs(Vec<DiffResult>),
    Snapshot(SnapshotRecord),
    Validation(ValidationRecord),
    Diff(DiffRecord),
    Reasoning(ReasoningRecord),
    Tools(&'static [ToolDescription]),
}

impl OpResult {
    /// The JSON payload returned to the caller. Acknowledgements are `{"ok": true}`.
    pub fn into_value(self) -> Result<Value, SightlineError> {
        let value = match self {
            OpResult::Ok => serde_json::json!({ "ok": true }),
            OpResult::Entities(v) => serde_json::to_value(v)?,
            OpResult::Nodes(v) => serde_json::to_value(v)?,
            OpResult::History(v) => serde_json::to_value(v)?,
            OpResult::Validations(v) => serde_json::to_value(v)?,
            OpResult::Diffs(v) => serde_json::to_value(v)?,
            OpResult::Snapshot(v) => serde_json::to_value(v)?,
            OpResult::Validation(v) => serde_json::to_value(v)?,
            OpResult::Diff(v) => serde_json::to_value(v)?,
            OpResult::Reasoning(v) => serde_json::to_value(v)?,
            OpResult::Tools(v) => serde_json::to_value(v)?,
        };
        Ok(value)
    }
}

impl Display for OpResult {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OpResult::Ok => write!(f, "Ok"),
            OpResult::Entities(v) => write!(f, "Entities({})", v.len()),
            OpResult::Nodes(n) => write!(
                f,
                "Nodes({} entities, {} relations)",
                n.entities.len(),
                n.relations.len()
            ),
            OpResult::History(v) => write!(f, "History({})", v.join(" <- ")),
            OpResult::Validations(v) => write!(f, "Validations({})", v.len()),
            OpResult::Diffs(v) => write!(f, "Diffs({})", v.len()),
            OpResult::Snapshot(r) => write!(f, "Snapshot({})", r.snapshot_id),
            OpResult::Validation(r) => write!(f, "Validation({})", r.validation_id),
            OpResult::Diff(r) => write!(f, "Diff({})", r.diff_id),
            OpResult::Reasoning(r) => write!(f, "Reasoning({})", r.step_id),
            OpResult::Tools(v) => write!(f, "Tools({})", v.len()),
        }
    }
}
