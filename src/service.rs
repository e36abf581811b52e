//! # Graph Service
//!
//! [`GraphService`] owns the single store handle of a process and dispatches [`Op`]s against it.
//! It is the only component that should hold the handle: opening a second connection to the same
//! database file from elsewhere defeats the single-writer lock below.
//!
//! ## Consistency
//!
//! Every write operation runs under one async writer lock. Recording a snapshot searches for its
//! predecessor and then writes the `hasPreviousVersion` edge; holding the lock across both steps
//! means no other write from this service can slip in between. Reads take no lock.
//!
//! ## Line protocol
//!
//! [`GraphService::handle_line`] implements newline-delimited JSON-RPC 2.0: one request object per
//! line in, one response object per line out. Requests without an `id` are notifications and get
//! no response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    aggregate::{diffs_for, validation_results_for},
    commands::{Op, OpResult, TOOLS},
    error::{rpc_code, SightlineError},
    lineage::snapshot_history,
    query::GraphSource,
    record::{record_diff, record_reasoning_step, record_snapshot, record_validation},
};

#[cfg(feature = "service")]
use crate::db::{db_init, DbConnection};
#[cfg(feature = "service")]
use std::path::PathBuf;

pub struct GraphService<S: GraphSource> {
    source: Arc<S>,
    writer: Mutex<()>,
}

impl<S: GraphSource> GraphService<S> {
    pub fn new(source: S) -> GraphService<S> {
        GraphService {
            source: Arc::new(source),
            writer: Mutex::new(()),
        }
    }

    pub fn source(&self) -> Arc<S> {
        self.source.clone()
    }

    #[tracing::instrument(skip_all, fields(op = %op))]
    pub async fn handle(&self, op: Op) -> Result<OpResult, SightlineError> {
        let _guard = match op.is_write() {
            true => Some(self.writer.lock().await),
            false => None,
        };
        let source = self.source.as_ref();
        let result = match op {
            Op::CreateEntities(entities) => {
                source.upsert_entities(&entities).await?;
                OpResult::Ok
            }
            Op::CreateRelations(relations) => {
                source.append_relations(&relations).await?;
                OpResult::Ok
            }
            Op::AddObservations(updates) => {
                source.append_observations(&updates).await?;
                OpResult::Ok
            }
            Op::SearchNodes(query) => OpResult::Entities(source.search_nodes(&query).await?),
            Op::OpenNodes(names) => OpResult::Nodes(source.open_nodes(&names).await?),
            Op::GetSnapshotHistory(id) => OpResult::History(snapshot_history(source, &id).await?),
            Op::GetValidationResults(id) => {
                OpResult::Validations(validation_results_for(source, &id).await?)
            }
            Op::GetSnapshotDiffs(id) => OpResult::Diffs(diffs_for(source, &id).await?),
            Op::RecordSnapshot(capture) => {
                OpResult::Snapshot(record_snapshot(source, &capture).await?)
            }
            Op::RecordValidation(outcome) => {
                OpResult::Validation(record_validation(source, &outcome).await?)
            }
            Op::RecordDiff(comparison) => OpResult::Diff(record_diff(source, &comparison).await?),
            Op::RecordReasoningStep(step) => {
                OpResult::Reasoning(record_reasoning_step(source, &step).await?)
            }
            Op::ListTools => OpResult::Tools(TOOLS),
        };
        tracing::debug!("-> {}", result);
        Ok(result)
    }

    /// Decode and run one JSON-RPC request line. Returns the serialized response, or `None` for
    /// notifications and blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let request = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Unparsable request line: {}", e);
                // Valid JSON that is not a request object is an invalid request, not a parse error.
                let (id, code) = match serde_json::from_str::<Value>(line) {
                    Ok(value) => (
                        value.get("id").cloned().unwrap_or(Value::Null),
                        rpc_code::INVALID_REQUEST,
                    ),
                    Err(_) => (Value::Null, rpc_code::PARSE_ERROR),
                };
                return Some(RpcResponse::error(id, code, format!("{e}")).to_line());
            }
        };
        let Some(id) = request.id else {
            // Notification: run it, report nothing.
            if let Err(e) = self.dispatch(&request.method, request.params).await {
                tracing::warn!("Notification '{}' failed: {}", request.method, e);
            }
            return None;
        };
        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => RpcResponse::result(id, result),
            Err(e) => {
                tracing::warn!("Request '{}' failed: {}", request.method, e);
                RpcResponse::error(id, e.rpc_code(), e.to_string())
            }
        };
        Some(response.to_line())
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, SightlineError> {
        let op = Op::from_request(method, params.unwrap_or(Value::Null))?;
        self.handle(op).await?.into_value()
    }
}

#[cfg(feature = "service")]
impl GraphService<DbConnection> {
    /// Open the database at `db_path` (creating tables on first use) and wrap it in a service.
    pub async fn open(db_path: PathBuf) -> Result<GraphService<DbConnection>, SightlineError> {
        let pool = db_init(db_path).await?;
        Ok(GraphService::new(DbConnection(pool)))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> RpcResponse {
        RpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: String) -> RpcResponse {
        RpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }

    fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            Err(e) => format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"response serialization failed: {}"}}}}"#,
                rpc_code::INTERNAL_ERROR,
                e.to_string().replace('"', "'")
            ),
        }
    }
}
