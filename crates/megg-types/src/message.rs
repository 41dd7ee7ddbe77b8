//! The `{type, payload}` wire envelope.
//!
//! Inbound text frames are parsed into a [`Command`]; everything the service
//! sends back is an [`Outbound`] message wrapped in an [`Event`] that carries
//! its id and generation timestamp.
//!
//! | Inbound `type` | Payload |
//! |---|---|
//! | `calibration_request` | `{component}` |
//! | `work_process` | `{action, batch_id?, egg_count?}` |
//! | `get_status` | `{}` |
//! | `ping` | `{}` |
//!
//! Clients that send the fields at the top level instead of inside `payload`
//! are accepted as well.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::component::{CalibrationStatus, Component};
use crate::error::{MeggError, codes};
use crate::status::SystemStatus;
use crate::work::{BatchStats, MAX_BATCH_SIZE, WorkPhase};

// ────────────────────────────────────────────────────────────────────────────
// Inbound
// ────────────────────────────────────────────────────────────────────────────

/// Work-process actions carried by a `work_process` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkAction {
    StartBatch {
        batch_id: Option<String>,
        egg_count: Option<u32>,
    },
    StopProcessing,
    ResetProcess,
    GetStatus,
}

/// A well-formed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CalibrationRequest { component: Component },
    WorkProcess(WorkAction),
    GetStatus,
    Ping,
}

impl Command {
    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`MeggError::Protocol`] with one of `invalid_json`,
    /// `invalid_envelope`, `invalid_payload`, `unknown_command`,
    /// `unknown_component` or `unknown_action`.
    pub fn parse(text: &str) -> Result<Self, MeggError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| MeggError::protocol(codes::INVALID_JSON, "Invalid JSON format"))?;
        let Value::Object(mut envelope) = value else {
            return Err(MeggError::protocol(
                codes::INVALID_ENVELOPE,
                "Message must be a JSON object",
            ));
        };

        let kind = match envelope.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => {
                return Err(MeggError::protocol(
                    codes::INVALID_ENVELOPE,
                    "Message is missing a string \"type\" field",
                ));
            }
        };

        let payload = match envelope.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(Value::Null) | None => envelope,
            Some(_) => {
                return Err(MeggError::protocol(
                    codes::INVALID_ENVELOPE,
                    "\"payload\" must be an object",
                ));
            }
        };

        match kind.as_str() {
            "ping" => Ok(Command::Ping),
            "get_status" => Ok(Command::GetStatus),
            "calibration_request" => {
                let component = required_str(&payload, "component")?.parse()?;
                Ok(Command::CalibrationRequest { component })
            }
            "work_process" => parse_work_action(&payload).map(Command::WorkProcess),
            other => Err(MeggError::protocol(
                codes::UNKNOWN_COMMAND,
                format!("Unknown message type: {other}"),
            )),
        }
    }
}

fn required_str<'a>(payload: &'a Map<String, Value>, field: &str) -> Result<&'a str, MeggError> {
    payload.get(field).and_then(Value::as_str).ok_or_else(|| {
        MeggError::protocol(
            codes::INVALID_PAYLOAD,
            format!("Missing string field \"{field}\""),
        )
    })
}

fn parse_work_action(payload: &Map<String, Value>) -> Result<WorkAction, MeggError> {
    match required_str(payload, "action")? {
        "start_batch" => {
            let batch_id = match payload.get("batch_id") {
                None | Some(Value::Null) => None,
                Some(Value::String(id)) if !id.trim().is_empty() => Some(id.trim().to_string()),
                Some(_) => {
                    return Err(MeggError::protocol(
                        codes::INVALID_PAYLOAD,
                        "\"batch_id\" must be a non-empty string",
                    ));
                }
            };
            let egg_count = match payload.get("egg_count") {
                None | Some(Value::Null) => None,
                Some(v) => match v.as_u64() {
                    Some(n) if (1..=u64::from(MAX_BATCH_SIZE)).contains(&n) => Some(n as u32),
                    _ => {
                        return Err(MeggError::protocol(
                            codes::INVALID_PAYLOAD,
                            format!("\"egg_count\" must be an integer in 1..={MAX_BATCH_SIZE}"),
                        ));
                    }
                },
            };
            Ok(WorkAction::StartBatch {
                batch_id,
                egg_count,
            })
        }
        "stop_processing" => Ok(WorkAction::StopProcessing),
        "reset_process" => Ok(WorkAction::ResetProcess),
        "get_status" => Ok(WorkAction::GetStatus),
        other => Err(MeggError::protocol(
            codes::UNKNOWN_ACTION,
            format!("Unknown work process action: {other}"),
        )),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationUpdate {
    pub component: Component,
    pub status: CalibrationStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkProcessUpdate {
    pub phase: WorkPhase,
    pub batch_id: Option<String>,
    pub stats: BatchStats,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: Component,
    pub code: String,
    pub name: String,
}

/// Greeting sent to a client right after the WebSocket handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub message: String,
    pub version: String,
    pub api: String,
    pub components: Vec<ComponentInfo>,
    pub capabilities: Vec<String>,
}

impl ConnectionInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            message: "Connected to MEGG IoT controller".to_string(),
            version: version.into(),
            api: "websocket".to_string(),
            components: Component::ALL
                .into_iter()
                .map(|c| ComponentInfo {
                    id: c,
                    code: c.hardware_code().to_string(),
                    name: c.display_name().to_string(),
                })
                .collect(),
            capabilities: vec![
                "calibration".to_string(),
                "work_process".to_string(),
                "real_time_updates".to_string(),
            ],
        }
    }
}

/// Every message the service sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    CalibrationUpdate(CalibrationUpdate),
    WorkProcessUpdate(WorkProcessUpdate),
    Status(Box<SystemStatus>),
    Pong {},
    Error(ErrorPayload),
    Connection(ConnectionInfo),
}

impl Outbound {
    pub fn status(status: SystemStatus) -> Self {
        Self::Status(Box::new(status))
    }

    /// The client-facing form of a protocol or state error.
    pub fn error(err: &MeggError) -> Self {
        Self::Error(ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        })
    }

    /// Wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CalibrationUpdate(_) => "calibration_update",
            Self::WorkProcessUpdate(_) => "work_process_update",
            Self::Status(_) => "status",
            Self::Pong {} => "pong",
            Self::Error(_) => "error",
            Self::Connection(_) => "connection",
        }
    }
}

/// An outbound message stamped at generation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Emitting subsystem, e.g. `"megg-runtime::coordinator"`.
    pub source: String,
    pub payload: Outbound,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: Outbound) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Encode as `{"type": .., "payload": .., "timestamp": ..}`.
    pub fn to_wire(&self) -> Result<String, MeggError> {
        let mut value = serde_json::to_value(&self.payload)
            .map_err(|e| MeggError::Channel(format!("serialization error: {e}")))?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "timestamp".to_string(),
                Value::String(self.timestamp.to_rfc3339()),
            );
        }
        serde_json::to_string(&value)
            .map_err(|e| MeggError::Channel(format!("serialization error: {e}")))
    }
}
