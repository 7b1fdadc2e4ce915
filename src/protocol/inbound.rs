use serde::Deserialize;
use serde::de::DeserializeOwned;
use sonic_rs::{JsonValueTrait, Value};

use crate::core::{RealtimeError, RealtimeResult};
use crate::store::{AlertRecord, ConnectionRecord, MetricsSnapshot};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WelcomePayload {
    pub message: Option<String>,
}

/// Full snapshot sent once after each successful open. Absent regions stay untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitialState {
    pub metrics: Option<MetricsSnapshot>,
    pub active_connections: Option<Vec<ConnectionRecord>>,
    pub alerts: Option<Vec<AlertRecord>>,
    pub blocked_ips: Option<Vec<String>>,
    pub port_status: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionsUpdate {
    pub active_connections: Option<Vec<ConnectionRecord>>,
    pub blocked_ips: Option<Vec<String>>,
    pub alerts: Option<Vec<AlertRecord>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertsUpdate {
    pub alerts: Vec<AlertRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PortResult {
    pub success: bool,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub message: Option<String>,
    pub port_status: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmergencyBlockResult {
    pub success: bool,
    pub blocked_ips: Vec<String>,
    pub message: Option<String>,
    pub port_status: Option<Value>,
}

/// Inbound frames, one variant per known `message_type`.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Welcome(WelcomePayload),
    InitialState(Box<InitialState>),
    MetricsUpdate(Box<MetricsSnapshot>),
    ConnectionsUpdate(ConnectionsUpdate),
    AlertsUpdate(AlertsUpdate),
    AlertUpdate(Box<AlertRecord>),
    PortStatus(Value),
    PortBlockResult(PortResult),
    PortUnblockResult(PortResult),
    EmergencyBlockResult(EmergencyBlockResult),
    Unknown { message_type: String },
}

impl InboundMessage {
    pub fn message_type(&self) -> &str {
        match self {
            InboundMessage::Welcome(_) => "welcome",
            InboundMessage::InitialState(_) => "initial_state",
            InboundMessage::MetricsUpdate(_) => "metrics_update",
            InboundMessage::ConnectionsUpdate(_) => "connections_update",
            InboundMessage::AlertsUpdate(_) => "alerts_update",
            InboundMessage::AlertUpdate(_) => "alert_update",
            InboundMessage::PortStatus(_) => "port_status",
            InboundMessage::PortBlockResult(_) => "port_block_result",
            InboundMessage::PortUnblockResult(_) => "port_unblock_result",
            InboundMessage::EmergencyBlockResult(_) => "emergency_block_result",
            InboundMessage::Unknown { message_type } => message_type,
        }
    }
}

/// Decoded `{message_type, data, error?}` envelope.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub message: InboundMessage,
    pub error: Option<String>,
}

fn parse_err(message_type: &str, error: impl std::fmt::Display) -> RealtimeError {
    RealtimeError::ParseFailed(format!("{message_type}: {error}"))
}

fn decode_data<T: DeserializeOwned>(message_type: &str, raw: &str) -> RealtimeResult<T> {
    sonic_rs::from_str(raw).map_err(|e| parse_err(message_type, e))
}

/// `alert_update` carries either `{"alert": {...}}` or the bare alert object.
fn decode_alert(message_type: &str, raw: &str) -> RealtimeResult<AlertRecord> {
    match sonic_rs::get(raw, &["alert"]) {
        Ok(inner) if inner.is_object() => decode_data(message_type, inner.as_raw_str()),
        Ok(_) => decode_data(message_type, raw),
        Err(e) if e.is_not_found() => decode_data(message_type, raw),
        Err(e) => Err(parse_err(message_type, e)),
    }
}

/// Decode one inbound text frame.
///
/// The tag is read lazily first; `data` is only deserialized for known tags, so
/// unknown message types never pay for (or fail on) their payload.
pub fn decode_frame(payload: &[u8]) -> RealtimeResult<InboundEnvelope> {
    let tag = sonic_rs::get(payload, &["message_type"])
        .map_err(|e| parse_err("envelope", e))?;
    let message_type = tag
        .as_str()
        .ok_or_else(|| parse_err("envelope", "message_type is not a string"))?
        .to_string();

    let error = sonic_rs::get(payload, &["error"])
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned));

    let data = match sonic_rs::get(payload, &["data"]) {
        Ok(lazy) => lazy,
        Err(e) if e.is_not_found() => {
            return Ok(InboundEnvelope {
                message: decode_message(message_type, "{}")?,
                error,
            });
        }
        Err(e) => return Err(parse_err(&message_type, e)),
    };
    let raw = match data.as_raw_str().trim() {
        "null" => "{}",
        raw => raw,
    };

    Ok(InboundEnvelope {
        message: decode_message(message_type, raw)?,
        error,
    })
}

fn decode_message(message_type: String, raw: &str) -> RealtimeResult<InboundMessage> {
    let tag = message_type.as_str();
    let message = match tag {
        "welcome" => InboundMessage::Welcome(decode_data(tag, raw)?),
        "initial_state" => InboundMessage::InitialState(Box::new(decode_data(tag, raw)?)),
        "metrics_update" => InboundMessage::MetricsUpdate(Box::new(decode_data(tag, raw)?)),
        "connections_update" => InboundMessage::ConnectionsUpdate(decode_data(tag, raw)?),
        "alerts_update" => InboundMessage::AlertsUpdate(decode_data(tag, raw)?),
        "alert_update" => InboundMessage::AlertUpdate(Box::new(decode_alert(tag, raw)?)),
        "port_status" => InboundMessage::PortStatus(decode_data(tag, raw)?),
        "port_block_result" => InboundMessage::PortBlockResult(decode_data(tag, raw)?),
        "port_unblock_result" => InboundMessage::PortUnblockResult(decode_data(tag, raw)?),
        "emergency_block_result" => InboundMessage::EmergencyBlockResult(decode_data(tag, raw)?),
        _ => InboundMessage::Unknown { message_type },
    };
    Ok(message)
}
