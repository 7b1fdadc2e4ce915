//! Inbound frame dispatch into the state store.

use crate::core::RealtimeError;
use crate::protocol::{InboundEnvelope, InboundMessage, PortResult, decode_frame};
use crate::store::{PortAction, PortActionKind, StateStore, log_merge};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Known message type; `changed` is false when write suppression kicked in.
    Applied { changed: bool },
    /// Unknown message type or informational frame.
    Ignored,
    /// Undecodable payload; dropped.
    Malformed,
}

/// Outcome plus the error behind it, for health accounting.
#[derive(Debug)]
pub struct RouteReport {
    pub outcome: RouteOutcome,
    /// Parse failure for `Malformed`, or the envelope's `error` as `ServerError`.
    pub error: Option<RealtimeError>,
}

/// Stateless dispatcher: one inbound frame, one store update.
#[derive(Clone, Debug)]
pub struct MessageRouter {
    store: StateStore,
}

impl MessageRouter {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Parse and dispatch. Never fails: parse errors are logged and reported as `Malformed`.
    pub fn route(&self, payload: &[u8]) -> RouteOutcome {
        self.route_frame(payload).outcome
    }

    pub fn route_frame(&self, payload: &[u8]) -> RouteReport {
        match decode_frame(payload) {
            Ok(envelope) => {
                let error = envelope.error.clone().map(RealtimeError::ServerError);
                RouteReport {
                    outcome: self.dispatch(envelope),
                    error,
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    class = ?e.class(),
                    bytes = payload.len(),
                    "dropping malformed frame"
                );
                RouteReport {
                    outcome: RouteOutcome::Malformed,
                    error: Some(e),
                }
            }
        }
    }

    pub fn dispatch(&self, envelope: InboundEnvelope) -> RouteOutcome {
        let InboundEnvelope { message, error } = envelope;
        if let Some(error) = error.map(RealtimeError::ServerError) {
            tracing::warn!(
                message_type = message.message_type(),
                error = %error,
                class = ?error.class(),
                "server reported error"
            );
        }

        let changed = match message {
            InboundMessage::Welcome(welcome) => {
                tracing::info!(
                    greeting = welcome.message.as_deref().unwrap_or_default(),
                    "telemetry service welcome"
                );
                return RouteOutcome::Ignored;
            }
            InboundMessage::InitialState(initial) => self.store.modify(|state| {
                let mut changed = false;
                if let Some(metrics) = initial.metrics {
                    changed |= state.set_metrics(metrics);
                }
                if let Some(connections) = initial.active_connections {
                    changed |= state.set_connections(connections);
                }
                if let Some(alerts) = initial.alerts {
                    changed |= state.set_alerts(alerts);
                }
                if let Some(blocked) = initial.blocked_ips {
                    let report = state.merge_blocked(&blocked);
                    log_merge(&report, state.blocked.len());
                    changed |= report.changed();
                }
                if let Some(status) = initial.port_status {
                    changed |= state.set_port_status(status);
                }
                changed
            }),
            InboundMessage::MetricsUpdate(metrics) => self.store.update_metrics(*metrics),
            InboundMessage::ConnectionsUpdate(update) => self.store.modify(|state| {
                let mut changed = false;
                if let Some(connections) = update.active_connections {
                    changed |= state.set_connections(connections);
                }
                if let Some(blocked) = update.blocked_ips {
                    let report = state.merge_blocked(&blocked);
                    log_merge(&report, state.blocked.len());
                    changed |= report.changed();
                }
                if let Some(alerts) = update.alerts {
                    changed |= state.set_alerts(alerts);
                }
                changed
            }),
            InboundMessage::AlertsUpdate(update) => self.store.update_alerts(update.alerts),
            InboundMessage::AlertUpdate(alert) => self.store.push_alert(*alert),
            InboundMessage::PortStatus(status) => self.store.update_port_status(status),
            InboundMessage::PortBlockResult(result) => {
                self.apply_port_result(PortActionKind::Block, result)
            }
            InboundMessage::PortUnblockResult(result) => {
                self.apply_port_result(PortActionKind::Unblock, result)
            }
            InboundMessage::EmergencyBlockResult(result) => self.store.modify(|state| {
                if !result.success {
                    tracing::warn!(
                        detail = result.message.as_deref().unwrap_or_default(),
                        "emergency block failed"
                    );
                }
                let report = state.merge_blocked(&result.blocked_ips);
                log_merge(&report, state.blocked.len());
                let mut changed = report.changed();
                if let Some(status) = result.port_status {
                    changed |= state.set_port_status(status);
                }
                changed
            }),
            InboundMessage::Unknown { message_type } => {
                tracing::warn!(%message_type, "ignoring unknown message type");
                return RouteOutcome::Ignored;
            }
        };

        RouteOutcome::Applied { changed }
    }

    fn apply_port_result(&self, kind: PortActionKind, result: PortResult) -> bool {
        if !result.success {
            tracing::warn!(
                ?kind,
                port = ?result.port,
                detail = result.message.as_deref().unwrap_or_default(),
                "port action rejected"
            );
        }
        let action = PortAction {
            kind,
            port: result.port,
            protocol: result.protocol,
            success: result.success,
            message: result.message,
        };
        self.store.record_port_action(action, result.port_status)
    }
}
