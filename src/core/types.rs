use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result alias for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Canonical error surface shared across the realtime core.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("{operation} timeout after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Transport not open: dropped {command}")]
    NotOpen { command: String },

    #[error("Circuit breaker open: retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("Invalid credentials for {username}")]
    InvalidCredentials { username: String },

    #[error("Storage error ({key}): {error}")]
    Storage { key: String, error: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Actor error: {0}")]
    ActorError(String),
}

/// Failure families; each one has its own recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout or abnormal close. Drives retry and circuit decisions.
    Transport,
    /// Malformed inbound frame. Logged and dropped.
    Protocol,
    /// Send while not open, or connect while the circuit is open.
    Policy,
    Auth,
    Storage,
    Internal,
}

impl RealtimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RealtimeError::ConnectionFailed(_)
            | RealtimeError::TransportError { .. }
            | RealtimeError::Timeout { .. } => ErrorClass::Transport,
            RealtimeError::ParseFailed(_) | RealtimeError::ServerError(_) => ErrorClass::Protocol,
            RealtimeError::NotOpen { .. } | RealtimeError::CircuitOpen { .. } => ErrorClass::Policy,
            RealtimeError::InvalidCredentials { .. } => ErrorClass::Auth,
            RealtimeError::Storage { .. } => ErrorClass::Storage,
            RealtimeError::Config(_) | RealtimeError::ActorError(_) => ErrorClass::Internal,
        }
    }
}

/// Lifecycle of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionLifecycleState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionLifecycleState {
    /// Open or Connecting: a transport exists and `connect()` must reuse it.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ConnectionLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Result of a `connect()` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new transport is being opened.
    Started,
    /// A transport already exists in Open or Connecting state and was reused.
    AlreadyActive,
    /// The circuit breaker is open and the cooldown has not elapsed.
    RefusedCircuitOpen { retry_in_ms: u64 },
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
            // Initial snapshots can carry a thousand blocked addresses plus connection tables.
            max_message_bytes: 8 * 1024 * 1024,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_taxonomy() {
        assert_eq!(
            RealtimeError::Timeout {
                operation: "connection",
                after_ms: 5000,
            }
            .class(),
            ErrorClass::Transport
        );
        assert_eq!(
            RealtimeError::ParseFailed("eof".into()).class(),
            ErrorClass::Protocol
        );
        assert_eq!(
            RealtimeError::NotOpen {
                command: "block_ip".into()
            }
            .class(),
            ErrorClass::Policy
        );
        assert_eq!(
            RealtimeError::CircuitOpen { retry_in_ms: 10 }.class(),
            ErrorClass::Policy
        );
        assert_eq!(
            RealtimeError::ServerError("stale".into()).class(),
            ErrorClass::Protocol
        );
        assert_eq!(
            RealtimeError::InvalidCredentials {
                username: "watch_desk".into()
            }
            .class(),
            ErrorClass::Auth
        );
    }

    #[test]
    fn timeout_names_the_operation_and_limit() {
        let error = RealtimeError::Timeout {
            operation: "connection",
            after_ms: 5000,
        };
        assert_eq!(error.to_string(), "connection timeout after 5000ms");
    }

    #[test]
    fn only_open_and_connecting_are_active() {
        assert!(ConnectionLifecycleState::Open.is_active());
        assert!(ConnectionLifecycleState::Connecting.is_active());
        assert!(!ConnectionLifecycleState::Closing.is_active());
        assert!(!ConnectionLifecycleState::Closed.is_active());
        assert!(!ConnectionLifecycleState::Idle.is_active());
    }
}
