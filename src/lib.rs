//! Kameo-based realtime link and state sync for the network-security dashboard.

pub mod auth;
pub mod config;
pub mod core;
pub mod protocol;
pub mod router;
pub mod storage;
pub mod store;
pub mod testing;
pub mod transport;
pub mod ws;

pub use auth::{AuthService, CredentialTable, LoginTelemetry};
pub use config::{Environment, RealtimeConfig};
pub use core::{
    BackoffPolicy, ConnectOutcome, ConnectionLifecycleState, ErrorClass, RealtimeError,
    RealtimeResult, ReconnectState,
};
pub use protocol::{InboundMessage, OutboundCommand};
pub use router::{MessageRouter, RouteOutcome, RouteReport};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};
pub use store::{DashboardState, StateStore};
pub use ws::{CommandChannel, RealtimeClient, RealtimeClientBuilder};
