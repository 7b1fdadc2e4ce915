pub mod actor;
pub mod client;
pub mod commands;

pub use actor::{
    Connect, ConnectionManager, ConnectionManagerArgs, Disconnect, ForceReconnect, GetLinkStats,
    GetReconnectState, SendCommand, SetAutoReconnect,
};
pub use client::{RealtimeClient, RealtimeClientBuilder};
pub use commands::CommandChannel;
