//! Cloneable handle over the connection manager actor and the state store.

use std::sync::Arc;

use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef};
use tokio::sync::watch;

use crate::config::RealtimeConfig;
use crate::core::{
    ConnectOutcome, LinkStats, RealtimeError, RealtimeResult, ReconnectState, SharedClock,
    SystemClock,
};
use crate::protocol::OutboundCommand;
use crate::storage::{MemoryStorage, SharedStorage};
use crate::store::{DashboardState, StateStore};
use crate::transport::{TungsteniteTransport, WsTransport};
use crate::ws::actor::{
    Connect, ConnectionManager, ConnectionManagerArgs, Disconnect, ForceReconnect, GetLinkStats,
    GetReconnectState, SendCommand, SetAutoReconnect,
};
use crate::ws::commands::CommandChannel;

fn map_send_error<M>(err: SendError<M, RealtimeError>) -> RealtimeError {
    match err {
        SendError::HandlerError(e) => e,
        _ => RealtimeError::ActorError("connection manager unavailable".into()),
    }
}

pub struct RealtimeClientBuilder<T: WsTransport = TungsteniteTransport> {
    config: RealtimeConfig,
    transport: T,
    store: Option<StateStore>,
    storage: Option<SharedStorage>,
    clock: Option<SharedClock>,
}

impl RealtimeClientBuilder<TungsteniteTransport> {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            transport: TungsteniteTransport::default(),
            store: None,
            storage: None,
            clock: None,
        }
    }
}

impl<T: WsTransport> RealtimeClientBuilder<T> {
    pub fn transport<U: WsTransport>(self, transport: U) -> RealtimeClientBuilder<U> {
        RealtimeClientBuilder {
            config: self.config,
            transport,
            store: self.store,
            storage: self.storage,
            clock: self.clock,
        }
    }

    /// Share an existing store, e.g. with an `AuthService`.
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to an in-memory map, so preferences do not outlive the process.
    pub fn storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the config and start the manager. Does not connect.
    pub fn spawn(self) -> RealtimeResult<RealtimeClient<T>> {
        let config = self.config.validated()?;
        let store = self.store.unwrap_or_default();
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as SharedStorage);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as SharedClock);

        let actor = ConnectionManager::spawn(ConnectionManagerArgs {
            config,
            transport: self.transport,
            store: store.clone(),
            storage,
            clock,
        });
        Ok(RealtimeClient { actor, store })
    }
}

/// Entry point for dashboards: connection control, commands and state access.
#[derive(Clone)]
pub struct RealtimeClient<T: WsTransport = TungsteniteTransport> {
    actor: ActorRef<ConnectionManager<T>>,
    store: StateStore,
}

impl RealtimeClient<TungsteniteTransport> {
    pub fn builder(config: RealtimeConfig) -> RealtimeClientBuilder<TungsteniteTransport> {
        RealtimeClientBuilder::new(config)
    }
}

impl<T: WsTransport> RealtimeClient<T> {
    /// Idempotent: an open or connecting link is reused.
    pub async fn connect(&self) -> RealtimeResult<ConnectOutcome> {
        self.actor.ask(Connect).await.map_err(map_send_error)
    }

    pub async fn disconnect(&self) -> RealtimeResult<()> {
        self.actor.ask(Disconnect).await.map_err(map_send_error)
    }

    pub async fn force_reconnect(&self) -> RealtimeResult<ConnectOutcome> {
        self.actor.ask(ForceReconnect).await.map_err(map_send_error)
    }

    /// Fails with `NotOpen` unless the link is open; nothing is queued.
    pub async fn send(&self, command: OutboundCommand) -> RealtimeResult<()> {
        self.actor
            .ask(SendCommand(command))
            .await
            .map_err(map_send_error)
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) -> RealtimeResult<()> {
        self.actor
            .ask(SetAutoReconnect(enabled))
            .await
            .map_err(map_send_error)
    }

    pub async fn reconnect_state(&self) -> RealtimeResult<ReconnectState> {
        self.actor.ask(GetReconnectState).await.map_err(map_send_error)
    }

    pub async fn link_stats(&self) -> RealtimeResult<LinkStats> {
        self.actor.ask(GetLinkStats).await.map_err(map_send_error)
    }

    pub fn commands(&self) -> CommandChannel<T> {
        CommandChannel::new(self.clone())
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> DashboardState {
        self.store.snapshot()
    }

    /// Wait until `predicate` holds for the current state.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&DashboardState) -> bool,
    ) -> RealtimeResult<DashboardState> {
        let mut rx = self.store.subscribe();
        rx.wait_for(predicate)
            .await
            .map(|state| state.clone())
            .map_err(|_| RealtimeError::ActorError("state store dropped".into()))
    }

    /// Stop the manager; open links are aborted without a close frame.
    pub async fn shutdown(&self) -> RealtimeResult<()> {
        self.actor
            .stop_gracefully()
            .await
            .map_err(|_| RealtimeError::ActorError("connection manager already stopped".into()))
    }
}
