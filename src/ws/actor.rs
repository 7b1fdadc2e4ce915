//! Connection manager actor.
//!
//! The actor is the single owner of the telemetry link. Socket IO, connect
//! handshakes and timers run in spawned tasks that report back through
//! [`LinkEvent`]s, so every state transition happens inside one mailbox.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::core::{
    BackoffPolicy, CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL, ConnectOutcome,
    ConnectionLifecycleState, ErrorClass, LinkHealth, LinkStats, RealtimeError, RealtimeResult,
    ReconnectState, SharedClock, WsFrame, data_bytes,
};
use crate::protocol::OutboundCommand;
use crate::router::{MessageRouter, RouteOutcome};
use crate::storage::{KEY_AUTO_RECONNECT, SharedStorage, read_bool, write_bool};
use crate::store::{ConnectionSnapshot, StateStore};
use crate::transport::WsTransport;

/// Upper bound on flushing the clean close frame during `disconnect()`.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ConnectionManagerArgs<T: WsTransport> {
    pub config: RealtimeConfig,
    pub transport: T,
    pub store: StateStore,
    pub storage: SharedStorage,
    pub clock: SharedClock,
}

pub struct ConnectionManager<T: WsTransport> {
    config: RealtimeConfig,
    policy: BackoffPolicy,
    transport: T,
    router: MessageRouter,
    store: StateStore,
    storage: SharedStorage,
    clock: SharedClock,
    actor_ref: ActorRef<Self>,
    lifecycle: ConnectionLifecycleState,
    /// Set from the moment a handshake is spawned until it opens or fails.
    is_connecting: bool,
    /// Bumped for every new attempt and on disconnect; stale link events are dropped.
    generation: u64,
    reconnect: ReconnectState,
    auto_reconnect: bool,
    /// Auto-reconnect was switched off by a circuit trip rather than by the user.
    suspended_by_circuit: bool,
    last_error: Option<String>,
    endpoint: Option<String>,
    writer: Option<T::Writer>,
    connect_task: Option<JoinHandle<()>>,
    connect_timeout: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    timer_token: u64,
    health: LinkHealth,
}

impl<T: WsTransport> Actor for ConnectionManager<T> {
    type Args = ConnectionManagerArgs<T>;
    type Error = RealtimeError;

    fn name() -> &'static str {
        "ConnectionManager"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> RealtimeResult<Self> {
        let ConnectionManagerArgs {
            config,
            transport,
            store,
            storage,
            clock,
        } = args;

        let policy = config.backoff.normalized();
        let auto_reconnect = read_bool(storage.as_ref(), KEY_AUTO_RECONNECT)
            .unwrap_or(config.auto_reconnect_default);
        let reconnect = ReconnectState {
            backoff_delay_ms: policy.base_delay_ms,
            ..ReconnectState::default()
        };

        let manager = Self {
            policy,
            transport,
            router: MessageRouter::new(store.clone()),
            store,
            storage,
            clock,
            actor_ref,
            lifecycle: ConnectionLifecycleState::Idle,
            is_connecting: false,
            generation: 0,
            reconnect,
            auto_reconnect,
            suspended_by_circuit: false,
            last_error: None,
            endpoint: None,
            writer: None,
            connect_task: None,
            connect_timeout: None,
            reader_task: None,
            reconnect_timer: None,
            timer_token: 0,
            health: LinkHealth::new(),
            config,
        };
        manager.publish();
        Ok(manager)
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> RealtimeResult<()> {
        self.cancel_reconnect_timer();
        self.teardown_transport();
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "ConnectionManager panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Open the link unless one is already open or connecting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connect;

/// Clean close (code 1000); never followed by automatic reconnection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnect;

/// Reset circuit breaker and backoff, re-enable auto-reconnect, connect now.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceReconnect;

#[derive(Debug, Clone)]
pub struct SendCommand(pub OutboundCommand);

#[derive(Debug, Clone, Copy)]
pub struct SetAutoReconnect(pub bool);

#[derive(Debug, Clone, Copy, Default)]
pub struct GetReconnectState;

#[derive(Debug, Clone, Copy, Default)]
pub struct GetLinkStats;

/// Reports from spawned IO and timer tasks.
#[doc(hidden)]
pub enum LinkEvent<T: WsTransport> {
    Opened {
        generation: u64,
        reader: T::Reader,
        writer: T::Writer,
    },
    Failed {
        generation: u64,
        error: RealtimeError,
    },
    Frame {
        generation: u64,
        frame: WsFrame,
    },
    Closed {
        generation: u64,
        code: u16,
        reason: String,
    },
    ConnectTimeout {
        generation: u64,
    },
    ReconnectDue {
        token: u64,
    },
}

impl<T: WsTransport> KameoMessage<Connect> for ConnectionManager<T> {
    type Reply = RealtimeResult<ConnectOutcome>;

    async fn handle(&mut self, _msg: Connect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        Ok(self.handle_connect())
    }
}

impl<T: WsTransport> KameoMessage<Disconnect> for ConnectionManager<T> {
    type Reply = RealtimeResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_disconnect().await;
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<ForceReconnect> for ConnectionManager<T> {
    type Reply = RealtimeResult<ConnectOutcome>;

    async fn handle(
        &mut self,
        _msg: ForceReconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        info!(
            attempt = self.reconnect.attempt_count,
            circuit_open = self.reconnect.circuit_open,
            "force reconnect requested"
        );
        self.cancel_reconnect_timer();
        self.close_current("force reconnect").await;

        self.reconnect.force_reset(&self.policy);
        self.suspended_by_circuit = false;
        self.auto_reconnect = true;
        write_bool(self.storage.as_ref(), KEY_AUTO_RECONNECT, true);
        self.last_error = None;

        Ok(self.handle_connect())
    }
}

impl<T: WsTransport> KameoMessage<SendCommand> for ConnectionManager<T> {
    type Reply = RealtimeResult<()>;

    async fn handle(
        &mut self,
        msg: SendCommand,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.send_command(msg.0).await
    }
}

impl<T: WsTransport> KameoMessage<SetAutoReconnect> for ConnectionManager<T> {
    type Reply = RealtimeResult<()>;

    async fn handle(
        &mut self,
        msg: SetAutoReconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let enabled = msg.0;
        self.auto_reconnect = enabled;
        self.suspended_by_circuit = false;
        write_bool(self.storage.as_ref(), KEY_AUTO_RECONNECT, enabled);
        if !enabled {
            self.cancel_reconnect_timer();
        }
        debug!(enabled, "auto-reconnect preference changed");
        self.publish();
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<GetReconnectState> for ConnectionManager<T> {
    type Reply = RealtimeResult<ReconnectState>;

    async fn handle(
        &mut self,
        _msg: GetReconnectState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.reconnect)
    }
}

impl<T: WsTransport> KameoMessage<GetLinkStats> for ConnectionManager<T> {
    type Reply = RealtimeResult<LinkStats>;

    async fn handle(
        &mut self,
        _msg: GetLinkStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.health.stats())
    }
}

impl<T: WsTransport> KameoMessage<LinkEvent<T>> for ConnectionManager<T> {
    type Reply = RealtimeResult<()>;

    async fn handle(
        &mut self,
        event: LinkEvent<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match event {
            LinkEvent::Opened {
                generation,
                reader,
                writer,
            } => self.on_opened(generation, reader, writer),
            LinkEvent::Failed { generation, error } => {
                if generation != self.generation || !self.is_connecting {
                    return Ok(());
                }
                warn!(
                    endpoint = ?self.endpoint,
                    error = %error,
                    class = ?error.class(),
                    "connection attempt failed"
                );
                self.health.record_error("connect", &error);
                self.last_error = Some(error.to_string());
                self.handle_closed(CLOSE_ABNORMAL, "handshake failed");
            }
            LinkEvent::Frame { generation, frame } => {
                if generation == self.generation {
                    self.on_frame(frame);
                }
            }
            LinkEvent::Closed {
                generation,
                code,
                reason,
            } => {
                if generation != self.generation
                    || self.lifecycle != ConnectionLifecycleState::Open
                {
                    return Ok(());
                }
                if code != CLOSE_NORMAL {
                    let error = RealtimeError::TransportError {
                        context: "link",
                        error: format!("code={code} {reason}"),
                    };
                    self.health.record_error("link", &error);
                    self.last_error = Some(format!("connection closed (code {code}): {reason}"));
                }
                self.handle_closed(code, &reason);
            }
            LinkEvent::ConnectTimeout { generation } => {
                if generation != self.generation
                    || self.lifecycle != ConnectionLifecycleState::Connecting
                {
                    return Ok(());
                }
                let error = RealtimeError::Timeout {
                    operation: "connection",
                    after_ms: self.config.connect_timeout_ms,
                };
                warn!(endpoint = ?self.endpoint, error = %error, "connect timed out");
                self.health.record_error("connect", &error);
                self.last_error = Some(error.to_string());
                self.handle_closed(CLOSE_ABNORMAL, "connect timeout");
            }
            LinkEvent::ReconnectDue { token } => {
                if token != self.timer_token {
                    return Ok(());
                }
                self.reconnect_timer = None;
                if !(self.auto_reconnect || self.suspended_by_circuit) {
                    debug!("reconnect timer fired with auto-reconnect disabled");
                    return Ok(());
                }
                if let ConnectOutcome::RefusedCircuitOpen { retry_in_ms } = self.handle_connect() {
                    if self.suspended_by_circuit {
                        self.schedule_reconnect_timer(retry_in_ms);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<T: WsTransport> ConnectionManager<T> {
    fn handle_connect(&mut self) -> ConnectOutcome {
        if self.lifecycle.is_active() || self.is_connecting {
            debug!(lifecycle = %self.lifecycle, "connect: reusing existing link");
            return ConnectOutcome::AlreadyActive;
        }

        let now = self.clock.now_ms();
        if self.reconnect.circuit_open {
            let retry_in_ms = self
                .policy
                .cooldown_remaining(self.reconnect.last_attempt_at_ms, now);
            if retry_in_ms > 0 {
                let refusal = RealtimeError::CircuitOpen { retry_in_ms };
                warn!(error = %refusal, class = ?refusal.class(), "connect refused");
                return ConnectOutcome::RefusedCircuitOpen { retry_in_ms };
            }
            info!("circuit breaker cooldown elapsed; allowing a new attempt");
            self.reconnect.circuit_open = false;
        }

        self.is_connecting = true;
        self.cancel_reconnect_timer();
        self.teardown_transport();

        let url = self.config.resolve_endpoint();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.reconnect.last_attempt_at_ms = now;
        self.lifecycle = ConnectionLifecycleState::Connecting;
        self.endpoint = Some(url.clone());
        self.publish();

        info!(endpoint = %url, attempt = self.reconnect.attempt_count, "connecting");

        let transport = self.transport.clone();
        let buffers = self.config.buffers;
        let disable_nagle = self.config.disable_nagle;
        let actor_ref = self.actor_ref.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let event = match transport.connect(url, buffers, disable_nagle).await {
                Ok((reader, writer)) => LinkEvent::<T>::Opened {
                    generation,
                    reader,
                    writer,
                },
                Err(error) => LinkEvent::Failed { generation, error },
            };
            let _ = actor_ref.tell(event).send().await;
        }));

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let actor_ref = self.actor_ref.clone();
        self.connect_timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = actor_ref
                .tell(LinkEvent::<T>::ConnectTimeout { generation })
                .send()
                .await;
        }));

        ConnectOutcome::Started
    }

    fn on_opened(&mut self, generation: u64, reader: T::Reader, writer: T::Writer) {
        if generation != self.generation || !self.is_connecting {
            debug!(generation, current = self.generation, "dropping superseded transport");
            return;
        }

        abort_task(&mut self.connect_timeout);
        self.connect_task = None;
        self.is_connecting = false;
        self.writer = Some(writer);
        self.reader_task = Some(spawn_reader::<T>(
            self.actor_ref.clone(),
            generation,
            reader,
        ));

        self.lifecycle = ConnectionLifecycleState::Open;
        self.reconnect.reset_on_open(&self.policy);
        if self.suspended_by_circuit {
            info!("link recovered after cooldown; re-enabling auto-reconnect");
            self.auto_reconnect = true;
            self.suspended_by_circuit = false;
        }
        self.last_error = None;
        self.health.record_open();
        self.publish();

        info!(endpoint = ?self.endpoint, "telemetry link open");
    }

    fn on_frame(&mut self, frame: WsFrame) {
        self.health.record_frame_in();
        let Some(payload) = data_bytes(&frame) else {
            return;
        };
        let report = self.router.route_frame(payload);
        match report.outcome {
            RouteOutcome::Applied { .. } => self.health.record_applied(),
            RouteOutcome::Ignored => self.health.record_ignored(),
            RouteOutcome::Malformed => self.health.record_malformed(),
        }
        if let Some(error) = report.error {
            let context = match error {
                RealtimeError::ServerError(_) => "server",
                _ => "protocol",
            };
            self.health.record_error(context, &error);
        }
    }

    /// Shared close path for failed handshakes, timeouts and remote closes.
    fn handle_closed(&mut self, code: u16, reason: &str) {
        self.teardown_transport();
        self.is_connecting = false;
        self.lifecycle = ConnectionLifecycleState::Closed;
        self.health.record_closed();

        if code == CLOSE_NORMAL {
            self.log_reconnect_plan("clean_close", code, reason, None);
            self.publish();
            return;
        }

        self.reconnect.attempt_count = self.reconnect.attempt_count.saturating_add(1);
        let decision = self
            .policy
            .decide_for(&self.reconnect, self.clock.now_ms());

        if decision.circuit_open && !self.reconnect.circuit_open {
            self.trip_circuit();
            self.log_reconnect_plan("circuit_open", code, reason, None);
            self.publish();
            return;
        }

        if !self.auto_reconnect || !decision.should_retry {
            self.log_reconnect_plan("retry_suppressed", code, reason, None);
            self.publish();
            return;
        }

        self.reconnect.backoff_delay_ms = decision.delay_ms;
        self.schedule_reconnect_timer(decision.delay_ms);
        self.health.record_reconnect_scheduled();
        self.log_reconnect_plan("scheduled", code, reason, Some(decision.delay_ms));
        self.publish();
    }

    fn trip_circuit(&mut self) {
        self.reconnect.circuit_open = true;
        self.cancel_reconnect_timer();
        if self.auto_reconnect || self.suspended_by_circuit {
            self.auto_reconnect = false;
            self.suspended_by_circuit = true;
            // One retry once the cooldown has run out.
            self.schedule_reconnect_timer(self.policy.cooldown_ms);
        }
        self.last_error = Some(format!(
            "Circuit breaker open after {} failed attempts: automatic reconnection is disabled. \
             Use force reconnect to retry now.",
            self.reconnect.attempt_count
        ));
    }

    async fn handle_disconnect(&mut self) {
        self.cancel_reconnect_timer();
        self.close_current("client disconnect").await;
        self.reconnect.attempt_count = 0;
        self.publish();
        info!("telemetry link disconnected");
    }

    /// Cancel any attempt in flight and close an open link with the clean code.
    async fn close_current(&mut self, reason: &'static str) {
        self.generation = self.generation.wrapping_add(1);
        abort_task(&mut self.connect_timeout);
        abort_task(&mut self.connect_task);
        abort_task(&mut self.reader_task);

        let was_active = self.lifecycle.is_active() || self.is_connecting;
        self.is_connecting = false;

        if let Some(mut writer) = self.writer.take() {
            self.lifecycle = ConnectionLifecycleState::Closing;
            self.publish();
            let close = async {
                writer.send(WsFrame::close(CLOSE_NORMAL, reason)).await?;
                writer.close().await
            };
            match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
                Err(_) => debug!("close frame flush timed out"),
            }
        }

        if was_active || self.lifecycle == ConnectionLifecycleState::Closing {
            self.lifecycle = ConnectionLifecycleState::Closed;
            self.health.record_closed();
        }
    }

    async fn send_command(&mut self, command: OutboundCommand) -> RealtimeResult<()> {
        let name = command.name();
        let lifecycle = self.lifecycle;
        let Some(writer) = self
            .writer
            .as_mut()
            .filter(|_| lifecycle == ConnectionLifecycleState::Open)
        else {
            warn!(command = name, lifecycle = %lifecycle, "dropping command: link not open");
            return Err(RealtimeError::NotOpen {
                command: name.to_string(),
            });
        };

        let payload = sonic_rs::to_string(&command)
            .map_err(|e| RealtimeError::ParseFailed(format!("{name}: {e}")))?;

        if let Err(error) = writer.send(WsFrame::text(payload)).await {
            self.health.record_error("write", &error);
            if error.class() != ErrorClass::Transport {
                warn!(command = name, error = %error, "write rejected");
                return Err(error);
            }
            warn!(command = name, error = %error, "write failed; treating link as lost");
            self.last_error = Some(error.to_string());
            self.handle_closed(CLOSE_ABNORMAL, "write failed");
            return Err(error);
        }

        self.health.record_frame_out();
        debug!(command = name, "command sent");
        Ok(())
    }

    fn schedule_reconnect_timer(&mut self, delay_ms: u64) {
        self.cancel_reconnect_timer();
        let token = self.timer_token;
        let actor_ref = self.actor_ref.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = actor_ref
                .tell(LinkEvent::<T>::ReconnectDue { token })
                .send()
                .await;
        }));
    }

    /// Abort the pending timer; a `ReconnectDue` already in the mailbox is invalidated.
    fn cancel_reconnect_timer(&mut self) {
        abort_task(&mut self.reconnect_timer);
        self.timer_token = self.timer_token.wrapping_add(1);
    }

    fn teardown_transport(&mut self) {
        abort_task(&mut self.connect_timeout);
        abort_task(&mut self.connect_task);
        abort_task(&mut self.reader_task);
        self.writer = None;
    }

    fn publish(&self) {
        self.store.set_connection(ConnectionSnapshot {
            lifecycle: self.lifecycle,
            attempt_count: self.reconnect.attempt_count,
            backoff_delay_ms: self.reconnect.backoff_delay_ms,
            circuit_open: self.reconnect.circuit_open,
            last_attempt_at_ms: self.reconnect.last_attempt_at_ms,
            auto_reconnect: self.auto_reconnect,
            last_error: self.last_error.clone(),
            endpoint: self.endpoint.clone(),
        });
    }

    fn log_reconnect_plan(&self, note: &str, code: u16, reason: &str, delay_ms: Option<u64>) {
        let stats = self.health.stats();
        if note == "scheduled" || note == "circuit_open" {
            warn!(
                endpoint = ?self.endpoint,
                note,
                code,
                reason,
                attempt = self.reconnect.attempt_count,
                max_retries = self.policy.max_retries,
                delay_ms,
                circuit_open = self.reconnect.circuit_open,
                frames_in = stats.frames_in,
                errors = stats.errors,
                "telemetry reconnect plan"
            );
        } else {
            debug!(
                endpoint = ?self.endpoint,
                note,
                code,
                reason,
                attempt = self.reconnect.attempt_count,
                auto_reconnect = self.auto_reconnect,
                "telemetry reconnect plan"
            );
        }
    }
}

fn abort_task(handle: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = handle.take() {
        handle.abort();
    }
}

/// Forward frames in transport order; the first close, error or end of stream
/// is reported once and ends the task.
fn spawn_reader<T: WsTransport>(
    actor_ref: ActorRef<ConnectionManager<T>>,
    generation: u64,
    mut reader: T::Reader,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (code, reason) = loop {
            match reader.next().await {
                Some(Ok(WsFrame::Close(frame))) => {
                    let code = frame.as_ref().map_or(CLOSE_NO_STATUS, |f| f.code);
                    let reason = frame
                        .map(|f| f.reason_lossy())
                        .unwrap_or_else(|| "remote closed".to_string());
                    break (code, reason);
                }
                Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {}
                Some(Ok(frame)) => {
                    if actor_ref
                        .tell(LinkEvent::<T>::Frame { generation, frame })
                        .send()
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Err(err)) => break (CLOSE_ABNORMAL, format!("read error: {err}")),
                None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
            }
        };
        let _ = actor_ref
            .tell(LinkEvent::<T>::Closed {
                generation,
                code,
                reason,
            })
            .send()
            .await;
    })
}
