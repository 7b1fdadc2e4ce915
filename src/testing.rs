//! In-memory transport for driving the connection manager without a socket.
//!
//! Each accepted connection hands a [`MockServer`] to the test through
//! [`MockListener`], so tests can push inbound frames, read what the client wrote,
//! close with a specific code or drop the socket.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

use crate::core::{RealtimeError, WebSocketBufferConfig, WsFrame};
use crate::transport::{ConnectFuture, WsTransport};

/// What the next `connect()` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectPlan {
    Accept,
    Fail(String),
    /// Never resolves; exercises the connect timeout.
    Hang,
}

struct Shared {
    plans: Mutex<VecDeque<ConnectPlan>>,
    fallback: ConnectPlan,
    delay: Option<Duration>,
    connects: AtomicUsize,
    urls: Mutex<Vec<String>>,
    attempted_at: Mutex<Vec<tokio::time::Instant>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Receives one [`MockServer`] per accepted connection.
pub struct MockListener {
    rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockListener {
    pub async fn accept(&mut self) -> Option<MockServer> {
        self.rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MockServer> {
        self.rx.try_recv().ok()
    }
}

impl MockTransport {
    /// Transport that accepts every connection.
    pub fn new() -> (Self, MockListener) {
        Self::with_fallback(ConnectPlan::Accept, None)
    }

    /// Transport whose unscripted attempts follow `fallback`, each resolving after `delay`.
    pub fn with_fallback(fallback: ConnectPlan, delay: Option<Duration>) -> (Self, MockListener) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: Arc::new(Shared {
                    plans: Mutex::new(VecDeque::new()),
                    fallback,
                    delay,
                    connects: AtomicUsize::new(0),
                    urls: Mutex::new(Vec::new()),
                    attempted_at: Mutex::new(Vec::new()),
                    servers,
                }),
            },
            MockListener { rx },
        )
    }

    /// Script the next unscripted attempt.
    pub fn push_plan(&self, plan: ConnectPlan) {
        if let Ok(mut plans) = self.shared.plans.lock() {
            plans.push_back(plan);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.shared
            .urls
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    /// Tokio instants at which `connect()` was called, in order.
    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.shared
            .attempted_at
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn next_plan(&self) -> ConnectPlan {
        self.shared
            .plans
            .lock()
            .ok()
            .and_then(|mut plans| plans.pop_front())
            .unwrap_or_else(|| self.shared.fallback.clone())
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
        _disable_nagle: bool,
    ) -> ConnectFuture<Self::Reader, Self::Writer> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut times) = self.shared.attempted_at.lock() {
            times.push(tokio::time::Instant::now());
        }
        if let Ok(mut urls) = self.shared.urls.lock() {
            urls.push(url);
        }
        let plan = self.next_plan();
        let delay = self.shared.delay;
        let servers = self.shared.servers.clone();

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match plan {
                ConnectPlan::Accept => {
                    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                    let _ = servers.send(MockServer {
                        outbound_rx: sent_rx,
                        inbound_tx: Some(inbound_tx),
                    });
                    Ok((MockReader { rx: inbound_rx }, MockWriter { sent_tx }))
                }
                ConnectPlan::Fail(reason) => Err(RealtimeError::ConnectionFailed(reason)),
                ConnectPlan::Hang => std::future::pending().await,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The client side is no longer reading.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

type Inbound = Result<WsFrame, String>;

/// Server end of one mock connection.
pub struct MockServer {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<Inbound>>,
}

impl MockServer {
    /// Next frame written by the client.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    pub fn send_frame(&self, frame: WsFrame) -> Result<(), MockServerError> {
        self.push(Ok(frame))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_frame(WsFrame::text(text))
    }

    /// Server-initiated close with `code`.
    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), MockServerError> {
        self.send_frame(WsFrame::close(code, reason))
    }

    /// Surface a read error on the client side.
    pub fn fail_read(&self, error: impl Into<String>) -> Result<(), MockServerError> {
        self.push(Err(error.into()))
    }

    /// Close the inbound channel so the client's stream ends without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    fn push(&self, item: Inbound) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockServerError::ChannelClosed)
    }
}

pub struct MockReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Stream for MockReader {
    type Item = Result<WsFrame, RealtimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(RealtimeError::TransportError {
                context: "mock_transport_read",
                error,
            }))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = RealtimeError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| RealtimeError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Text payload of a frame the client wrote, if it is one.
pub fn outbound_text(frame: &WsFrame) -> Option<&str> {
    match frame {
        WsFrame::Text(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}
