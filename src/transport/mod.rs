use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{RealtimeError, WebSocketBufferConfig, WsFrame};

pub mod tungstenite;

pub use tungstenite::{TungsteniteTransport, install_rustls_crypto_provider};

/// Future returned by [`WsTransport::connect`].
pub type ConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), RealtimeError>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The connection manager owns lifecycle and policy; a transport only opens a socket
/// and hands back its two halves. Tests swap in `testing::MockTransport`.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, RealtimeError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = RealtimeError> + Send + Sync + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
        disable_nagle: bool,
    ) -> ConnectFuture<Self::Reader, Self::Writer>;
}
