use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    connect_async_with_config,
    tungstenite::{
        Message as TungsteniteMessage, Utf8Bytes,
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
    },
};

use crate::core::{RealtimeError, WebSocketBufferConfig, WsCloseFrame, WsFrame};
use crate::transport::{ConnectFuture, WsTransport};

/// Select the ring provider once per process.
///
/// rustls 0.23 refuses to guess when more than one provider feature is enabled in the
/// dependency graph; an already-installed provider is left in place.
pub fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn map_ws_error(context: &'static str, err: impl ToString) -> RealtimeError {
    RealtimeError::TransportError {
        context,
        error: err.to_string(),
    }
}

fn close_to_core(frame: Option<TungCloseFrame>) -> Option<WsCloseFrame> {
    frame.map(|f| WsCloseFrame {
        code: u16::from(f.code),
        reason: AsRef::<Bytes>::as_ref(&f.reason).clone(),
    })
}

fn core_to_close(frame: WsCloseFrame) -> TungCloseFrame {
    TungCloseFrame {
        code: frame.code.into(),
        reason: Utf8Bytes::try_from(frame.reason).unwrap_or_else(|_| Utf8Bytes::from_static("")),
    }
}

fn msg_to_frame(msg: TungsteniteMessage) -> Option<WsFrame> {
    match msg {
        TungsteniteMessage::Text(text) => {
            Some(WsFrame::Text(AsRef::<Bytes>::as_ref(&text).clone()))
        }
        TungsteniteMessage::Binary(bytes) => Some(WsFrame::Binary(bytes)),
        TungsteniteMessage::Ping(bytes) => Some(WsFrame::Ping(bytes)),
        TungsteniteMessage::Pong(bytes) => Some(WsFrame::Pong(bytes)),
        TungsteniteMessage::Close(frame) => Some(WsFrame::Close(close_to_core(frame))),
        // Raw frames only surface when writing; skip if one ever shows up on read.
        TungsteniteMessage::Frame(_) => None,
    }
}

fn frame_to_msg(frame: WsFrame) -> TungsteniteMessage {
    match frame {
        WsFrame::Text(bytes) => match Utf8Bytes::try_from(bytes.clone()) {
            Ok(text) => TungsteniteMessage::Text(text),
            Err(_) => TungsteniteMessage::Binary(bytes),
        },
        WsFrame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
        WsFrame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
        WsFrame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
        WsFrame::Close(frame) => TungsteniteMessage::Close(frame.map(core_to_close)),
    }
}

fn socket_config(buffers: WebSocketBufferConfig) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(buffers.max_message_bytes);
    config.max_frame_size = Some(buffers.max_frame_bytes);
    config.write_buffer_size = buffers.write_buffer_bytes;
    config.max_write_buffer_size = buffers.max_write_buffer_bytes;
    config
}

/// tokio-tungstenite transport. `ws://` and `wss://` both work with the default
/// connector; pass a rustls config to pin roots or client certificates.
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<Socket>,
}

impl Stream for TungsteniteReader {
    type Item = Result<WsFrame, RealtimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match msg_to_frame(msg) {
                    Some(frame) => Poll::Ready(Some(Ok(frame))),
                    None => continue,
                },
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_ws_error("read", err)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<Socket, TungsteniteMessage>,
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = RealtimeError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("write", e))
    }
}

impl WsTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
        disable_nagle: bool,
    ) -> ConnectFuture<Self::Reader, Self::Writer> {
        let connector = self.connector.clone();
        Box::pin(async move {
            install_rustls_crypto_provider();
            let config = socket_config(buffers);

            let (stream, _response) = match connector {
                Some(connector) => {
                    connect_async_tls_with_config(url, Some(config), disable_nagle, Some(connector))
                        .await
                }
                None => connect_async_with_config(url, Some(config), disable_nagle).await,
            }
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frames_keep_code_and_reason() {
        let msg = frame_to_msg(WsFrame::close(1000, "bye"));
        let Some(WsFrame::Close(Some(frame))) = msg_to_frame(msg) else {
            panic!("expected close frame");
        };
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason_lossy(), "bye");
    }

    #[test]
    fn invalid_utf8_text_falls_back_to_binary() {
        let msg = frame_to_msg(WsFrame::Text(Bytes::from_static(&[0xff, 0xfe])));
        assert!(matches!(msg, TungsteniteMessage::Binary(_)));
    }
}
