use bytes::Bytes;

/// Close code sent by `disconnect()`; never triggers automatic reconnection.
pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when the peer closed without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Abnormal closure: handshake failure, read error, timeout or a dropped socket.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Transport-neutral websocket frame.
///
/// Transports convert their native frame representation into/from `WsFrame`, so the
/// connection manager and the tests never see tungstenite types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsCloseFrame {
    pub fn reason_lossy(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

impl WsFrame {
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(Bytes::from(text.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: &'static str) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::from_static(reason.as_bytes()),
        }))
    }

    /// Close code carried by this frame, `CLOSE_NO_STATUS` for a bare close.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            WsFrame::Close(Some(frame)) => Some(frame.code),
            WsFrame::Close(None) => Some(CLOSE_NO_STATUS),
            _ => None,
        }
    }
}

/// Borrow the payload of data frames (text or binary) without allocation.
#[inline]
pub fn data_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) | WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_close_maps_to_no_status() {
        assert_eq!(WsFrame::Close(None).close_code(), Some(CLOSE_NO_STATUS));
        assert_eq!(
            WsFrame::close(CLOSE_NORMAL, "bye").close_code(),
            Some(CLOSE_NORMAL)
        );
        assert_eq!(WsFrame::text("{}").close_code(), None);
    }

    #[test]
    fn control_frames_have_no_data_payload() {
        assert!(data_bytes(&WsFrame::Ping(Bytes::from_static(b"p"))).is_none());
        assert_eq!(data_bytes(&WsFrame::text("abc")), Some(&b"abc"[..]));
    }
}
