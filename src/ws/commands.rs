use crate::core::RealtimeResult;
use crate::protocol::{EmergencyParams, IpParams, OutboundCommand, PortParams};
use crate::transport::{TungsteniteTransport, WsTransport};
use crate::ws::client::RealtimeClient;

/// Typed outbound commands. Every call fails with `NotOpen` while the link is down.
#[derive(Clone)]
pub struct CommandChannel<T: WsTransport = TungsteniteTransport> {
    client: RealtimeClient<T>,
}

impl<T: WsTransport> CommandChannel<T> {
    pub fn new(client: RealtimeClient<T>) -> Self {
        Self { client }
    }

    /// `duration_secs` of `None` leaves the block length to the server.
    pub async fn block_ip(
        &self,
        ip: impl Into<String>,
        reason: Option<String>,
        duration_secs: Option<u64>,
    ) -> RealtimeResult<()> {
        self.client
            .send(OutboundCommand::BlockIp(IpParams {
                ip: ip.into(),
                reason,
                duration: duration_secs,
            }))
            .await
    }

    pub async fn unblock_ip(&self, ip: impl Into<String>) -> RealtimeResult<()> {
        self.client
            .send(OutboundCommand::UnblockIp(IpParams {
                ip: ip.into(),
                reason: None,
                duration: None,
            }))
            .await
    }

    pub async fn request_metrics(&self) -> RealtimeResult<()> {
        self.client.send(OutboundCommand::GetMetrics).await
    }

    pub async fn request_connections(&self) -> RealtimeResult<()> {
        self.client.send(OutboundCommand::GetConnections).await
    }

    pub async fn request_alerts(&self) -> RealtimeResult<()> {
        self.client.send(OutboundCommand::GetAlerts).await
    }

    pub async fn request_port_status(&self) -> RealtimeResult<()> {
        self.client.send(OutboundCommand::GetPortStatus).await
    }

    pub async fn block_port(
        &self,
        port: u16,
        protocol: impl Into<String>,
        reason: Option<String>,
    ) -> RealtimeResult<()> {
        self.client
            .send(OutboundCommand::BlockPort(PortParams {
                port,
                protocol: protocol.into(),
                reason,
            }))
            .await
    }

    pub async fn unblock_port(&self, port: u16, protocol: impl Into<String>) -> RealtimeResult<()> {
        self.client
            .send(OutboundCommand::UnblockPort(PortParams {
                port,
                protocol: protocol.into(),
                reason: None,
            }))
            .await
    }

    pub async fn emergency_block(&self, reason: Option<String>) -> RealtimeResult<()> {
        self.client
            .send(OutboundCommand::EmergencyBlock(EmergencyParams { reason }))
            .await
    }
}
