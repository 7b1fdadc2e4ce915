use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpParams {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Block duration in seconds; server default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortParams {
    pub port: u16,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outbound command envelope: `{"command": "<name>", "params": {...}}`.
///
/// Parameterless commands serialize without `params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum OutboundCommand {
    BlockIp(IpParams),
    UnblockIp(IpParams),
    GetMetrics,
    GetConnections,
    GetAlerts,
    GetPortStatus,
    BlockPort(PortParams),
    UnblockPort(PortParams),
    EmergencyBlock(EmergencyParams),
}

impl OutboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundCommand::BlockIp(_) => "block_ip",
            OutboundCommand::UnblockIp(_) => "unblock_ip",
            OutboundCommand::GetMetrics => "get_metrics",
            OutboundCommand::GetConnections => "get_connections",
            OutboundCommand::GetAlerts => "get_alerts",
            OutboundCommand::GetPortStatus => "get_port_status",
            OutboundCommand::BlockPort(_) => "block_port",
            OutboundCommand::UnblockPort(_) => "unblock_port",
            OutboundCommand::EmergencyBlock(_) => "emergency_block",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameterless_commands_omit_params() {
        assert_eq!(
            sonic_rs::to_string(&OutboundCommand::GetMetrics).unwrap(),
            r#"{"command":"get_metrics"}"#
        );
    }

    #[test]
    fn block_ip_nests_params() {
        let cmd = OutboundCommand::BlockIp(IpParams {
            ip: "203.0.113.9".into(),
            reason: None,
            duration: Some(3600),
        });
        assert_eq!(
            sonic_rs::to_string(&cmd).unwrap(),
            r#"{"command":"block_ip","params":{"ip":"203.0.113.9","duration":3600}}"#
        );
    }

    #[test]
    fn name_matches_wire_tag() {
        let cmd = OutboundCommand::BlockPort(PortParams {
            port: 23,
            protocol: "tcp".into(),
            reason: Some("telnet".into()),
        });
        let wire = sonic_rs::to_string(&cmd).unwrap();
        assert!(wire.starts_with(&format!(r#"{{"command":"{}""#, cmd.name())));
    }
}
