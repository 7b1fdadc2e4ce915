use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use sonic_rs::Value;

use crate::core::{CircularBuffer, ConnectionLifecycleState};

/// Hard bound on the blocked-address set.
pub const BLOCKED_ADDRESS_CAP: usize = 1000;
/// Hard bound on the login-attempt ring.
pub const LOGIN_HISTORY_CAP: usize = 200;
/// `alert_update` prepends into a list capped at this length.
pub const ALERT_FEED_CAP: usize = 100;

/// `null` decodes like a missing field: the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuReading {
    #[serde(deserialize_with = "null_as_default")]
    pub percent: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub cores: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub frequency: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageReading {
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub used: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkReading {
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_sent: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemReadings {
    #[serde(deserialize_with = "null_as_default")]
    pub cpu: CpuReading,
    #[serde(deserialize_with = "null_as_default")]
    pub memory: UsageReading,
    #[serde(deserialize_with = "null_as_default")]
    pub disk: UsageReading,
    #[serde(deserialize_with = "null_as_default")]
    pub network: NetworkReading,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionCounts {
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub established: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub listening: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficTotals {
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_in: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_out: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub packets_in: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub packets_out: u64,
}

/// Replaced wholesale on every metrics frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    #[serde(deserialize_with = "null_as_default")]
    pub system: SystemReadings,
    pub connections: Option<ConnectionCounts>,
    pub traffic: Option<TrafficTotals>,
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessInfo {
    pub pid: Option<u32>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub command_line: Option<String>,
    pub username: Option<String>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(deserialize_with = "null_as_default")]
    pub port: u16,
    #[serde(deserialize_with = "null_as_default")]
    pub protocol: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_sent: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_received: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub latency: f64,
    pub process: Option<String>,
    pub process_info: Option<ProcessInfo>,
    pub last_seen: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEndpoint {
    #[serde(deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(deserialize_with = "null_as_default")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRecord {
    pub id: Option<String>,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub alert_type: String,
    pub endpoint: Option<AlertEndpoint>,
    pub timestamp: Option<Value>,
    pub details: Option<Value>,
    pub severity: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub acknowledged: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub resolved: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub auto_resolved: bool,
    pub source_ip: Option<String>,
    pub target_ip: Option<String>,
    pub metadata: Option<Value>,
}

/// Outcome of a blocked-address merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    /// Unseen addresses dropped because the set was full.
    pub rejected: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added > 0
    }
}

/// Ordered, deduplicated, bounded address set. Only ever grows until cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct BlockedAddressSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl BlockedAddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unseen addresses in arrival order; existing members win at capacity.
    pub fn merge<I, S>(&mut self, incoming: I) -> MergeReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = MergeReport::default();
        for address in incoming {
            let address = address.as_ref().trim();
            if address.is_empty() || self.members.contains(address) {
                continue;
            }
            if self.order.len() >= BLOCKED_ADDRESS_CAP {
                report.rejected += 1;
                continue;
            }
            self.members.insert(address.to_string());
            self.order.push(address.to_string());
            report.added += 1;
        }
        report
    }

    pub fn contains(&self, address: &str) -> bool {
        self.members.contains(address)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

impl From<Vec<String>> for BlockedAddressSet {
    fn from(addresses: Vec<String>) -> Self {
        let mut set = Self::new();
        set.merge(addresses);
        set
    }
}

impl From<BlockedAddressSet> for Vec<String> {
    fn from(set: BlockedAddressSet) -> Self {
        set.order
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub authenticated: bool,
    pub role: Option<String>,
    pub failed_attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptRecord {
    pub username: String,
    pub success: bool,
    pub timestamp_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortActionKind {
    Block,
    Unblock,
}

/// Last acknowledged port block/unblock result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortAction {
    pub kind: PortActionKind,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub success: bool,
    pub message: Option<String>,
}

/// Connection-lifecycle fields, written only by the connection manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub lifecycle: ConnectionLifecycleState,
    pub attempt_count: u32,
    pub backoff_delay_ms: u64,
    pub circuit_open: bool,
    pub last_attempt_at_ms: u64,
    pub auto_reconnect: bool,
    pub last_error: Option<String>,
    pub endpoint: Option<String>,
}

/// Everything a dashboard view renders from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardState {
    pub metrics: Option<MetricsSnapshot>,
    pub connections: Vec<ConnectionRecord>,
    pub alerts: Vec<AlertRecord>,
    pub blocked: BlockedAddressSet,
    pub port_status: Option<Value>,
    pub last_port_action: Option<PortAction>,
    pub auth: AuthSession,
    pub login_history: CircularBuffer<LoginAttemptRecord>,
    pub connection: ConnectionSnapshot,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            metrics: None,
            connections: Vec::new(),
            alerts: Vec::new(),
            blocked: BlockedAddressSet::new(),
            port_status: None,
            last_port_action: None,
            auth: AuthSession::default(),
            login_history: CircularBuffer::new(LOGIN_HISTORY_CAP),
            connection: ConnectionSnapshot::default(),
        }
    }
}

/// Serialized-form equality used for write suppression.
///
/// Serialization failure counts as "different" so the write still happens.
pub(crate) fn same_serialized<T: Serialize + ?Sized>(current: &T, incoming: &T) -> bool {
    match (sonic_rs::to_string(current), sonic_rs::to_string(incoming)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn replace_if_changed<T: Serialize>(slot: &mut T, incoming: T) -> bool {
    if same_serialized(slot, &incoming) {
        return false;
    }
    *slot = incoming;
    true
}

/// Region mutators. Each returns whether the state changed.
impl DashboardState {
    pub fn set_metrics(&mut self, metrics: MetricsSnapshot) -> bool {
        replace_if_changed(&mut self.metrics, Some(metrics))
    }

    pub fn set_connections(&mut self, connections: Vec<ConnectionRecord>) -> bool {
        replace_if_changed(&mut self.connections, connections)
    }

    pub fn set_alerts(&mut self, alerts: Vec<AlertRecord>) -> bool {
        replace_if_changed(&mut self.alerts, alerts)
    }

    pub fn prepend_alert(&mut self, alert: AlertRecord) -> bool {
        if self
            .alerts
            .first()
            .is_some_and(|head| same_serialized(head, &alert))
        {
            return false;
        }
        self.alerts.insert(0, alert);
        self.alerts.truncate(ALERT_FEED_CAP);
        true
    }

    pub fn merge_blocked<I, S>(&mut self, incoming: I) -> MergeReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked.merge(incoming)
    }

    pub fn set_port_status(&mut self, status: Value) -> bool {
        replace_if_changed(&mut self.port_status, Some(status))
    }

    pub fn set_port_action(&mut self, action: PortAction) -> bool {
        replace_if_changed(&mut self.last_port_action, Some(action))
    }

    pub fn set_connection(&mut self, snapshot: ConnectionSnapshot) -> bool {
        if self.connection == snapshot {
            return false;
        }
        self.connection = snapshot;
        true
    }

    pub fn set_auth(&mut self, auth: AuthSession) -> bool {
        if self.auth == auth {
            return false;
        }
        self.auth = auth;
        true
    }

    /// Clear every data region; auth, login history and connection fields stay.
    pub fn clear_data(&mut self) -> bool {
        let changed = self.metrics.is_some()
            || !self.connections.is_empty()
            || !self.alerts.is_empty()
            || !self.blocked.is_empty()
            || self.port_status.is_some()
            || self.last_port_action.is_some();
        self.metrics = None;
        self.connections.clear();
        self.alerts.clear();
        self.blocked.clear();
        self.port_status = None;
        self.last_port_action = None;
        changed
    }
}
