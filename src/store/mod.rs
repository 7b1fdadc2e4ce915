//! Process-wide dashboard state with change notification.
//!
//! Every action goes through `watch::Sender::send_if_modified`, so an update whose
//! serialized form equals the current value never wakes subscribers.

mod state;

pub use state::*;

use std::sync::Arc;

use sonic_rs::Value;
use tokio::sync::watch;

/// Cloneable handle to the single dashboard state.
#[derive(Clone, Debug)]
pub struct StateStore {
    tx: Arc<watch::Sender<DashboardState>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_state(DashboardState::default())
    }

    pub fn with_state(state: DashboardState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    /// New receiver; the current value counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> DashboardState {
        self.tx.borrow().clone()
    }

    /// Read without cloning the whole state.
    pub fn read<R>(&self, f: impl FnOnce(&DashboardState) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Apply several region mutations with at most one notification.
    pub fn modify(&self, f: impl FnOnce(&mut DashboardState) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn update_metrics(&self, metrics: MetricsSnapshot) -> bool {
        self.modify(|state| state.set_metrics(metrics))
    }

    pub fn update_connections(&self, connections: Vec<ConnectionRecord>) -> bool {
        self.modify(|state| state.set_connections(connections))
    }

    pub fn update_alerts(&self, alerts: Vec<AlertRecord>) -> bool {
        self.modify(|state| state.set_alerts(alerts))
    }

    pub fn push_alert(&self, alert: AlertRecord) -> bool {
        self.modify(|state| state.prepend_alert(alert))
    }

    pub fn merge_blocked_addresses<I, S>(&self, addresses: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.modify(|state| {
            let report = state.merge_blocked(addresses);
            log_merge(&report, state.blocked.len());
            report.changed()
        })
    }

    pub fn update_port_status(&self, status: Value) -> bool {
        self.modify(|state| state.set_port_status(status))
    }

    /// Record a block/unblock acknowledgement and any port status it carried.
    pub fn record_port_action(&self, action: PortAction, status: Option<Value>) -> bool {
        self.modify(|state| {
            let mut changed = state.set_port_action(action);
            if let Some(status) = status {
                changed |= state.set_port_status(status);
            }
            changed
        })
    }

    pub fn set_connection(&self, snapshot: ConnectionSnapshot) -> bool {
        self.modify(|state| state.set_connection(snapshot))
    }

    pub fn set_auth(&self, auth: AuthSession) -> bool {
        self.modify(|state| state.set_auth(auth))
    }

    pub fn replace_login_history(&self, records: Vec<LoginAttemptRecord>) -> bool {
        self.modify(|state| {
            let history = crate::core::CircularBuffer::from_iter_capped(LOGIN_HISTORY_CAP, records);
            if state.login_history == history {
                return false;
            }
            state.login_history = history;
            true
        })
    }

    /// Manual reset of the data regions.
    pub fn reset_data(&self) -> bool {
        self.modify(DashboardState::clear_data)
    }
}

pub(crate) fn log_merge(report: &MergeReport, total: usize) {
    if report.rejected > 0 {
        tracing::warn!(
            rejected = report.rejected,
            cap = BLOCKED_ADDRESS_CAP,
            "blocked address set full; dropping new addresses"
        );
    } else if report.added > 0 {
        tracing::debug!(added = report.added, total, "merged blocked addresses");
    }
}
