// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::{DateTime, Utc};
use log::{info, warn};
use service_link::{ConnectionState, HostService, ServiceManager, StateTransition};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Connection status for the host service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl<S: ?Sized> From<&ConnectionState<S>> for LinkStatus {
    fn from(state: &ConnectionState<S>) -> Self {
        match state {
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected(_) => Self::Connected,
            ConnectionState::Disconnected => Self::Disconnected,
        }
    }
}

/// Running summary of the host service connection
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    /// Current connection status
    pub status: LinkStatus,

    /// "name vversion" of the bound service
    pub service: Option<String>,

    /// Binds observed
    pub binds: u64,

    /// Deaths observed (stale ones never reach here)
    pub deaths: u64,

    /// When the last transition was committed
    pub last_change: Option<DateTime<Utc>>,

    /// When the current connection was established
    pub connected_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionReport {
    pub fn new() -> Self {
        Self {
            status: LinkStatus::Connecting,
            service: None,
            binds: 0,
            deaths: 0,
            last_change: None,
            connected_at: None,
        }
    }

    /// Fold one transition into the report
    pub fn record<S: HostService + ?Sized>(&mut self, transition: &StateTransition<S>) {
        self.apply(&transition.state, transition.at);
        match LinkStatus::from(&*transition.state) {
            LinkStatus::Connected => self.binds += 1,
            LinkStatus::Disconnected => self.deaths += 1,
            LinkStatus::Connecting => {}
        }
    }

    /// Overwrite the status from a state read directly, without counting it.
    /// Used after the subscriber fell behind and missed transitions.
    pub fn resync<S: HostService + ?Sized>(&mut self, state: &ConnectionState<S>, now: DateTime<Utc>) {
        self.apply(state, now);
    }

    fn apply<S: HostService + ?Sized>(&mut self, state: &ConnectionState<S>, at: DateTime<Utc>) {
        self.status = LinkStatus::from(state);
        self.service = state
            .service()
            .map(|s| format!("{} v{}", s.framework_name(), s.framework_version()));
        self.connected_at = match self.status {
            LinkStatus::Connected => Some(at),
            LinkStatus::Connecting | LinkStatus::Disconnected => None,
        };
        self.last_change = Some(at);
    }

    /// How long the current connection has been up
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.connected_at.map(|since| now - since)
    }
}

/// Thread-safe shared report
pub type SharedConnectionReport = Arc<Mutex<ConnectionReport>>;

/// Log every transition and keep `report` current until `cancel_token` fires.
///
/// Transitions already queued when cancellation arrives are still recorded.
pub fn spawn_reporter<S: HostService + ?Sized + 'static>(
    manager: &ServiceManager<S>,
    report: SharedConnectionReport,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let mut transitions = manager.subscribe();
    let manager = manager.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                result = transitions.recv() => match result {
                    Ok(transition) => {
                        info!("Connection state: {}", transition.state);
                        if let Ok(mut report) = report.lock() {
                            report.record(&transition);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Status reporter missed {} transition(s), resyncing", missed);
                        if let Ok(mut report) = report.lock() {
                            report.resync(&manager.connection_state(), Utc::now());
                        }
                    }
                    Err(RecvError::Closed) => return,
                },

                () = cancel_token.cancelled() => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_link::{LocalDiscovery, ManagerConfig};

    struct Fake;

    impl HostService for Fake {
        fn framework_name(&self) -> &str {
            "LSPosed"
        }

        fn framework_version(&self) -> &str {
            "1.9.2"
        }
    }

    fn transition(state: ConnectionState<Fake>) -> StateTransition<Fake> {
        StateTransition {
            state: Arc::new(state),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_record_counts_and_tracks_service() {
        let mut report = ConnectionReport::new();
        assert_eq!(report.status, LinkStatus::Connecting);

        report.record(&transition(ConnectionState::Connected(Arc::new(Fake))));
        assert_eq!(report.status, LinkStatus::Connected);
        assert_eq!(report.service.as_deref(), Some("LSPosed v1.9.2"));
        assert!(report.connected_at.is_some());

        report.record(&transition(ConnectionState::Disconnected));
        assert_eq!(report.status, LinkStatus::Disconnected);
        assert!(report.service.is_none());
        assert!(report.uptime(Utc::now()).is_none());

        report.record(&transition(ConnectionState::Connected(Arc::new(Fake))));
        assert_eq!((report.binds, report.deaths), (2, 1));
    }

    #[test]
    fn test_resync_does_not_count() {
        let mut report = ConnectionReport::new();
        report.resync(&ConnectionState::Connected(Arc::new(Fake)), Utc::now());

        assert_eq!(report.status, LinkStatus::Connected);
        assert_eq!((report.binds, report.deaths), (0, 0));
    }

    #[tokio::test]
    async fn test_reporter_drains_before_cancel() {
        let discovery = LocalDiscovery::<Fake>::new();
        let manager = ServiceManager::<Fake>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        let report: SharedConnectionReport = Arc::new(Mutex::new(ConnectionReport::new()));
        let cancel_token = CancellationToken::new();
        let reporter = spawn_reporter(&manager, Arc::clone(&report), cancel_token.clone());

        let a = Arc::new(Fake);
        discovery.bind(Arc::clone(&a));
        discovery.report_died(a);
        discovery.bind(Arc::new(Fake));

        cancel_token.cancel();
        reporter.await.unwrap();

        let report = report.lock().unwrap();
        assert_eq!(report.status, LinkStatus::Connected);
        assert_eq!((report.binds, report.deaths), (2, 1));
    }
}
