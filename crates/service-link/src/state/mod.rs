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

//! Connection state model.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::service::HostService;

/// Relationship to the privileged host service.
///
/// Exactly one variant is current at any time. Transitions always replace
/// the whole value.
pub enum ConnectionState<S: ?Sized> {
    /// Waiting for the first bind. Only ever seen before the first connection.
    Connecting,
    /// Bound to the contained service.
    Connected(Arc<S>),
    /// The last bound service died. A later bind reconnects.
    Disconnected,
}

impl<S: ?Sized> ConnectionState<S> {
    /// The bound service, if connected.
    #[must_use]
    pub fn service(&self) -> Option<&Arc<S>> {
        match self {
            Self::Connected(service) => Some(service),
            Self::Connecting | Self::Disconnected => None,
        }
    }

    /// Whether a service is currently bound.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match self {
            Self::Connected(_) => true,
            Self::Connecting | Self::Disconnected => false,
        }
    }

    /// Whether `service` is the exact handle currently bound.
    #[must_use]
    pub fn is_bound_to(&self, service: &Arc<S>) -> bool {
        match self {
            Self::Connected(current) => Arc::ptr_eq(current, service),
            Self::Connecting | Self::Disconnected => false,
        }
    }
}

// Manual impls: deriving would demand `S: Clone` / `S: Debug`.
impl<S: ?Sized> Clone for ConnectionState<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Connecting => Self::Connecting,
            Self::Connected(service) => Self::Connected(Arc::clone(service)),
            Self::Disconnected => Self::Disconnected,
        }
    }
}

impl<S: HostService + ?Sized> fmt::Debug for ConnectionState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("Connecting"),
            Self::Connected(service) => f
                .debug_struct("Connected")
                .field("framework_name", &service.framework_name())
                .field("framework_version", &service.framework_version())
                .finish_non_exhaustive(),
            Self::Disconnected => f.write_str("Disconnected"),
        }
    }
}

impl<S: HostService + ?Sized> fmt::Display for ConnectionState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected(service) => write!(
                f,
                "connected to {} v{}",
                service.framework_name(),
                service.framework_version()
            ),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// A committed state change, as delivered to subscribers.
pub struct StateTransition<S: ?Sized> {
    /// The state that became current.
    pub state: Arc<ConnectionState<S>>,
    /// When the change was committed.
    pub at: DateTime<Utc>,
}

impl<S: ?Sized> StateTransition<S> {
    pub(crate) fn now(state: Arc<ConnectionState<S>>) -> Self {
        Self { state, at: Utc::now() }
    }
}

impl<S: ?Sized> Clone for StateTransition<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            at: self.at,
        }
    }
}

impl<S: HostService + ?Sized> fmt::Debug for StateTransition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTransition")
            .field("state", &self.state)
            .field("at", &self.at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake;

    impl HostService for Fake {
        fn framework_name(&self) -> &str {
            "LSPosed"
        }

        fn framework_version(&self) -> &str {
            "1.9.2"
        }
    }

    #[test]
    fn test_projections_per_variant() {
        let service = Arc::new(Fake);

        let connecting: ConnectionState<Fake> = ConnectionState::Connecting;
        assert!(!connecting.is_connected());
        assert!(connecting.service().is_none());

        let connected = ConnectionState::Connected(Arc::clone(&service));
        assert!(connected.is_connected());
        assert!(Arc::ptr_eq(connected.service().unwrap(), &service));

        let disconnected: ConnectionState<Fake> = ConnectionState::Disconnected;
        assert!(!disconnected.is_connected());
        assert!(disconnected.service().is_none());
    }

    #[test]
    fn test_is_bound_to_uses_identity() {
        let a = Arc::new(Fake);
        let b = Arc::new(Fake);
        let state = ConnectionState::Connected(Arc::clone(&a));

        assert!(state.is_bound_to(&a));
        // Same name and version, different service.
        assert!(!state.is_bound_to(&b));
        assert!(!ConnectionState::Disconnected.is_bound_to(&a));
    }

    #[test]
    fn test_display() {
        let state = ConnectionState::Connected(Arc::new(Fake));
        assert_eq!(state.to_string(), "connected to LSPosed v1.9.2");
        assert_eq!(ConnectionState::<Fake>::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::<Fake>::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_dyn_service_handles() {
        let service: Arc<dyn HostService> = Arc::new(Fake);
        let state: ConnectionState<dyn HostService> = ConnectionState::Connected(Arc::clone(&service));
        assert!(state.is_bound_to(&service));
        assert_eq!(state.service().unwrap().framework_name(), "LSPosed");
    }
}
