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

//! Connection state for a privileged host service.
//!
//! A hooking module can only perform privileged operations while the host
//! framework's service is bound. This library tracks that relationship as a
//! small observable state machine:
//!
//! - **Service layer**: the [`HostService`] handle and the two seams to the
//!   host's discovery facility, [`ServiceListener`] and [`ServiceDiscovery`]
//! - **State layer**: [`ConnectionState`] (`Connecting`, `Connected`,
//!   `Disconnected`) and the [`StateTransition`] records fanned out to
//!   subscribers
//! - **Manager layer**: [`ServiceManager`], which registers one listener and
//!   exposes the current state, its projections, and change notifications
//! - **Local discovery**: [`LocalDiscovery`], an in-process facility for
//!   embedding code that produces the service itself
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use service_link::{ConnectionState, HostService, LocalDiscovery, ManagerConfig, ServiceManager};
//!
//! struct Framework {
//!     version: String,
//! }
//!
//! impl HostService for Framework {
//!     fn framework_name(&self) -> &str {
//!         "LSPosed"
//!     }
//!
//!     fn framework_version(&self) -> &str {
//!         &self.version
//!     }
//! }
//!
//! let discovery = LocalDiscovery::<Framework>::new();
//! let manager = ServiceManager::<Framework>::new(ManagerConfig::default());
//! manager.init(&discovery).unwrap();
//!
//! let a = Arc::new(Framework { version: "1.9.2".to_string() });
//! discovery.bind(Arc::clone(&a));
//! assert!(manager.is_module_activated());
//!
//! discovery.report_died(a);
//! assert!(matches!(*manager.connection_state(), ConnectionState::Disconnected));
//! assert!(manager.service().is_none());
//! ```

pub mod local;
pub mod manager;
pub mod service;
pub mod state;

pub use local::LocalDiscovery;
pub use manager::{InitError, ManagerConfig, ServiceManager, DEFAULT_TAG, MAX_TRANSITION_BUFFER};
pub use service::{DiscoveryError, HostService, ServiceDiscovery, ServiceListener};
pub use state::{ConnectionState, StateTransition};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Framework {
        version: &'static str,
    }

    impl HostService for Framework {
        fn framework_name(&self) -> &str {
            "LSPosed"
        }

        fn framework_version(&self) -> &str {
            self.version
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let discovery = LocalDiscovery::<Framework>::new();
        let manager = ServiceManager::<Framework>::new(ManagerConfig::default());
        assert!(matches!(*manager.connection_state(), ConnectionState::Connecting));

        assert!(manager.init(&discovery).unwrap());
        assert!(!manager.init(&discovery).unwrap());
        assert_eq!(discovery.listener_count(), 1);

        let a = Arc::new(Framework { version: "1.9.2" });
        discovery.bind(Arc::clone(&a));
        assert!(manager.connection_state().is_bound_to(&a));
        assert!(manager.is_module_activated());

        discovery.report_died(Arc::clone(&a));
        assert!(matches!(*manager.connection_state(), ConnectionState::Disconnected));
        assert!(!manager.is_module_activated());

        let b = Arc::new(Framework { version: "1.9.3" });
        discovery.bind(Arc::clone(&b));
        assert!(manager.connection_state().is_bound_to(&b));

        // Late death of A must not clobber B.
        discovery.report_died(a);
        assert!(manager.connection_state().is_bound_to(&b));
        assert!(Arc::ptr_eq(&manager.service().unwrap(), &b));
    }

    #[test]
    fn test_init_after_bind_picks_up_service() {
        let discovery = LocalDiscovery::<Framework>::new();
        let a = Arc::new(Framework { version: "1.9.2" });
        discovery.bind(Arc::clone(&a));

        let manager = ServiceManager::<Framework>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        assert!(manager.connection_state().is_bound_to(&a));
    }

    #[test]
    fn test_shared_discovery_handle() {
        let discovery: Arc<LocalDiscovery<dyn HostService>> = Arc::new(LocalDiscovery::new());
        let manager = ServiceManager::<dyn HostService>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        let service: Arc<dyn HostService> = Arc::new(Framework { version: "1.9.2" });
        discovery.bind(Arc::clone(&service));

        assert_eq!(manager.service().unwrap().framework_version(), "1.9.2");
    }

    struct Rebinder {
        discovery: Arc<LocalDiscovery<Framework>>,
        next: std::sync::Mutex<Option<Arc<Framework>>>,
    }

    impl ServiceListener<Framework> for Rebinder {
        fn on_service_bind(&self, _service: Arc<Framework>) {
            let next = self.next.lock().unwrap().take();
            if let Some(next) = next {
                self.discovery.bind(next);
            }
        }

        fn on_service_died(&self, _service: Arc<Framework>) {}
    }

    #[test]
    fn test_bind_from_inside_callback_reaches_manager_in_order() {
        let discovery = Arc::new(LocalDiscovery::<Framework>::new());
        let a = Arc::new(Framework { version: "1.9.2" });
        let b = Arc::new(Framework { version: "1.9.3" });

        let rebinder: Arc<dyn ServiceListener<Framework>> = Arc::new(Rebinder {
            discovery: Arc::clone(&discovery),
            next: std::sync::Mutex::new(Some(Arc::clone(&b))),
        });
        discovery.register_listener(rebinder).unwrap();
        let manager = ServiceManager::<Framework>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        discovery.bind(a);
        assert!(manager.connection_state().is_bound_to(&b));

        discovery.report_died(b);
        assert!(discovery.bound_service().is_none());
        assert!(!manager.is_module_activated());
        assert!(matches!(*manager.connection_state(), ConnectionState::Disconnected));
    }

    #[test]
    fn test_init_racing_bind_tracks_latest_service() {
        for _ in 0..200 {
            let discovery = LocalDiscovery::<Framework>::new();
            let a = Arc::new(Framework { version: "1.9.2" });
            let b = Arc::new(Framework { version: "1.9.3" });
            discovery.bind(a);

            let manager = ServiceManager::<Framework>::new(ManagerConfig::default());
            std::thread::scope(|scope| {
                scope.spawn(|| discovery.bind(Arc::clone(&b)));
                scope.spawn(|| manager.init(&discovery).unwrap());
            });

            assert!(manager.connection_state().is_bound_to(&b));
        }
    }
}
