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

//! Contracts shared with the host framework.
//!
//! The host hands out a privileged service object through a discovery
//! facility. This module defines the three seams between this crate and that
//! facility: the service handle itself, the listener the facility calls back
//! into, and the registration entry point.

use std::sync::Arc;

use thiserror::Error;

/// A privileged service provided by the hooking framework at runtime.
///
/// Handles are shared as `Arc<S>` and compared by identity, never by value:
/// two handles reporting the same name and version are still distinct
/// services if they are different allocations.
pub trait HostService: Send + Sync {
    /// Human-readable framework name (e.g. "LSPosed").
    fn framework_name(&self) -> &str;

    /// Framework version string as reported by the host.
    fn framework_version(&self) -> &str;

    /// Numeric framework version code, if the host reports one.
    fn framework_version_code(&self) -> i64 {
        0
    }
}

/// Callbacks delivered by a [`ServiceDiscovery`] facility.
///
/// Implementations must tolerate being called from any thread, in any order,
/// including a death notification for a service that was already replaced.
pub trait ServiceListener<S: ?Sized>: Send + Sync {
    /// The facility established (or re-established) a connection to `service`.
    fn on_service_bind(&self, service: Arc<S>);

    /// A previously bound `service` terminated.
    fn on_service_died(&self, service: Arc<S>);
}

/// Errors reported by a discovery facility.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The facility has shut down and accepts no more listeners.
    #[error("service discovery is closed")]
    Closed,

    /// The facility refused the listener.
    #[error("listener rejected: {0}")]
    Rejected(String),
}

/// A facility that locates the host service and reports its liveness.
pub trait ServiceDiscovery<S: ?Sized> {
    /// Register a listener for bind and death notifications.
    ///
    /// The listener stays registered for the lifetime of the facility.
    fn register_listener(&self, listener: Arc<dyn ServiceListener<S>>) -> Result<(), DiscoveryError>;
}

impl<S: ?Sized, D: ServiceDiscovery<S> + ?Sized> ServiceDiscovery<S> for Arc<D> {
    fn register_listener(&self, listener: Arc<dyn ServiceListener<S>>) -> Result<(), DiscoveryError> {
        (**self).register_listener(listener)
    }
}
