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

//! Connection state holder for the host service.
//!
//! [`ServiceManager`] owns the current [`ConnectionState`] and registers a
//! single listener with a [`ServiceDiscovery`] facility. The facility drives
//! every transition; the manager only records them and fans them out.
//!
//! Reads are lock-free and never block. Writers (the two listener callbacks)
//! go through a short writer-side mutex so a death notification compares
//! against the same state it replaces, and subscribers see transitions in
//! commit order. A lone `compare_and_swap` on the state cell would gate the
//! death without a lock, but the `watch` and `broadcast` publishes after it
//! could then interleave with a racing bind and leave `watch()` holding a
//! superseded state. Writers may therefore wait briefly on each other; the
//! critical section holds no I/O and never awaits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::service::{DiscoveryError, HostService, ServiceDiscovery, ServiceListener};
use crate::state::{ConnectionState, StateTransition};

/// Default log target for manager messages.
pub const DEFAULT_TAG: &str = "HookBridge/ServiceManager";

/// Largest per-subscriber transition buffer. Larger requests are clamped.
pub const MAX_TRANSITION_BUFFER: usize = 1 << 16;

/// Configuration for a [`ServiceManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Log target used for every message the manager emits.
    pub tag: String,
    /// Transitions buffered per subscriber before it starts lagging.
    /// Clamped to `1..=MAX_TRANSITION_BUFFER`.
    pub transition_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            transition_buffer: 16,
        }
    }
}

/// Errors from [`ServiceManager::init`].
#[derive(Debug, Error)]
pub enum InitError {
    /// The discovery facility refused the listener.
    #[error("failed to register service listener: {0}")]
    Registration(#[from] DiscoveryError),
}

struct Shared<S: ?Sized> {
    tag: String,
    current: ArcSwap<ConnectionState<S>>,
    writer: Mutex<()>,
    watch_tx: watch::Sender<Arc<ConnectionState<S>>>,
    transitions_tx: broadcast::Sender<StateTransition<S>>,
    initialized: AtomicBool,
}

impl<S: ?Sized> Shared<S> {
    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current state and notify observers.
    ///
    /// Callers must hold the writer lock for the whole read-compare-commit.
    fn commit(&self, _writer: &MutexGuard<'_, ()>, next: ConnectionState<S>) {
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        self.watch_tx.send_replace(Arc::clone(&next));
        // No subscribers is fine.
        let _ = self.transitions_tx.send(StateTransition::now(next));
    }
}

/// Tracks whether the privileged host service is currently available.
///
/// Construct one at bootstrap and share it by clone; clones observe and
/// drive the same state.
///
/// ```
/// use std::sync::Arc;
/// use service_link::{HostService, LocalDiscovery, ManagerConfig, ServiceManager};
///
/// struct Framework;
///
/// impl HostService for Framework {
///     fn framework_name(&self) -> &str { "LSPosed" }
///     fn framework_version(&self) -> &str { "1.9.2" }
/// }
///
/// let discovery = LocalDiscovery::<Framework>::new();
/// let manager = ServiceManager::<Framework>::new(ManagerConfig::default());
/// manager.init(&discovery).unwrap();
/// assert!(!manager.is_module_activated());
///
/// discovery.bind(Arc::new(Framework));
/// assert!(manager.is_module_activated());
/// ```
pub struct ServiceManager<S: ?Sized> {
    shared: Arc<Shared<S>>,
}

impl<S: ?Sized> Clone for ServiceManager<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: HostService + ?Sized> std::fmt::Debug for ServiceManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("tag", &self.shared.tag)
            .field("state", &**self.shared.current.load())
            .field("initialized", &self.shared.initialized.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: HostService + ?Sized + 'static> ServiceManager<S> {
    /// Create a manager in the [`ConnectionState::Connecting`] state.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        let initial = Arc::new(ConnectionState::Connecting);
        let (watch_tx, _) = watch::channel(Arc::clone(&initial));
        let buffer = config.transition_buffer.clamp(1, MAX_TRANSITION_BUFFER);
        if buffer != config.transition_buffer {
            warn!(
                target: config.tag.as_str(),
                "Transition buffer {} out of range, using {}",
                config.transition_buffer,
                buffer
            );
        }
        let (transitions_tx, _) = broadcast::channel(buffer);

        Self {
            shared: Arc::new(Shared {
                tag: config.tag,
                current: ArcSwap::new(initial),
                writer: Mutex::new(()),
                watch_tx,
                transitions_tx,
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// The latest state. Never blocks.
    #[must_use]
    pub fn connection_state(&self) -> Arc<ConnectionState<S>> {
        self.shared.current.load_full()
    }

    /// A receiver that always holds the latest state and can await changes.
    ///
    /// Intermediate states may be skipped if several transitions land
    /// between polls; use [`subscribe`](Self::subscribe) to see every one.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<ConnectionState<S>>> {
        self.shared.watch_tx.subscribe()
    }

    /// Subscribe to every transition committed after this call, in order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition<S>> {
        self.shared.transitions_tx.subscribe()
    }

    /// The bound service, if currently connected.
    #[must_use]
    pub fn service(&self) -> Option<Arc<S>> {
        self.shared.current.load().service().cloned()
    }

    /// Whether privileged hook operations are currently available.
    #[must_use]
    pub fn is_module_activated(&self) -> bool {
        self.shared.current.load().is_connected()
    }

    /// Whether [`init`](Self::init) has registered the listener.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    /// Wait until a service is bound and return it.
    ///
    /// Resolves immediately when already connected.
    pub async fn wait_for_service(&self) -> Option<Arc<S>> {
        let mut rx = self.watch();
        let state = rx.wait_for(|state| state.is_connected()).await.ok()?;
        state.service().cloned()
    }

    /// Register the state listener with `discovery`.
    ///
    /// Only the first successful call registers; later calls return
    /// `Ok(false)` without touching the facility. Concurrent first calls
    /// race on an atomic flag, so exactly one of them registers. A failed
    /// registration clears the flag again.
    pub fn init<D>(&self, discovery: &D) -> Result<bool, InitError>
    where
        D: ServiceDiscovery<S> + ?Sized,
    {
        if self
            .shared
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        let listener: Arc<dyn ServiceListener<S>> = Arc::new(ManagerListener {
            shared: Arc::clone(&self.shared),
        });

        if let Err(e) = discovery.register_listener(listener) {
            self.shared.initialized.store(false, Ordering::Release);
            error!(target: self.shared.tag.as_str(), "Listener registration failed: {e}");
            return Err(e.into());
        }

        info!(target: self.shared.tag.as_str(), "ServiceManager initialized and listener registered");
        Ok(true)
    }
}

/// The listener handed to the discovery facility.
struct ManagerListener<S: ?Sized> {
    shared: Arc<Shared<S>>,
}

impl<S: HostService + ?Sized + 'static> ServiceListener<S> for ManagerListener<S> {
    fn on_service_bind(&self, service: Arc<S>) {
        info!(
            target: self.shared.tag.as_str(),
            "Host service connected: {} v{}",
            service.framework_name(),
            service.framework_version()
        );

        let writer = self.shared.lock_writer();
        self.shared.commit(&writer, ConnectionState::Connected(service));
    }

    fn on_service_died(&self, service: Arc<S>) {
        let writer = self.shared.lock_writer();

        if !self.shared.current.load().is_bound_to(&service) {
            debug!(
                target: self.shared.tag.as_str(),
                "Ignoring death of {} v{}: not the bound service",
                service.framework_name(),
                service.framework_version()
            );
            return;
        }

        error!(target: self.shared.tag.as_str(), "Host service died");
        self.shared.commit(&writer, ConnectionState::Disconnected);
    }
}
