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

//! In-process service discovery.
//!
//! [`LocalDiscovery`] plays the role of the host's discovery helper when the
//! service is produced inside the same process: bootstrap code hands it the
//! service on bind and reports deaths, and it fans both out to listeners.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::service::{DiscoveryError, HostService, ServiceDiscovery, ServiceListener};

/// One queued callback, addressed to the listeners registered when the
/// event was recorded.
enum Delivery<S: ?Sized> {
    Bind {
        service: Arc<S>,
        listeners: Vec<Arc<dyn ServiceListener<S>>>,
    },
    Died {
        service: Arc<S>,
        listeners: Vec<Arc<dyn ServiceListener<S>>>,
    },
}

impl<S: ?Sized> Delivery<S> {
    fn deliver(self) {
        match self {
            Self::Bind { service, listeners } => {
                for listener in listeners {
                    listener.on_service_bind(Arc::clone(&service));
                }
            }
            Self::Died { service, listeners } => {
                for listener in listeners {
                    listener.on_service_died(Arc::clone(&service));
                }
            }
        }
    }
}

struct Inner<S: ?Sized> {
    bound: Option<Arc<S>>,
    listeners: Vec<Arc<dyn ServiceListener<S>>>,
    closed: bool,
    queue: VecDeque<Delivery<S>>,
    dispatching: bool,
}

/// A discovery facility driven directly by the embedding code.
///
/// Every callback goes through one FIFO queue, filled under the same lock
/// that records the bound service, so listeners see events in exactly the
/// order the facility recorded them. Whichever caller finds the queue idle
/// drains it, outside the lock. A listener may call back into the facility;
/// its event is queued and delivered after the current one reaches every
/// listener. A call made while another thread is draining returns before
/// its callbacks run.
pub struct LocalDiscovery<S: ?Sized> {
    inner: Mutex<Inner<S>>,
}

impl<S: ?Sized> std::fmt::Debug for LocalDiscovery<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LocalDiscovery")
            .field("bound", &inner.bound.is_some())
            .field("listeners", &inner.listeners.len())
            .field("closed", &inner.closed)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

impl<S: HostService + ?Sized + 'static> Default for LocalDiscovery<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the dispatching flag if a listener panics mid-drain, so later
/// events are not stranded in the queue.
struct DrainGuard<'a, S: ?Sized> {
    discovery: &'a LocalDiscovery<S>,
}

impl<S: ?Sized> Drop for DrainGuard<'_, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.discovery.lock().dispatching = false;
        }
    }
}

impl<S: ?Sized> LocalDiscovery<S> {
    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        // Every mutation below leaves `Inner` consistent, so poisoning is benign.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `delivery` and drain the queue unless someone already is.
    ///
    /// Takes the guard that recorded the event so recording and queueing
    /// are one atomic step.
    fn dispatch(&self, mut inner: MutexGuard<'_, Inner<S>>, delivery: Delivery<S>) {
        inner.queue.push_back(delivery);
        if inner.dispatching {
            return;
        }
        inner.dispatching = true;
        drop(inner);

        let _guard = DrainGuard { discovery: self };
        loop {
            let next = {
                let mut inner = self.lock();
                if let Some(next) = inner.queue.pop_front() {
                    next
                } else {
                    inner.dispatching = false;
                    return;
                }
            };
            next.deliver();
        }
    }
}

impl<S: HostService + ?Sized + 'static> LocalDiscovery<S> {
    /// Create a facility with no bound service and no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                bound: None,
                listeners: Vec::new(),
                closed: false,
                queue: VecDeque::new(),
                dispatching: false,
            }),
        }
    }

    /// Record `service` as bound and notify every listener.
    pub fn bind(&self, service: Arc<S>) {
        let mut inner = self.lock();
        inner.bound = Some(Arc::clone(&service));
        let listeners = inner.listeners.clone();

        info!(
            "Binding {} v{} ({} listener(s))",
            service.framework_name(),
            service.framework_version(),
            listeners.len()
        );

        self.dispatch(inner, Delivery::Bind { service, listeners });
    }

    /// Report that `service` died and notify every listener.
    ///
    /// The bound service is cleared only if it is `service`. Listeners are
    /// told either way and decide for themselves whether the death is stale.
    pub fn report_died(&self, service: Arc<S>) {
        let mut inner = self.lock();
        if inner
            .bound
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, &service))
        {
            inner.bound = None;
        } else {
            debug!("Death reported for a service that is not bound");
        }
        let listeners = inner.listeners.clone();

        warn!(
            "Service {} v{} died ({} listener(s))",
            service.framework_name(),
            service.framework_version(),
            listeners.len()
        );

        self.dispatch(inner, Delivery::Died { service, listeners });
    }

    /// Stop accepting listeners. Existing listeners keep receiving events.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// The service most recently bound and not yet reported dead.
    #[must_use]
    pub fn bound_service(&self) -> Option<Arc<S>> {
        self.lock().bound.clone()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl<S: HostService + ?Sized + 'static> ServiceDiscovery<S> for LocalDiscovery<S> {
    /// Register `listener`, replaying the bound service to it if there is one.
    ///
    /// The replay is queued behind any events already recorded, so it can
    /// never overtake a newer bind or death.
    fn register_listener(&self, listener: Arc<dyn ServiceListener<S>>) -> Result<(), DiscoveryError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(DiscoveryError::Closed);
        }
        inner.listeners.push(Arc::clone(&listener));

        if let Some(service) = inner.bound.clone() {
            debug!("Replaying bind of {} to new listener", service.framework_name());
            self.dispatch(
                inner,
                Delivery::Bind {
                    service,
                    listeners: vec![listener],
                },
            );
        }

        Ok(())
    }
}
