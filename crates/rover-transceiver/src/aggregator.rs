// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of live services and their endpoint subscriptions.
//!
//! The registry is reconciled against the system manager's service list on
//! every refresh, and visited by the outbound loop on every poll. Sockets are
//! only ever closed under the write lock, after being removed from the
//! registry, so a visitor holding the read lock never sees a closed socket.

use bytes::Bytes;
use parking_lot::RwLock;

use crate::socket::{EndpointSocket, SocketError, SocketFactory};
use crate::wire;

/// Identity of a running service, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub name: String,
    pub pid: i32,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, pid: i32) -> Self {
        Self {
            name: name.into(),
            pid,
        }
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (pid {})", self.name, self.pid)
    }
}

impl From<&wire::ServiceIdentifier> for ServiceIdentity {
    fn from(id: &wire::ServiceIdentifier) -> Self {
        Self::new(id.name.clone(), id.pid)
    }
}

impl From<&ServiceIdentity> for wire::ServiceIdentifier {
    fn from(id: &ServiceIdentity) -> Self {
        Self {
            name: id.name.clone(),
            pid: id.pid,
        }
    }
}

/// A named stream of a service, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl From<&wire::ServiceEndpoint> for Endpoint {
    fn from(ep: &wire::ServiceEndpoint) -> Self {
        Self::new(ep.name.clone(), ep.address.clone())
    }
}

impl From<&Endpoint> for wire::ServiceEndpoint {
    fn from(ep: &Endpoint) -> Self {
        Self {
            name: ep.name.clone(),
            address: ep.address.clone(),
        }
    }
}

/// Desired state handed to [`StreamAggregator::reconcile`].
pub type ServiceMap = Vec<(ServiceIdentity, Vec<Endpoint>)>;

/// Convert a service list from the system manager into a [`ServiceMap`].
///
/// Entries without an identifier cannot be keyed and are skipped.
pub fn services_from_list(list: &wire::ServiceList) -> ServiceMap {
    list.services
        .iter()
        .filter_map(|service| {
            let Some(identifier) = service.identifier.as_ref() else {
                tracing::warn!("Ignoring service without identifier");
                return None;
            };
            Some((
                ServiceIdentity::from(identifier),
                service.endpoints.iter().map(Endpoint::from).collect(),
            ))
        })
        .collect()
}

/// An open subscription to one endpoint.
pub struct Subscription<S> {
    endpoint: Endpoint,
    socket: S,
}

impl<S: EndpointSocket> Subscription<S> {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn try_recv(&self) -> Result<Option<Bytes>, SocketError> {
        self.socket.try_recv()
    }
}

struct ServiceEntry<S> {
    identity: ServiceIdentity,
    subscriptions: Vec<Subscription<S>>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub services_added: usize,
    pub services_removed: usize,
    pub subscriptions_opened: usize,
    pub subscriptions_closed: usize,
    pub open_failures: usize,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Service registry plus endpoint subscriptions.
pub struct StreamAggregator<F: SocketFactory> {
    factory: F,
    services: RwLock<Vec<ServiceEntry<F::Socket>>>,
}

impl<F: SocketFactory> StreamAggregator<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            services: RwLock::new(Vec::new()),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Bring the registry in line with `desired`.
    ///
    /// Services and endpoints are matched by value. New endpoints get a
    /// subscription; endpoints and services that disappeared are closed and
    /// removed. A subscription whose socket is no longer alive is closed and
    /// reopened. An endpoint whose socket fails to open is logged and retried
    /// on the next pass. Duplicate identities in `desired` are merged.
    pub fn reconcile(&self, desired: &[(ServiceIdentity, Vec<Endpoint>)]) -> ReconcileSummary {
        let desired = merge_duplicates(desired);
        let mut summary = ReconcileSummary::default();
        let mut services = self.services.write();

        // Removals
        let mut kept = Vec::with_capacity(services.len());
        for mut entry in services.drain(..) {
            let wanted = desired
                .iter()
                .find(|(identity, _)| *identity == entry.identity)
                .map(|(_, endpoints)| endpoints);

            let Some(wanted) = wanted else {
                tracing::info!("Service {} is gone", entry.identity);
                summary.services_removed += 1;
                for sub in entry.subscriptions {
                    close_subscription(sub, &mut summary);
                }
                continue;
            };

            let (keep, stale): (Vec<_>, Vec<_>) = entry
                .subscriptions
                .into_iter()
                .partition(|sub| wanted.contains(&sub.endpoint) && sub.socket.is_alive());
            for sub in stale {
                if wanted.contains(&sub.endpoint) {
                    tracing::warn!(
                        "Subscription to {} / {} died, resubscribing",
                        entry.identity,
                        sub.endpoint.name
                    );
                }
                close_subscription(sub, &mut summary);
            }
            entry.subscriptions = keep;
            kept.push(entry);
        }
        *services = kept;

        // Additions
        for (identity, endpoints) in &desired {
            let index = match services.iter().position(|e| e.identity == *identity) {
                Some(index) => index,
                None => {
                    tracing::info!("Service {} discovered", identity);
                    summary.services_added += 1;
                    services.push(ServiceEntry {
                        identity: identity.clone(),
                        subscriptions: Vec::new(),
                    });
                    services.len() - 1
                }
            };
            let entry = &mut services[index];

            for endpoint in endpoints {
                if entry.subscriptions.iter().any(|s| s.endpoint == *endpoint) {
                    continue;
                }
                match self.factory.open(endpoint) {
                    Ok(socket) => {
                        tracing::info!(
                            "Subscribed to {} / {} at {}",
                            identity,
                            endpoint.name,
                            endpoint.address
                        );
                        entry.subscriptions.push(Subscription {
                            endpoint: endpoint.clone(),
                            socket,
                        });
                        summary.subscriptions_opened += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Cannot subscribe to {} / {}: {}",
                            identity,
                            endpoint.name,
                            e
                        );
                        summary.open_failures += 1;
                    }
                }
            }
        }

        summary
    }

    /// Visit every live subscription under the read lock.
    ///
    /// Reconciliation is blocked for the duration of the visit, so the
    /// visitor must not block or await.
    pub fn for_each<V>(&self, mut visit: V)
    where
        V: FnMut(&ServiceIdentity, &Subscription<F::Socket>),
    {
        let services = self.services.read();
        for entry in services.iter() {
            for sub in &entry.subscriptions {
                visit(&entry.identity, sub);
            }
        }
    }

    /// Current registry contents, in registration order.
    pub fn snapshot(&self) -> ServiceMap {
        self.services
            .read()
            .iter()
            .map(|entry| {
                (
                    entry.identity.clone(),
                    entry
                        .subscriptions
                        .iter()
                        .map(|s| s.endpoint.clone())
                        .collect(),
                )
            })
            .collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    pub fn subscription_count(&self) -> usize {
        self.services
            .read()
            .iter()
            .map(|e| e.subscriptions.len())
            .sum()
    }

    /// Close every subscription and empty the registry.
    pub fn clear(&self) {
        let mut services = self.services.write();
        for entry in services.drain(..) {
            for sub in entry.subscriptions {
                sub.socket.close();
            }
        }
    }
}

fn close_subscription<S: EndpointSocket>(sub: Subscription<S>, summary: &mut ReconcileSummary) {
    tracing::info!("Unsubscribing from {} at {}", sub.endpoint.name, sub.endpoint.address);
    sub.socket.close();
    summary.subscriptions_closed += 1;
}

fn merge_duplicates(desired: &[(ServiceIdentity, Vec<Endpoint>)]) -> ServiceMap {
    let mut merged: ServiceMap = Vec::with_capacity(desired.len());
    for (identity, endpoints) in desired {
        let index = match merged.iter().position(|(id, _)| id == identity) {
            Some(index) => index,
            None => {
                merged.push((identity.clone(), Vec::new()));
                merged.len() - 1
            }
        };
        let target = &mut merged[index].1;
        for endpoint in endpoints {
            if !target.contains(endpoint) {
                target.push(endpoint.clone());
            }
        }
    }
    merged
}
