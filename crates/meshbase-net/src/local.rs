//! In-process transport connecting NetMeshBases that live in the same
//! process.
//!
//! Every request runs as a tokio task against the partner NetMeshBase.
//! Replica updates are delivered in commit order through one channel per
//! proxy. Peers can be made unreachable to exercise failure paths.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use meshbase_core::{MeshBaseIdentifier, MeshObjectIdentifier, ModelBase, TransactionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::access_spec::{CoherenceSpecification, NetMeshObjectAccessSpecification};
use crate::config::NetMeshBaseConfig;
use crate::error::ProxyError;
use crate::externalized::ReplicaUpdate;
use crate::net_mesh_base::NetMeshBase;
use crate::proxy::{Proxy, ProxyFactory, ReplicaRight, ReplicaTicket};

/// Internal stats with atomic fields for lock-free updates.
#[derive(Debug, Default)]
struct LocalNetworkStatsInner {
    replicas_requested: AtomicU64,
    rights_requested: AtomicU64,
    updates_sent: AtomicU64,
    failures: AtomicU64,
}

/// Traffic counters of a [`LocalNetwork`].
#[derive(Debug, Clone, Default)]
pub struct LocalNetworkStats {
    /// Replica fetches dispatched.
    pub replicas_requested: u64,
    /// Rights requests sent.
    pub rights_requested: u64,
    /// Replica updates forwarded.
    pub updates_sent: u64,
    /// Requests that could not be delivered or applied.
    pub failures: u64,
}

/// A set of NetMeshBases reachable from each other in-process.
pub struct LocalNetwork {
    nodes: DashMap<MeshBaseIdentifier, Weak<NetMeshBase>>,
    unreachable: DashSet<MeshBaseIdentifier>,
    latency: Duration,
    stats: Arc<LocalNetworkStatsInner>,
}

impl LocalNetwork {
    /// Creates an empty network without latency.
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    /// Creates an empty network that delays every delivery by `latency`.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            unreachable: DashSet::new(),
            latency,
            stats: Arc::new(LocalNetworkStatsInner::default()),
        })
    }

    /// A proxy factory whose proxies talk through this network.
    pub fn proxy_factory(self: &Arc<Self>) -> Arc<dyn ProxyFactory> {
        Arc::new(LocalProxyFactory {
            network: self.clone(),
        })
    }

    /// Creates a NetMeshBase connected to this network.
    pub fn create_node(
        self: &Arc<Self>,
        identifier: MeshBaseIdentifier,
        model: Arc<dyn ModelBase>,
        config: NetMeshBaseConfig,
    ) -> Arc<NetMeshBase> {
        let node = NetMeshBase::builder(identifier, model)
            .proxy_factory(self.proxy_factory())
            .config(config)
            .build();
        self.register(&node);
        node
    }

    /// Makes `node` reachable under its identifier.
    pub fn register(&self, node: &Arc<NetMeshBase>) {
        self.nodes.insert(node.identifier().clone(), Arc::downgrade(node));
        info!("Registered {} with the local network", node.identifier());
    }

    /// Cuts a node off the network, or connects it again.
    pub fn set_reachable(&self, identifier: &MeshBaseIdentifier, reachable: bool) {
        if reachable {
            self.unreachable.remove(identifier);
        } else {
            self.unreachable.insert(identifier.clone());
        }
        info!("{} is now {}", identifier, if reachable { "reachable" } else { "unreachable" });
    }

    /// The node registered under `identifier`, if it is reachable and alive.
    pub fn lookup(&self, identifier: &MeshBaseIdentifier) -> Result<Arc<NetMeshBase>, ProxyError> {
        if self.unreachable.contains(identifier) {
            return Err(ProxyError::Unreachable {
                partner: identifier.clone(),
            });
        }
        self.nodes
            .get(identifier)
            .and_then(|w| w.upgrade())
            .ok_or_else(|| ProxyError::Unreachable {
                partner: identifier.clone(),
            })
    }

    /// Get a snapshot of current statistics.
    pub fn stats(&self) -> LocalNetworkStats {
        LocalNetworkStats {
            replicas_requested: self.stats.replicas_requested.load(Ordering::Relaxed),
            rights_requested: self.stats.rights_requested.load(Ordering::Relaxed),
            updates_sent: self.stats.updates_sent.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    fn lookup_counted(&self, identifier: &MeshBaseIdentifier) -> Result<Arc<NetMeshBase>, ProxyError> {
        self.lookup(identifier).map_err(|e| {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            e
        })
    }
}

impl fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("nodes", &self.nodes.len())
            .field("unreachable", &self.unreachable.len())
            .field("latency", &self.latency)
            .finish()
    }
}

struct LocalProxyFactory {
    network: Arc<LocalNetwork>,
}

impl ProxyFactory for LocalProxyFactory {
    fn create_proxy(
        &self,
        local: Weak<NetMeshBase>,
        partner: &MeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> Result<Arc<dyn Proxy>, ProxyError> {
        let local_identifier = local
            .upgrade()
            .map(|b| b.identifier().clone())
            .ok_or_else(|| ProxyError::Dead {
                partner: partner.clone(),
            })?;
        Ok(Arc::new(LocalProxy {
            local,
            local_identifier,
            partner: partner.clone(),
            coherence,
            network: self.network.clone(),
            dead: AtomicBool::new(false),
            outbox: Mutex::new(None),
        }))
    }
}

type Outbox = mpsc::UnboundedSender<(TransactionId, Vec<ReplicaUpdate>)>;

/// A proxy delivering requests to a NetMeshBase in the same process.
pub struct LocalProxy {
    local: Weak<NetMeshBase>,
    local_identifier: MeshBaseIdentifier,
    partner: MeshBaseIdentifier,
    coherence: Option<CoherenceSpecification>,
    network: Arc<LocalNetwork>,
    dead: AtomicBool,
    outbox: Mutex<Option<Outbox>>,
}

impl LocalProxy {
    fn check_alive(&self) -> Result<(), ProxyError> {
        if self.dead.load(Ordering::Acquire) {
            return Err(ProxyError::Dead {
                partner: self.partner.clone(),
            });
        }
        Ok(())
    }

    fn runtime(&self) -> Result<Handle, ProxyError> {
        Handle::try_current().map_err(|e| ProxyError::Failed {
            partner: self.partner.clone(),
            reason: e.to_string(),
        })
    }

    /// Starts the task that delivers updates to the partner in order.
    fn start_outbox(&self) -> Result<Outbox, ProxyError> {
        let handle = self.runtime()?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<(TransactionId, Vec<ReplicaUpdate>)>();
        let network = self.network.clone();
        let partner = self.partner.clone();
        let from = self.local_identifier.clone();
        handle.spawn(async move {
            while let Some((transaction, updates)) = receiver.recv().await {
                if !network.latency.is_zero() {
                    tokio::time::sleep(network.latency).await;
                }
                let remote = match network.lookup_counted(&partner) {
                    Ok(remote) => remote,
                    Err(e) => {
                        warn!("Dropping updates of {} for {}: {}", transaction, partner, e);
                        continue;
                    }
                };
                if let Err(e) = remote.apply_replica_updates(from.clone(), updates).await {
                    network.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("{} could not apply updates of {}: {}", partner, transaction, e);
                }
            }
            debug!("Outbox from {} to {} closed", from, partner);
        });
        Ok(sender)
    }
}

#[async_trait]
impl Proxy for LocalProxy {
    fn partner_identifier(&self) -> &MeshBaseIdentifier {
        &self.partner
    }

    fn coherence(&self) -> Option<&CoherenceSpecification> {
        self.coherence.as_ref()
    }

    fn obtain_replicas(
        &self,
        paths: Vec<NetMeshObjectAccessSpecification>,
        ticket: ReplicaTicket,
    ) -> Result<(), ProxyError> {
        self.check_alive()?;
        let remote = self.network.lookup_counted(&self.partner)?;
        let local = self.local.upgrade().ok_or_else(|| ProxyError::Dead {
            partner: self.partner.clone(),
        })?;
        let handle = self.runtime()?;
        self.network.stats.replicas_requested.fetch_add(1, Ordering::Relaxed);

        let requester = self.local_identifier.clone();
        let partner = self.partner.clone();
        let latency = self.network.latency;
        handle.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let replicas = remote.serve_obtain_replicas(&requester, paths).await;
            debug!("{} sends {} replica(s) to {}", partner, replicas.len(), requester);
            let result = local.ripple_in_replicas(partner, replicas).await;
            ticket.complete(result);
        });
        Ok(())
    }

    async fn try_to_obtain_rights(
        &self,
        right: ReplicaRight,
        identifiers: Vec<MeshObjectIdentifier>,
    ) -> Result<Vec<MeshObjectIdentifier>, ProxyError> {
        self.check_alive()?;
        let remote = self.network.lookup_counted(&self.partner)?;
        self.network.stats.rights_requested.fetch_add(1, Ordering::Relaxed);
        if !self.network.latency.is_zero() {
            tokio::time::sleep(self.network.latency).await;
        }
        Ok(remote
            .serve_rights_request(&self.local_identifier, right, identifiers)
            .await)
    }

    fn transaction_committed(&self, transaction: TransactionId, updates: Vec<ReplicaUpdate>) {
        if self.check_alive().is_err() || updates.is_empty() {
            return;
        }
        let count = updates.len() as u64;
        let mut outbox = self.outbox.lock();
        if outbox.is_none() {
            match self.start_outbox() {
                Ok(sender) => *outbox = Some(sender),
                Err(e) => {
                    self.network.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Cannot forward {} to {}: {}", transaction, self.partner, e);
                    return;
                }
            }
        }
        if let Some(sender) = outbox.as_ref() {
            if sender.send((transaction, updates)).is_err() {
                warn!("Outbox to {} is closed", self.partner);
                return;
            }
        }
        self.network.stats.updates_sent.fetch_add(count, Ordering::Relaxed);
    }

    fn resynchronize_dependent_replicas(&self, identifiers: Vec<MeshObjectIdentifier>) {
        if self.check_alive().is_err() {
            return;
        }
        match self.network.lookup_counted(&self.partner) {
            Ok(remote) => remote.serve_register_dependents(&self.local_identifier, &identifiers),
            Err(e) => warn!("Cannot register dependents with {}: {}", self.partner, e),
        }
    }

    fn die(&self) {
        self.dead.store(true, Ordering::Release);
        self.outbox.lock().take();
    }
}

impl fmt::Debug for LocalProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProxy")
            .field("local", &self.local_identifier)
            .field("partner", &self.partner)
            .field("dead", &self.dead.load(Ordering::Relaxed))
            .finish()
    }
}
