//! Replication metadata of a MeshObject and its lock state machine.
//!
//! Each replica knows the proxies of the peers it is replicated with. Two of
//! them may be singled out: the proxy towards the home replica and the proxy
//! towards the replica holding the update lock. `None` means "held here".

use meshbase_core::{MeshBaseIdentifier, MeshObject, MeshObjectIdentifier};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{NetError, NetResult, ProxyError};
use crate::net_mesh_base::NetMeshBase;
use crate::proxy::{Proxy, ReplicaRight};

struct ReplicaLinks {
    proxies: Vec<Arc<dyn Proxy>>,
    home: Option<usize>,
    lock: Option<usize>,
    give_up_lock: bool,
    give_up_home_replica: bool,
}

/// Shared replication state of one replica.
pub struct ReplicaState {
    links: Mutex<ReplicaLinks>,
}

impl ReplicaState {
    /// Creates the state, checking that the indices point into `proxies` and
    /// that home and lock are not held by two different peers.
    pub fn new(
        proxies: Vec<Arc<dyn Proxy>>,
        home: Option<usize>,
        lock: Option<usize>,
        give_up_lock: bool,
        give_up_home_replica: bool,
    ) -> NetResult<Self> {
        for index in [home, lock].into_iter().flatten() {
            if index >= proxies.len() {
                return Err(NetError::InconsistentReplicationGraph {
                    reason: format!("proxy index {} out of range ({} proxies)", index, proxies.len()),
                });
            }
        }
        if let (Some(h), Some(l)) = (home, lock) {
            if h != l {
                return Err(NetError::InconsistentReplicationGraph {
                    reason: format!("home proxy {} differs from lock proxy {}", h, l),
                });
            }
        }
        Ok(Self {
            links: Mutex::new(ReplicaLinks {
                proxies,
                home,
                lock,
                give_up_lock,
                give_up_home_replica,
            }),
        })
    }

    /// State of an object that is neither replicated nor a replica.
    pub fn local(give_up_lock: bool, give_up_home_replica: bool) -> Self {
        Self {
            links: Mutex::new(ReplicaLinks {
                proxies: Vec::new(),
                home: None,
                lock: None,
                give_up_lock,
                give_up_home_replica,
            }),
        }
    }

    /// Adds a proxy unless one to the same peer is present; returns its index.
    pub fn add_proxy(&self, proxy: Arc<dyn Proxy>) -> usize {
        let mut links = self.links.lock();
        if let Some(pos) = links
            .proxies
            .iter()
            .position(|p| p.partner_identifier() == proxy.partner_identifier())
        {
            return pos;
        }
        links.proxies.push(proxy);
        links.proxies.len() - 1
    }

    /// The proxies of the peers this replica is replicated with.
    pub fn proxies(&self) -> Vec<Arc<dyn Proxy>> {
        self.links.lock().proxies.clone()
    }

    fn at(&self, index: Option<usize>) -> Option<Arc<dyn Proxy>> {
        let links = self.links.lock();
        index.and_then(|i| links.proxies.get(i).cloned())
    }

    /// Index of the proxy towards the home replica.
    pub fn home_proxy_index(&self) -> Option<usize> {
        self.links.lock().home
    }

    /// Index of the proxy towards the lock holder.
    pub fn lock_proxy_index(&self) -> Option<usize> {
        self.links.lock().lock
    }

    /// The proxy towards the home replica.
    pub fn home_proxy(&self) -> Option<Arc<dyn Proxy>> {
        self.at(self.home_proxy_index())
    }

    /// The proxy towards the lock holder.
    pub fn lock_proxy(&self) -> Option<Arc<dyn Proxy>> {
        self.at(self.lock_proxy_index())
    }

    fn set_lock(&self, index: Option<usize>) {
        self.links.lock().lock = index;
    }

    fn set_home(&self, index: Option<usize>) {
        self.links.lock().home = index;
    }

    pub(crate) fn give_up_lock_flag(&self) -> bool {
        self.links.lock().give_up_lock
    }

    pub(crate) fn give_up_home_replica_flag(&self) -> bool {
        self.links.lock().give_up_home_replica
    }
}

impl fmt::Debug for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links = self.links.lock();
        let partners: Vec<String> = links
            .proxies
            .iter()
            .map(|p| p.partner_identifier().to_string())
            .collect();
        f.debug_struct("ReplicaState")
            .field("proxies", &partners)
            .field("home", &links.home)
            .field("lock", &links.lock)
            .finish()
    }
}

/// A MeshObject of a NetMeshBase together with its replication state.
#[derive(Clone)]
pub struct NetMeshObject {
    object: Arc<MeshObject>,
    replica: Arc<ReplicaState>,
    base: Weak<NetMeshBase>,
}

impl NetMeshObject {
    pub(crate) fn new(object: Arc<MeshObject>, replica: Arc<ReplicaState>, base: Weak<NetMeshBase>) -> Self {
        Self { object, replica, base }
    }

    /// The underlying MeshObject.
    pub fn mesh_object(&self) -> &Arc<MeshObject> {
        &self.object
    }

    /// The replication state.
    pub fn replica_state(&self) -> &Arc<ReplicaState> {
        &self.replica
    }

    /// The NetMeshBase, if it is still alive.
    pub fn net_mesh_base(&self) -> Option<Arc<NetMeshBase>> {
        self.base.upgrade()
    }

    /// The proxies of the peers this replica is replicated with.
    pub fn proxies(&self) -> Vec<Arc<dyn Proxy>> {
        self.replica.proxies()
    }

    /// The proxy towards the home replica; `None` if this is the home replica.
    pub fn home_proxy(&self) -> Option<Arc<dyn Proxy>> {
        self.replica.home_proxy()
    }

    /// The proxy towards the lock holder; `None` if the lock is held here.
    pub fn lock_proxy(&self) -> Option<Arc<dyn Proxy>> {
        self.replica.lock_proxy()
    }

    /// Index of the proxy towards the home replica.
    pub fn home_proxy_index(&self) -> Option<usize> {
        self.replica.home_proxy_index()
    }

    /// Index of the proxy towards the lock holder.
    pub fn lock_proxy_index(&self) -> Option<usize> {
        self.replica.lock_proxy_index()
    }

    /// True if this replica holds the update lock.
    pub fn has_lock(&self) -> bool {
        self.replica.lock_proxy_index().is_none()
    }

    /// True if this is the home replica.
    pub fn is_home_replica(&self) -> bool {
        self.replica.home_proxy_index().is_none()
    }

    /// Whether this replica gives up its lock when a peer asks. A MeshBase
    /// that refuses to give up locks overrides the per-object setting.
    pub fn will_give_up_lock(&self) -> bool {
        let refuses = self
            .base
            .upgrade()
            .map(|b| b.refuses_to_give_up_lock())
            .unwrap_or(false);
        !refuses && self.replica.give_up_lock_flag()
    }

    /// Sets whether this replica gives up its lock when a peer asks.
    pub fn set_will_give_up_lock(&self, value: bool) {
        self.replica.links.lock().give_up_lock = value;
    }

    /// Whether this replica gives up home status when a peer asks.
    pub fn will_give_up_home_replica(&self) -> bool {
        self.replica.give_up_home_replica_flag()
    }

    /// Sets whether this replica gives up home status when a peer asks.
    pub fn set_will_give_up_home_replica(&self, value: bool) {
        self.replica.links.lock().give_up_home_replica = value;
    }

    /// Takes the lock locally without asking anybody.
    pub fn force_obtain_lock(&self) {
        self.replica.set_lock(None);
        info!("Forced lock of {}", self.identifier());
    }

    /// Re-points home and lock towards the given proxy.
    pub fn make_replica_from(&self, proxy: Arc<dyn Proxy>) {
        let index = self.replica.add_proxy(proxy);
        let mut links = self.replica.links.lock();
        links.home = Some(index);
        links.lock = Some(index);
    }

    /// Hands the lock to the peer at the other end of `proxy`.
    pub(crate) fn give_lock_to(&self, proxy: Arc<dyn Proxy>) {
        let index = self.replica.add_proxy(proxy);
        self.replica.set_lock(Some(index));
    }

    /// Hands home status to the peer at the other end of `proxy`.
    pub(crate) fn give_home_replica_to(&self, proxy: Arc<dyn Proxy>) {
        let index = self.replica.add_proxy(proxy);
        self.replica.set_home(Some(index));
    }

    fn timeout(&self) -> Duration {
        self.base
            .upgrade()
            .map(|b| b.config().try_to_obtain_lock_timeout())
            .unwrap_or(Duration::ZERO)
    }

    /// Obtains the update lock, asking the lock holder if needed and waiting
    /// at most the configured lock timeout.
    pub async fn try_to_obtain_lock(&self) -> NetResult<()> {
        self.try_to_obtain_lock_within(self.timeout()).await
    }

    /// Like [`NetMeshObject::try_to_obtain_lock`] with an explicit timeout.
    pub async fn try_to_obtain_lock_within(&self, timeout: Duration) -> NetResult<()> {
        let Some(proxy) = self.replica.lock_proxy() else {
            return Ok(());
        };
        if self.obtain_right(proxy, ReplicaRight::UpdateLock, timeout).await? {
            self.replica.set_lock(None);
            debug!("Obtained lock of {}", self.identifier());
            Ok(())
        } else {
            Err(NetError::CannotObtainLock {
                identifier: self.identifier().clone(),
            })
        }
    }

    /// Becomes the home replica, asking the current home if needed.
    pub async fn try_to_obtain_home_replica(&self) -> NetResult<()> {
        self.try_to_obtain_home_replica_within(self.timeout()).await
    }

    /// Like [`NetMeshObject::try_to_obtain_home_replica`] with an explicit timeout.
    pub async fn try_to_obtain_home_replica_within(&self, timeout: Duration) -> NetResult<()> {
        let Some(proxy) = self.replica.home_proxy() else {
            return Ok(());
        };
        if self.obtain_right(proxy, ReplicaRight::HomeReplica, timeout).await? {
            self.replica.set_home(None);
            debug!("Became home replica of {}", self.identifier());
            Ok(())
        } else {
            Err(NetError::Proxy(ProxyError::Refused {
                partner: self.partner_of_home().unwrap_or_else(|| self.identifier().mesh_base().clone()),
                reason: format!("home replica of {} not given up", self.identifier()),
            }))
        }
    }

    fn partner_of_home(&self) -> Option<MeshBaseIdentifier> {
        self.replica.home_proxy().map(|p| p.partner_identifier().clone())
    }

    async fn obtain_right(&self, proxy: Arc<dyn Proxy>, right: ReplicaRight, timeout: Duration) -> NetResult<bool> {
        let request = proxy.try_to_obtain_rights(right, vec![self.identifier().clone()]);
        match tokio::time::timeout(timeout, request).await {
            Err(_) => Err(NetError::RemoteQueryTimeout {
                identifier: self.identifier().clone(),
                waited_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(granted)) => Ok(granted.contains(self.identifier())),
        }
    }
}

impl Deref for NetMeshObject {
    type Target = MeshObject;

    fn deref(&self) -> &MeshObject {
        &self.object
    }
}

impl fmt::Debug for NetMeshObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetMeshObject")
            .field("identifier", self.object.identifier())
            .field("replica", &self.replica)
            .finish()
    }
}

impl PartialEq<MeshObjectIdentifier> for NetMeshObject {
    fn eq(&self, other: &MeshObjectIdentifier) -> bool {
        self.object.identifier() == other
    }
}
