//! NetMeshBase: a MeshBase that takes part in a replication graph.
//!
//! On the requesting side it resolves access paths through proxies
//! (`access_locally`). On the serving side it hands out replicas, gives up
//! rights and applies updates pushed by peers. Every committed transaction is
//! turned into per-peer replica updates by the commit hook.

use dashmap::DashMap;
use meshbase_core::access::not_permitted;
use meshbase_core::{
    AccessManager, Change, MeshBase, MeshBaseIdentifier, MeshError, MeshObject, MeshObjectEvent,
    MeshObjectIdentifier, MeshResult, ModelBase, Transaction, TransactionListener, UpdateRightsPolicy,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::access_spec::NetMeshObjectAccessSpecification;
use crate::config::NetMeshBaseConfig;
use crate::error::{AccessFailure, NetError, NetMeshObjectAccessError, NetResult, ProxyError};
use crate::externalized::{ExternalizedNetMeshObject, ReplicaUpdate};
use crate::net_lifecycle::NetMeshBaseLifecycleManager;
use crate::net_mesh_object::{NetMeshObject, ReplicaState};
use crate::proxy::{NoProxyFactory, Proxy, ProxyFactory, ReplicaQueryResult, ReplicaRight};
use crate::proxy_manager::ProxyManager;
use crate::return_sync::ReturnSynchronizer;

/// Access-control checks specific to remote access.
pub trait NetAccessManager: Send + Sync {
    /// May these paths be resolved through the network? Consulted once per
    /// `access_locally` call, before any proxy is contacted.
    fn check_permitted_access_locally(
        &self,
        _mesh_base: &MeshBaseIdentifier,
        _paths: &[NetMeshObjectAccessSpecification],
    ) -> MeshResult<()> {
        Ok(())
    }
}

/// Builds a [`NetMeshBase`].
pub struct NetMeshBaseBuilder {
    identifier: MeshBaseIdentifier,
    model: Arc<dyn ModelBase>,
    access: Option<Arc<dyn AccessManager>>,
    net_access: Option<Arc<dyn NetAccessManager>>,
    factory: Arc<dyn ProxyFactory>,
    config: NetMeshBaseConfig,
}

impl NetMeshBaseBuilder {
    /// Sets the access-control collaborator.
    pub fn access_manager(mut self, access: Arc<dyn AccessManager>) -> Self {
        self.access = Some(access);
        self
    }

    /// Sets the remote access-control collaborator.
    pub fn net_access_manager(mut self, access: Arc<dyn NetAccessManager>) -> Self {
        self.net_access = Some(access);
        self
    }

    /// Sets the factory that connects this node to its peers.
    pub fn proxy_factory(mut self, factory: Arc<dyn ProxyFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: NetMeshBaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates the NetMeshBase.
    pub fn build(self) -> Arc<NetMeshBase> {
        let net = Arc::new_cyclic(|weak: &Weak<NetMeshBase>| {
            let mut core = MeshBase::builder(self.identifier, self.model)
                .config(self.config.base.clone())
                .update_rights_policy(Arc::new(LockPolicy { net: weak.clone() }))
                .commit_hook(Arc::new(ReplicationHook { net: weak.clone() }));
            if let Some(access) = self.access {
                core = core.access_manager(access);
            }
            NetMeshBase {
                core: core.build(),
                proxies: ProxyManager::new(weak.clone(), self.factory),
                replicas: DashMap::new(),
                synchronizer: ReturnSynchronizer::new(),
                next_query: AtomicU64::new(1),
                net_access: self.net_access,
                refuse_to_give_up_lock: AtomicBool::new(self.config.refuse_to_give_up_lock),
                config: self.config,
                self_ref: weak.clone(),
            }
        });
        info!("Created net mesh base {}", net.identifier());
        net
    }
}

/// A MeshBase that replicates its objects with peers.
pub struct NetMeshBase {
    core: Arc<MeshBase>,
    proxies: ProxyManager,
    replicas: DashMap<MeshObjectIdentifier, Arc<ReplicaState>>,
    synchronizer: ReturnSynchronizer<u64, ReplicaQueryResult>,
    next_query: AtomicU64,
    net_access: Option<Arc<dyn NetAccessManager>>,
    refuse_to_give_up_lock: AtomicBool,
    config: NetMeshBaseConfig,
    self_ref: Weak<NetMeshBase>,
}

impl NetMeshBase {
    /// Starts building a NetMeshBase.
    pub fn builder(identifier: MeshBaseIdentifier, model: Arc<dyn ModelBase>) -> NetMeshBaseBuilder {
        NetMeshBaseBuilder {
            identifier,
            model,
            access: None,
            net_access: None,
            factory: Arc::new(NoProxyFactory),
            config: NetMeshBaseConfig::default(),
        }
    }

    /// The identifier of this node.
    pub fn identifier(&self) -> &MeshBaseIdentifier {
        self.core.identifier()
    }

    /// The local store.
    pub fn core(&self) -> &Arc<MeshBase> {
        &self.core
    }

    /// The configuration.
    pub fn config(&self) -> &NetMeshBaseConfig {
        &self.config
    }

    /// The proxies to the peers.
    pub fn proxy_manager(&self) -> &ProxyManager {
        &self.proxies
    }

    /// The synchronizer joining replies of `access_locally`.
    pub fn synchronizer(&self) -> &ReturnSynchronizer<u64, ReplicaQueryResult> {
        &self.synchronizer
    }

    /// A lifecycle manager for this NetMeshBase.
    pub fn lifecycle(self: &Arc<Self>) -> NetMeshBaseLifecycleManager {
        NetMeshBaseLifecycleManager::new(self.clone())
    }

    /// True if no replica of this node gives up its lock.
    pub fn refuses_to_give_up_lock(&self) -> bool {
        self.refuse_to_give_up_lock.load(Ordering::Relaxed)
    }

    /// Makes every replica of this node refuse, or stop refusing, to give up its lock.
    pub fn set_refuse_to_give_up_lock(&self, refuse: bool) {
        self.refuse_to_give_up_lock.store(refuse, Ordering::Relaxed);
    }

    /// The home object.
    pub fn home_object(&self) -> NetMeshObject {
        self.wrap(self.core.home_object())
    }

    /// Finds a locally resident object.
    pub fn find_replica(&self, identifier: &MeshObjectIdentifier) -> Option<NetMeshObject> {
        self.core
            .find_mesh_object_by_identifier(identifier)
            .map(|object| self.wrap(object))
    }

    /// Shuts the node down: proxies first, then the local store.
    pub fn die(&self) {
        self.proxies.die();
        self.core.die();
        self.replicas.clear();
        info!("Net mesh base {} died", self.identifier());
    }

    pub(crate) fn wrap(&self, object: Arc<MeshObject>) -> NetMeshObject {
        // dead objects must not bring their replica state back
        let state = if object.is_dead() {
            self.existing_replica_state(object.identifier())
                .unwrap_or_else(|| Arc::new(self.default_replica_state()))
        } else {
            self.replica_state_for(object.identifier())
        };
        NetMeshObject::new(object, state, self.self_ref.clone())
    }

    fn default_replica_state(&self) -> ReplicaState {
        ReplicaState::local(
            self.config.default_will_give_up_lock,
            self.config.default_will_give_up_home_replica,
        )
    }

    fn replica_state_for(&self, identifier: &MeshObjectIdentifier) -> Arc<ReplicaState> {
        self.replicas
            .entry(identifier.clone())
            .or_insert_with(|| Arc::new(self.default_replica_state()))
            .value()
            .clone()
    }

    pub(crate) fn existing_replica_state(&self, identifier: &MeshObjectIdentifier) -> Option<Arc<ReplicaState>> {
        self.replicas.get(identifier).map(|s| s.value().clone())
    }

    pub(crate) fn register_replica(&self, identifier: MeshObjectIdentifier, state: Arc<ReplicaState>) {
        self.replicas.insert(identifier, state);
    }

    pub(crate) fn forget_replica(&self, identifier: &MeshObjectIdentifier) {
        self.replicas.remove(identifier);
    }

    pub(crate) fn obtain_proxy(&self, partner: &MeshBaseIdentifier) -> NetResult<Arc<dyn Proxy>> {
        Ok(self.proxies.obtain_for(partner, None)?)
    }

    // ---- requesting side ----

    /// Resolves the paths, fetching replicas through proxies where needed,
    /// waiting at most the configured timeout.
    pub async fn access_locally(
        self: &Arc<Self>,
        paths: &[NetMeshObjectAccessSpecification],
    ) -> Result<Vec<Option<NetMeshObject>>, NetMeshObjectAccessError> {
        self.access_locally_with_timeout(paths, self.config.access_locally_timeout())
            .await
    }

    /// Resolves the paths, waiting at most `timeout` for proxies. `None` waits
    /// forever; `Some(Duration::ZERO)` returns what is available without waiting.
    ///
    /// # Returns
    /// One slot per path, in order. Paths without hops whose object is not
    /// resident, and remote objects a peer could not find, leave a hole.
    pub async fn access_locally_with_timeout(
        self: &Arc<Self>,
        paths: &[NetMeshObjectAccessSpecification],
        timeout: Option<Duration>,
    ) -> Result<Vec<Option<NetMeshObject>>, NetMeshObjectAccessError> {
        let local = self.identifier().clone();
        let corrected: Vec<NetMeshObjectAccessSpecification> =
            paths.iter().map(|p| p.corrected_for(&local)).collect();

        let mut results: Vec<Option<NetMeshObject>> = vec![None; paths.len()];
        let mut unresolved = Vec::new();
        for (i, path) in corrected.iter().enumerate() {
            let target = path.target_identifier(&local);
            match self.find_replica(&target) {
                Some(object) => results[i] = Some(object),
                None if path.is_local() => debug!("{} is not resident in {}", target, local),
                None => unresolved.push(i),
            }
        }
        if unresolved.is_empty() {
            return Ok(results);
        }

        if let Some(net_access) = &self.net_access {
            let requested: Vec<NetMeshObjectAccessSpecification> =
                unresolved.iter().map(|i| corrected[*i].clone()).collect();
            if let Err(e) = net_access.check_permitted_access_locally(&local, &requested) {
                return Err(access_error(paths, results, &unresolved, AccessFailure::NotPermitted(e)));
            }
        }

        let group = self.synchronizer.begin_group();
        let mut batches: Vec<(u64, Vec<usize>)> = Vec::new();
        let mut failures: Vec<(ProxyError, Vec<usize>)> = Vec::new();
        let mut remaining = unresolved.clone();
        while let Some(&first) = remaining.first() {
            let Some(hop) = corrected[first].first_hop().cloned() else {
                remaining.remove(0);
                continue;
            };
            let (batch, rest): (Vec<usize>, Vec<usize>) = std::mem::take(&mut remaining)
                .into_iter()
                .partition(|i| corrected[*i].first_hop().map(|h| &h.identifier) == Some(&hop.identifier));
            remaining = rest;

            let proxy = match self.proxies.obtain_for(&hop.identifier, hop.coherence.clone()) {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!("No proxy to {}: {}", hop.identifier, e);
                    failures.push((e, batch));
                    continue;
                }
            };
            let remainders: Vec<NetMeshObjectAccessSpecification> =
                batch.iter().map(|i| corrected[*i].without_first_hop()).collect();
            let key = self.next_query.fetch_add(1, Ordering::Relaxed);
            let ticket = group.add_open_query(key);
            debug!("Asking {} for {} replica(s), query {}", hop.identifier, batch.len(), key);
            match proxy.obtain_replicas(remainders, ticket.clone()) {
                Ok(()) => batches.push((key, batch)),
                Err(e) => {
                    warn!("Dispatch to {} failed: {}", hop.identifier, e);
                    ticket.complete(Err(e.clone()));
                    failures.push((e, batch));
                }
            }
        }

        let completed = group.join(timeout).await;

        for i in &unresolved {
            results[*i] = self.find_replica(&corrected[*i].target_identifier(&local));
        }
        for (key, batch) in batches {
            if let Some(Err(e)) = group.take_result_for(&key) {
                failures.push((e, batch));
            }
        }
        if let Some((e, batch)) = failures.into_iter().next() {
            return Err(access_error(paths, results, &batch, AccessFailure::Proxy(e)));
        }
        let missing: Vec<usize> = unresolved.iter().copied().filter(|i| results[*i].is_none()).collect();
        if !missing.is_empty() && !completed {
            debug!("{} path(s) still unresolved on {}", missing.len(), local);
            return Err(access_error(paths, results, &missing, AccessFailure::QueryOngoing));
        }
        Ok(results)
    }

    /// Applies replicas received from `via` inside one transaction.
    pub async fn ripple_in_replicas(
        self: &Arc<Self>,
        via: MeshBaseIdentifier,
        replicas: Vec<ExternalizedNetMeshObject>,
    ) -> ReplicaQueryResult {
        let base = self.clone();
        let partner = via.clone();
        let outcome = tokio::task::spawn_blocking(move || base.ripple_in_replicas_blocking(&via, &replicas)).await;
        match outcome {
            Ok(Ok(identifiers)) => Ok(identifiers),
            Ok(Err(e)) => Err(ProxyError::Failed {
                partner,
                reason: e.to_string(),
            }),
            Err(e) => Err(ProxyError::Failed {
                partner,
                reason: e.to_string(),
            }),
        }
    }

    /// Like [`NetMeshBase::ripple_in_replicas`], on the calling thread. The
    /// calling thread must not hold a transaction of this node.
    pub fn ripple_in_replicas_blocking(
        self: &Arc<Self>,
        via: &MeshBaseIdentifier,
        replicas: &[ExternalizedNetMeshObject],
    ) -> NetResult<Vec<MeshObjectIdentifier>> {
        if replicas.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.core.create_transaction_asap()?;
        let lifecycle = self.lifecycle();
        let mut identifiers = Vec::with_capacity(replicas.len());
        for ext in replicas {
            match lifecycle.ripple_create(ext, via) {
                Ok(object) => identifiers.push(object.identifier().clone()),
                Err(e) => warn!("Could not ripple in {} from {}: {}", ext.identifier(), via, e),
            }
        }
        guard.commit();
        debug!("Rippled {} replica(s) from {} into {}", identifiers.len(), via, self.identifier());
        Ok(identifiers)
    }

    // ---- serving side ----

    /// Resolves paths on behalf of `requester` and returns the replicas to
    /// send back. Paths that cannot be resolved are left out.
    pub async fn serve_obtain_replicas(
        self: &Arc<Self>,
        requester: &MeshBaseIdentifier,
        paths: Vec<NetMeshObjectAccessSpecification>,
    ) -> Vec<ExternalizedNetMeshObject> {
        let objects = match self.access_locally(&paths).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!("Serving {} partially: {}", requester, e);
                e.partial
            }
        };
        objects
            .into_iter()
            .flatten()
            .filter_map(|object| match self.externalize_for(requester, &object) {
                Ok(ext) => Some(ext),
                Err(e) => {
                    warn!("Cannot externalize {} for {}: {}", object.identifier(), requester, e);
                    None
                }
            })
            .collect()
    }

    /// The replica form of `object` as sent to `requester`. If this node is
    /// where the requester's replica should point, the requester is
    /// registered as a dependent.
    pub fn externalize_for(
        &self,
        requester: &MeshBaseIdentifier,
        object: &NetMeshObject,
    ) -> NetResult<ExternalizedNetMeshObject> {
        let snapshot = object.externalize()?;
        let home_partner = object.home_proxy().map(|p| p.partner_identifier().clone());
        let proxy_towards_home = match home_partner {
            Some(home) if !self.config.points_replicas_to_itself && &home != requester => Some(home),
            _ => {
                object.replica_state().add_proxy(self.obtain_proxy(requester)?);
                None
            }
        };
        Ok(ExternalizedNetMeshObject {
            object: snapshot,
            give_up_lock: object.will_give_up_lock(),
            give_up_home_replica: object.will_give_up_home_replica(),
            proxy_towards_home,
        })
    }

    /// Hands a right over to `requester` for those objects whose policy
    /// allows it, reclaiming it from further upstream first if needed.
    ///
    /// # Returns
    /// The identifiers for which the right was handed over.
    pub async fn serve_rights_request(
        self: &Arc<Self>,
        requester: &MeshBaseIdentifier,
        right: ReplicaRight,
        identifiers: Vec<MeshObjectIdentifier>,
    ) -> Vec<MeshObjectIdentifier> {
        let mut granted = Vec::new();
        for identifier in identifiers {
            let Some(object) = self.find_replica(&identifier) else {
                debug!("{} asked for {:?} of unknown {}", requester, right, identifier);
                continue;
            };
            let proxy = match self.obtain_proxy(requester) {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!("No proxy back to {}: {}", requester, e);
                    continue;
                }
            };
            match right {
                ReplicaRight::UpdateLock => {
                    if !object.will_give_up_lock() {
                        debug!("Refusing to give up lock of {} to {}", identifier, requester);
                        continue;
                    }
                    let upstream = object
                        .lock_proxy()
                        .filter(|p| p.partner_identifier() != requester);
                    if upstream.is_some() {
                        if let Err(e) = object.try_to_obtain_lock().await {
                            warn!("Cannot reclaim lock of {} for {}: {}", identifier, requester, e);
                            continue;
                        }
                    }
                    object.give_lock_to(proxy);
                }
                ReplicaRight::HomeReplica => {
                    if !object.will_give_up_home_replica() {
                        debug!("Refusing to give up home replica of {} to {}", identifier, requester);
                        continue;
                    }
                    let upstream = object
                        .home_proxy()
                        .filter(|p| p.partner_identifier() != requester);
                    if upstream.is_some() {
                        if let Err(e) = object.try_to_obtain_home_replica().await {
                            warn!("Cannot reclaim home replica of {} for {}: {}", identifier, requester, e);
                            continue;
                        }
                    }
                    object.give_home_replica_to(proxy);
                }
            }
            info!("Gave {:?} of {} to {}", right, identifier, requester);
            granted.push(identifier);
        }
        granted
    }

    /// Registers `requester` as holding dependent replicas of the objects.
    pub fn serve_register_dependents(&self, requester: &MeshBaseIdentifier, identifiers: &[MeshObjectIdentifier]) {
        let proxy = match self.obtain_proxy(requester) {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("No proxy back to {}: {}", requester, e);
                return;
            }
        };
        for identifier in identifiers {
            match self.find_replica(identifier) {
                Some(object) => {
                    object.replica_state().add_proxy(proxy.clone());
                }
                None => debug!("{} registered for unknown {}", requester, identifier),
            }
        }
    }

    /// Applies updates pushed by `from`.
    pub async fn apply_replica_updates(
        self: &Arc<Self>,
        from: MeshBaseIdentifier,
        updates: Vec<ReplicaUpdate>,
    ) -> NetResult<()> {
        let base = self.clone();
        tokio::task::spawn_blocking(move || base.apply_replica_updates_blocking(&from, &updates))
            .await
            .map_err(|e| NetError::TaskFailed { reason: e.to_string() })?
    }

    /// Like [`NetMeshBase::apply_replica_updates`], on the calling thread.
    /// Updates of objects that are not resident are ignored.
    pub fn apply_replica_updates_blocking(
        self: &Arc<Self>,
        from: &MeshBaseIdentifier,
        updates: &[ReplicaUpdate],
    ) -> NetResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let guard = self.core.create_transaction_asap()?;
        let lifecycle = self.lifecycle();
        for update in updates {
            let result = match update {
                ReplicaUpdate::Changed(ext) => {
                    if self.core.find_mesh_object_by_identifier(ext.identifier()).is_none() {
                        debug!("Ignoring update of non-resident {}", ext.identifier());
                        continue;
                    }
                    lifecycle.ripple_update(&ext.object, from)
                }
                ReplicaUpdate::Deleted { identifier, time } => match lifecycle.ripple_delete(identifier, from, *time) {
                    Err(NetError::Mesh(MeshError::NotFound { .. })) => Ok(()),
                    other => other.map(|_| ()),
                },
            };
            if let Err(e) = result {
                warn!("Could not apply update of {} from {}: {}", update.identifier(), from, e);
            }
        }
        guard.commit();
        Ok(())
    }

    // ---- commit hook ----

    fn forward_committed(&self, transaction: &Transaction) {
        let changes = transaction.changes();
        let mut order: Vec<&MeshObjectIdentifier> = Vec::new();
        let mut by_source: HashMap<&MeshObjectIdentifier, Vec<&MeshObjectEvent>> = HashMap::new();
        for event in &changes {
            by_source
                .entry(&event.source)
                .or_insert_with(|| {
                    order.push(&event.source);
                    Vec::new()
                })
                .push(event);
        }

        let mut outgoing: Vec<(Arc<dyn Proxy>, Vec<ReplicaUpdate>)> = Vec::new();
        let mut removed = Vec::new();
        for identifier in order {
            let events = &by_source[identifier];
            let removal = events.iter().rev().find(|e| e.is_removal());
            if removal.is_some() {
                removed.push(identifier.clone());
            }
            if events.iter().any(|e| e.change == Change::Created && e.origin.is_some()) {
                continue;
            }
            let Some(state) = self.existing_replica_state(identifier) else {
                continue;
            };
            let proxies = state.proxies();
            if proxies.is_empty() {
                continue;
            }
            let update = match removal {
                Some(event) if event.change == Change::Purged => continue,
                Some(event) => ReplicaUpdate::Deleted {
                    identifier: identifier.clone(),
                    time: event.time,
                },
                None => match self.find_replica(identifier).map(|o| o.externalize()) {
                    Some(Ok(snapshot)) => ReplicaUpdate::Changed(ExternalizedNetMeshObject {
                        object: snapshot,
                        give_up_lock: state.give_up_lock_flag(),
                        give_up_home_replica: state.give_up_home_replica_flag(),
                        proxy_towards_home: None,
                    }),
                    Some(Err(e)) => {
                        warn!("Cannot externalize {} after commit: {}", identifier, e);
                        continue;
                    }
                    None => continue,
                },
            };

            let cause = events[0].origin.as_ref().filter(|o| events.iter().all(|e| e.origin.as_ref() == Some(*o)));
            for proxy in proxies {
                if Some(proxy.partner_identifier()) == cause {
                    continue;
                }
                match outgoing
                    .iter_mut()
                    .find(|(p, _)| p.partner_identifier() == proxy.partner_identifier())
                {
                    Some((_, updates)) => updates.push(update.clone()),
                    None => outgoing.push((proxy, vec![update.clone()])),
                }
            }
        }

        for (proxy, updates) in outgoing {
            debug!(
                "Forwarding {} update(s) of {} to {}",
                updates.len(),
                transaction.id(),
                proxy.partner_identifier()
            );
            proxy.transaction_committed(transaction.id(), updates);
        }
        for identifier in removed {
            self.forget_replica(&identifier);
        }
    }
}

impl fmt::Debug for NetMeshBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetMeshBase")
            .field("identifier", self.identifier())
            .field("proxies", &self.proxies.len())
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

fn access_error(
    paths: &[NetMeshObjectAccessSpecification],
    partial: Vec<Option<NetMeshObject>>,
    indices: &[usize],
    cause: AccessFailure,
) -> NetMeshObjectAccessError {
    NetMeshObjectAccessError {
        partial,
        failed_paths: indices.iter().map(|i| paths[*i].clone()).collect(),
        cause,
    }
}

/// Rejects local updates of replicas whose lock is held elsewhere.
struct LockPolicy {
    net: Weak<NetMeshBase>,
}

impl UpdateRightsPolicy for LockPolicy {
    fn check_update_rights(&self, object: &MeshObject) -> MeshResult<()> {
        let Some(net) = self.net.upgrade() else {
            return Ok(());
        };
        match net
            .existing_replica_state(object.identifier())
            .and_then(|s| s.lock_proxy())
        {
            Some(holder) => Err(not_permitted(
                object.identifier(),
                "update",
                format!("update lock is held by {}", holder.partner_identifier()),
            )),
            None => Ok(()),
        }
    }
}

/// Turns committed transactions into replica updates for the peers.
struct ReplicationHook {
    net: Weak<NetMeshBase>,
}

impl TransactionListener for ReplicationHook {
    fn transaction_committed(&self, transaction: &Transaction) {
        if let Some(net) = self.net.upgrade() {
            net.forward_committed(transaction);
        }
    }
}
