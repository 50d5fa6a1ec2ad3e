//! MeshBase: the local store of MeshObjects.
//!
//! A MeshBase owns its objects, the type collaborator, the optional
//! access-control collaborator and the transaction slot. Objects are created
//! and deleted through a [`MeshBaseLifecycleManager`]; everything else goes
//! through the objects themselves inside a transaction.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::access::AccessManager;
use crate::config::MeshBaseConfig;
use crate::error::{MeshError, MeshResult, TransactionError};
use crate::event::Change;
use crate::facade::FacadeCache;
use crate::identifier::{MeshBaseIdentifier, MeshObjectIdentifier};
use crate::lifecycle::MeshBaseLifecycleManager;
use crate::mesh_object::{EquivalencePointers, MeshObject, MeshObjectTimes};
use crate::model::ModelBase;
use crate::transaction::{Transaction, TransactionGuard, TransactionListener, TransactionSlot};

/// Decides whether a MeshObject may be mutated locally.
///
/// A plain MeshBase may always update its objects; a replicating MeshBase
/// only where it holds the update lock.
pub trait UpdateRightsPolicy: Send + Sync {
    /// Returns `NotPermitted` if the object must not be updated here.
    fn check_update_rights(&self, object: &MeshObject) -> MeshResult<()>;
}

/// Builds a [`MeshBase`].
pub struct MeshBaseBuilder {
    identifier: MeshBaseIdentifier,
    model: Arc<dyn ModelBase>,
    access: Option<Arc<dyn AccessManager>>,
    update_rights: Option<Arc<dyn UpdateRightsPolicy>>,
    commit_hooks: Vec<Arc<dyn TransactionListener>>,
    config: MeshBaseConfig,
}

impl MeshBaseBuilder {
    /// Sets the access-control collaborator.
    pub fn access_manager(mut self, access: Arc<dyn AccessManager>) -> Self {
        self.access = Some(access);
        self
    }

    /// Sets the update-rights policy.
    pub fn update_rights_policy(mut self, policy: Arc<dyn UpdateRightsPolicy>) -> Self {
        self.update_rights = Some(policy);
        self
    }

    /// Adds a hook that sees every committed transaction after the listeners.
    pub fn commit_hook(mut self, hook: Arc<dyn TransactionListener>) -> Self {
        self.commit_hooks.push(hook);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: MeshBaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates the MeshBase together with its home object.
    pub fn build(self) -> Arc<MeshBase> {
        let home_id = MeshObjectIdentifier::home_of(&self.identifier);
        let base = Arc::new_cyclic(|weak| {
            let home = Arc::new(MeshObject::new(
                home_id.clone(),
                weak.clone(),
                MeshObjectTimes::default(),
                EquivalencePointers::default(),
            ));
            let store = DashMap::new();
            store.insert(home_id, home.clone());
            MeshBase {
                identifier: self.identifier,
                home,
                store,
                model: self.model,
                access: self.access,
                update_rights: self.update_rights,
                transactions: TransactionSlot::new(),
                listeners: RwLock::new(Vec::new()),
                commit_hooks: self.commit_hooks,
                facades: FacadeCache::new(self.config.facade_cache_capacity),
                alive: AtomicBool::new(true),
                config: self.config,
            }
        });
        info!("Created mesh base {}", base.identifier);
        base
    }
}

/// The local store of MeshObjects.
pub struct MeshBase {
    identifier: MeshBaseIdentifier,
    home: Arc<MeshObject>,
    store: DashMap<MeshObjectIdentifier, Arc<MeshObject>>,
    model: Arc<dyn ModelBase>,
    access: Option<Arc<dyn AccessManager>>,
    update_rights: Option<Arc<dyn UpdateRightsPolicy>>,
    transactions: TransactionSlot,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    commit_hooks: Vec<Arc<dyn TransactionListener>>,
    facades: FacadeCache,
    alive: AtomicBool,
    config: MeshBaseConfig,
}

impl MeshBase {
    /// Starts building a MeshBase.
    pub fn builder(identifier: MeshBaseIdentifier, model: Arc<dyn ModelBase>) -> MeshBaseBuilder {
        MeshBaseBuilder {
            identifier,
            model,
            access: None,
            update_rights: None,
            commit_hooks: Vec::new(),
            config: MeshBaseConfig::default(),
        }
    }

    /// The identifier of this MeshBase.
    pub fn identifier(&self) -> &MeshBaseIdentifier {
        &self.identifier
    }

    /// The identifier of the home object.
    pub fn home_object_identifier(&self) -> &MeshObjectIdentifier {
        self.home.identifier()
    }

    /// The home object; it exists for the whole life of the MeshBase.
    pub fn home_object(&self) -> Arc<MeshObject> {
        self.home.clone()
    }

    /// The type collaborator.
    pub fn model_base(&self) -> &Arc<dyn ModelBase> {
        &self.model
    }

    /// The access-control collaborator, if any.
    pub fn access_manager(&self) -> Option<&Arc<dyn AccessManager>> {
        self.access.as_ref()
    }

    /// The typed facade cache.
    pub fn facades(&self) -> &FacadeCache {
        &self.facades
    }

    /// The configuration.
    pub fn config(&self) -> &MeshBaseConfig {
        &self.config
    }

    /// A lifecycle manager for this MeshBase.
    pub fn lifecycle(self: &Arc<Self>) -> MeshBaseLifecycleManager {
        MeshBaseLifecycleManager::new(self.clone())
    }

    /// Finds a locally resident object.
    pub fn find_mesh_object_by_identifier(&self, identifier: &MeshObjectIdentifier) -> Option<Arc<MeshObject>> {
        self.store.get(identifier).map(|e| e.value().clone())
    }

    /// Like [`MeshBase::find_mesh_object_by_identifier`], failing with `NotFound`.
    pub fn get_mesh_object(&self, identifier: &MeshObjectIdentifier) -> MeshResult<Arc<MeshObject>> {
        self.find_mesh_object_by_identifier(identifier)
            .ok_or_else(|| MeshError::NotFound {
                identifier: identifier.clone(),
            })
    }

    /// Finds several objects; absent ones are `None`, in argument order.
    pub fn find_mesh_objects_by_identifier(
        &self,
        identifiers: &[MeshObjectIdentifier],
    ) -> Vec<Option<Arc<MeshObject>>> {
        identifiers
            .iter()
            .map(|id| self.find_mesh_object_by_identifier(id))
            .collect()
    }

    /// All locally resident objects, in no particular order.
    pub fn mesh_objects(&self) -> Vec<Arc<MeshObject>> {
        self.store.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of locally resident objects, including the home object.
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// True until [`MeshBase::die`] is called.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn check_alive(&self) -> MeshResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(MeshError::MeshBaseDead {
                mesh_base: self.identifier.clone(),
            })
        }
    }

    /// Shuts the MeshBase down; all its objects become dead.
    pub fn die(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        for entry in self.store.iter() {
            entry.value().mark_dead();
        }
        self.store.clear();
        info!("Mesh base {} died", self.identifier);
    }

    // ---- transactions ----

    fn guard(
        self: &Arc<Self>,
        wait: Option<Duration>,
    ) -> Result<TransactionGuard, TransactionError> {
        if !self.is_alive() {
            return Err(TransactionError::MeshBaseDead {
                mesh_base: self.identifier.clone(),
            });
        }
        let tx = self.transactions.acquire(&self.identifier, wait)?;
        Ok(TransactionGuard::new(self.clone(), tx, true))
    }

    /// Starts a transaction, waiting for another thread's transaction to end
    /// for at most the configured wait timeout.
    pub fn create_transaction_asap(self: &Arc<Self>) -> Result<TransactionGuard, TransactionError> {
        self.guard(self.config.transaction_wait_timeout())
    }

    /// Starts a transaction, failing with `Busy` if another thread holds one.
    pub fn create_transaction_now(self: &Arc<Self>) -> Result<TransactionGuard, TransactionError> {
        self.guard(Some(Duration::ZERO))
    }

    /// Joins the transaction the calling thread already owns, or starts one.
    /// Only a guard that started the transaction commits it.
    pub fn create_transaction_asap_if_needed(self: &Arc<Self>) -> Result<TransactionGuard, TransactionError> {
        match self.transactions.owned_by_current_thread() {
            Some(tx) => Ok(TransactionGuard::new(self.clone(), tx, false)),
            None => self.create_transaction_asap(),
        }
    }

    /// Runs `f` inside a transaction, starting one if the calling thread does
    /// not own one already.
    pub fn execute_as_transaction<T, E, F>(self: &Arc<Self>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TransactionError>,
    {
        let guard = self.create_transaction_asap_if_needed()?;
        let result = f();
        guard.commit();
        result
    }

    /// Verifies that the calling thread owns the active transaction.
    pub fn check_transaction(&self) -> Result<Arc<Transaction>, TransactionError> {
        if !self.is_alive() {
            return Err(TransactionError::MeshBaseDead {
                mesh_base: self.identifier.clone(),
            });
        }
        self.transactions.check(&self.identifier)
    }

    /// The active transaction, whichever thread owns it.
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        self.transactions.current()
    }

    /// Registers a listener for committed transactions.
    pub fn add_transaction_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregisters a transaction listener.
    pub fn remove_transaction_listener(&self, listener: &Arc<dyn TransactionListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn commit_transaction(&self, tx: &Arc<Transaction>) {
        if !self.transactions.release(tx) {
            return;
        }
        let changes = tx.changes().len();
        debug!("Committed {} on {} with {} changes", tx.id(), self.identifier, changes);
        if changes == 0 {
            return;
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners.iter().chain(self.commit_hooks.iter()) {
            if catch_unwind(AssertUnwindSafe(|| listener.transaction_committed(tx))).is_err() {
                warn!("Transaction listener panicked on {} of {}", tx.id(), self.identifier);
            }
        }
    }

    // ---- rights ----

    /// Consults the update-rights policy for the object.
    pub fn check_update_rights(&self, object: &MeshObject) -> MeshResult<()> {
        match &self.update_rights {
            Some(policy) => policy.check_update_rights(object),
            None => Ok(()),
        }
    }

    // ---- store mutation, used by lifecycle managers ----

    /// Registers a freshly instantiated object and records its creation.
    pub fn put_into_mesh_base(
        &self,
        object: Arc<MeshObject>,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<()> {
        self.check_alive()?;
        let tx = self.check_transaction()?;
        let identifier = object.identifier().clone();
        match self.store.entry(identifier.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(MeshError::IdentifierNotUnique { identifier });
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(object.clone());
            }
        }
        object.record_change(&tx, origin, object.time_created(), Change::Created);
        Ok(())
    }

    /// Unregisters an object, records `change` (`Deleted` or `Purged`) and
    /// marks the object dead.
    pub fn remove_from_mesh_base(
        &self,
        identifier: &MeshObjectIdentifier,
        change: Change,
        origin: Option<&MeshBaseIdentifier>,
        time: i64,
    ) -> MeshResult<Arc<MeshObject>> {
        self.check_alive()?;
        if identifier == self.home_object_identifier() {
            return Err(MeshError::MustNotDeleteHomeObject {
                identifier: identifier.clone(),
            });
        }
        let tx = self.check_transaction()?;
        let (_, object) = self.store.remove(identifier).ok_or_else(|| MeshError::NotFound {
            identifier: identifier.clone(),
        })?;
        object.record_change(&tx, origin, time, change);
        self.facades.invalidate_object(identifier);
        object.mark_dead();
        Ok(object)
    }
}

impl fmt::Debug for MeshBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshBase")
            .field("identifier", &self.identifier)
            .field("size", &self.store.len())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InMemoryModelBase;
    use parking_lot::Mutex;

    fn base() -> Arc<MeshBase> {
        MeshBase::builder(MeshBaseIdentifier::new("test"), Arc::new(InMemoryModelBase::new())).build()
    }

    struct Collector(Mutex<Vec<usize>>);

    impl TransactionListener for Collector {
        fn transaction_committed(&self, transaction: &Transaction) {
            self.0.lock().push(transaction.changes().len());
        }
    }

    #[test]
    fn test_home_object_exists() {
        let base = base();
        assert_eq!(base.size(), 1);
        let home = base.home_object();
        assert!(home.is_home_object());
        assert!(base.find_mesh_object_by_identifier(home.identifier()).is_some());
    }

    #[test]
    fn test_commit_publishes_to_listeners() {
        let base = base();
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        base.add_transaction_listener(collector.clone());

        let tx = base.create_transaction_asap().unwrap();
        base.lifecycle().create_mesh_object().unwrap();
        base.lifecycle().create_mesh_object().unwrap();
        tx.commit();

        // empty transactions are not published
        base.create_transaction_asap().unwrap().commit();
        assert_eq!(*collector.0.lock(), vec![2]);
    }

    #[test]
    fn test_nested_transaction_is_joined() {
        let base = base();
        let outer = base.create_transaction_asap().unwrap();
        assert!(matches!(
            base.create_transaction_asap(),
            Err(TransactionError::ActiveAlready { .. })
        ));
        let inner = base.create_transaction_asap_if_needed().unwrap();
        assert!(!inner.is_owner());
        assert_eq!(inner.transaction().id(), outer.transaction().id());
        drop(inner);
        assert!(base.check_transaction().is_ok());
        outer.commit();
        assert!(base.check_transaction().is_err());
    }

    #[test]
    fn test_create_transaction_now_is_busy_elsewhere() {
        let base = base();
        let _tx = base.create_transaction_asap().unwrap();
        let other = base.clone();
        let result = std::thread::spawn(move || other.create_transaction_now().map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(TransactionError::Busy { .. })));
    }

    #[test]
    fn test_execute_as_transaction() {
        let base = base();
        let created = base
            .execute_as_transaction(|| base.lifecycle().create_mesh_object())
            .unwrap();
        assert!(base.current_transaction().is_none());
        assert!(base.find_mesh_object_by_identifier(created.identifier()).is_some());
    }

    #[test]
    fn test_die_kills_objects() {
        let base = base();
        let obj = base
            .execute_as_transaction(|| base.lifecycle().create_mesh_object())
            .unwrap();
        base.die();
        assert!(obj.is_dead());
        assert!(base.home_object().is_dead());
        assert!(matches!(
            base.create_transaction_asap(),
            Err(TransactionError::MeshBaseDead { .. })
        ));
    }

    #[test]
    fn test_update_rights_policy_consulted() {
        struct ReadOnly;
        impl UpdateRightsPolicy for ReadOnly {
            fn check_update_rights(&self, object: &MeshObject) -> MeshResult<()> {
                Err(crate::access::not_permitted(object.identifier(), "update", "replica"))
            }
        }
        let base = MeshBase::builder(MeshBaseIdentifier::new("ro"), Arc::new(InMemoryModelBase::new()))
            .update_rights_policy(Arc::new(ReadOnly))
            .build();
        let tx = base.create_transaction_asap().unwrap();
        let a = base.lifecycle().create_mesh_object().unwrap();
        let b = base.lifecycle().create_mesh_object().unwrap();
        assert!(matches!(a.relate(&b), Err(MeshError::NotPermitted { .. })));
        tx.commit();
    }
}
