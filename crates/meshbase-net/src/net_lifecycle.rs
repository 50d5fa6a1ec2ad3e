//! Lifecycle operations of a NetMeshBase: local creation and deletion, and
//! the ripple operations through which replicas come, change and go.

use meshbase_core::time::now_millis;
use meshbase_core::{
    Change, EntityType, EquivalencePointers, ExternalizedMeshObject, MeshBaseIdentifier, MeshError,
    MeshObject, MeshObjectIdentifier, MeshObjectTimes, NewMeshObject, PropertyType, RoleType,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};
use crate::externalized::ExternalizedNetMeshObject;
use crate::net_mesh_base::NetMeshBase;
use crate::net_mesh_object::{NetMeshObject, ReplicaState};
use crate::proxy::Proxy;

/// Everything needed to create a NetMeshObject with a given place in the
/// replication graph.
#[derive(Clone, Debug)]
pub struct NewReplica {
    /// The identifier.
    pub identifier: MeshObjectIdentifier,
    /// Types to bless the new object with.
    pub types: Vec<EntityType>,
    /// Time stamps; negative values mean now.
    pub times: MeshObjectTimes,
    /// Whether the replica gives up its lock on request.
    pub give_up_lock: bool,
    /// Whether the replica gives up home status on request.
    pub give_up_home_replica: bool,
    /// The proxies the replica is replicated with.
    pub proxies: Vec<Arc<dyn Proxy>>,
    /// Index into `proxies` of the way towards the home replica.
    pub home_proxy_index: Option<usize>,
    /// Index into `proxies` of the way towards the lock.
    pub lock_proxy_index: Option<usize>,
    /// The peer on whose behalf the object is created.
    pub origin: Option<MeshBaseIdentifier>,
}

impl NewReplica {
    /// A local object with the given identifier and the default policies.
    pub fn new(identifier: MeshObjectIdentifier) -> Self {
        Self {
            identifier,
            types: Vec::new(),
            times: MeshObjectTimes::default(),
            give_up_lock: true,
            give_up_home_replica: true,
            proxies: Vec::new(),
            home_proxy_index: None,
            lock_proxy_index: None,
            origin: None,
        }
    }
}

/// Creates, deletes and ripples the objects of one NetMeshBase.
pub struct NetMeshBaseLifecycleManager {
    net: Arc<NetMeshBase>,
}

impl NetMeshBaseLifecycleManager {
    /// Creates a lifecycle manager for `net`.
    pub fn new(net: Arc<NetMeshBase>) -> Self {
        Self { net }
    }

    /// Creates a local object with a random identifier.
    pub fn create_mesh_object(&self) -> NetResult<NetMeshObject> {
        let object = self.net.core().lifecycle().create_mesh_object()?;
        Ok(self.net.wrap(object))
    }

    /// Creates a local object blessed with `types`.
    pub fn create_mesh_object_with_types(&self, types: &[EntityType]) -> NetResult<NetMeshObject> {
        let object = self.net.core().lifecycle().create_mesh_object_with_types(types)?;
        Ok(self.net.wrap(object))
    }

    /// Creates a local object with the given identifier and types.
    pub fn create_mesh_object_with_identifier(
        &self,
        identifier: MeshObjectIdentifier,
        types: &[EntityType],
    ) -> NetResult<NetMeshObject> {
        let object = self
            .net
            .core()
            .lifecycle()
            .create_mesh_object_with_identifier(identifier, types)?;
        Ok(self.net.wrap(object))
    }

    /// Creates an object with an explicit place in the replication graph.
    ///
    /// An object of another MeshBase needs at least one proxy, otherwise it
    /// could never reach its home.
    pub fn create_replica(&self, new: NewReplica) -> NetResult<NetMeshObject> {
        if new.identifier.mesh_base() != self.net.identifier() && new.proxies.is_empty() {
            return Err(NetError::CannotCreateNonLocalMeshObject {
                identifier: new.identifier,
                mesh_base: self.net.identifier().clone(),
            });
        }
        let state = Arc::new(ReplicaState::new(
            new.proxies,
            new.home_proxy_index,
            new.lock_proxy_index,
            new.give_up_lock,
            new.give_up_home_replica,
        )?);
        let spec = NewMeshObject::new()
            .identifier(new.identifier.clone())
            .types(&new.types)
            .times(new.times);
        let core = self.net.core();
        if core.find_mesh_object_by_identifier(&new.identifier).is_some() {
            return Err(MeshError::IdentifierNotUnique {
                identifier: new.identifier,
            }
            .into());
        }
        self.net.register_replica(new.identifier.clone(), state);
        let created = core.lifecycle().create_mesh_object_internal(
            spec,
            EquivalencePointers::default(),
            new.origin.as_ref(),
            true,
        );
        match created {
            Ok(object) => Ok(self.net.wrap(object)),
            Err(e) => {
                self.net.forget_replica(&new.identifier);
                Err(e.into())
            }
        }
    }

    /// Instantiates a replica received from `via`, or merges it into the
    /// resident object of the same identifier.
    pub fn ripple_create(&self, ext: &ExternalizedNetMeshObject, via: &MeshBaseIdentifier) -> NetResult<NetMeshObject> {
        self.ripple_create_or_synchronize(ext, via, false)
    }

    /// Like [`NetMeshBaseLifecycleManager::ripple_create`], and additionally
    /// re-points home and lock of a resident object towards `via`.
    pub fn resynchronize(&self, ext: &ExternalizedNetMeshObject, via: &MeshBaseIdentifier) -> NetResult<NetMeshObject> {
        self.ripple_create_or_synchronize(ext, via, true)
    }

    fn ripple_create_or_synchronize(
        &self,
        ext: &ExternalizedNetMeshObject,
        via: &MeshBaseIdentifier,
        resynchronize: bool,
    ) -> NetResult<NetMeshObject> {
        let core = self.net.core();
        core.check_transaction()?;

        if let Some(existing) = self.net.find_replica(ext.identifier()) {
            self.merge(&existing, &ext.object, via);
            if resynchronize {
                existing.make_replica_from(self.net.obtain_proxy(via)?);
                debug!("Re-pointed {} towards {}", existing.identifier(), via);
            }
            return Ok(existing);
        }

        let home_partner = ext.proxy_towards_home.clone().unwrap_or_else(|| via.clone());
        let proxy = self.net.obtain_proxy(&home_partner)?;
        let state = ReplicaState::new(
            vec![proxy.clone()],
            Some(0),
            Some(0),
            ext.give_up_lock,
            ext.give_up_home_replica,
        )?;
        let identifier = ext.identifier().clone();
        self.net.register_replica(identifier.clone(), Arc::new(state));
        let object = match core.lifecycle().recreate_mesh_object(&ext.object, Some(via)) {
            Ok(object) => object,
            Err(e) => {
                self.net.forget_replica(&identifier);
                return Err(e.into());
            }
        };
        if home_partner != *via {
            debug!("Registering {} as dependent of {} with {}", identifier, home_partner, self.net.identifier());
            proxy.resynchronize_dependent_replicas(vec![identifier]);
        }
        Ok(self.net.wrap(object))
    }

    /// Adds what `ext` has and `existing` lacks. Nothing is removed.
    fn merge(&self, existing: &MeshObject, ext: &ExternalizedMeshObject, via: &MeshBaseIdentifier) {
        let model = self.net.core().model_base().clone();
        let origin = Some(via);

        let types = ext.resolve_entity_types(model.as_ref());
        if !types.is_empty() {
            if let Err(e) = existing.ripple_bless(&types, origin, Some(ext.time_updated)) {
                warn!("Merging types into {}: {}", existing.identifier(), e);
            }
        }
        let properties = ext.resolve_properties(model.as_ref());
        if !properties.is_empty() {
            if let Err(e) = existing.ripple_set_property_values(&properties, origin, Some(ext.time_updated)) {
                warn!("Merging properties into {}: {}", existing.identifier(), e);
            }
        }
        for (neighbor, role_types) in ext.resolve_neighbors(model.as_ref()) {
            let result = if role_types.is_empty() {
                existing.ripple_relate(&neighbor, origin)
            } else {
                existing.ripple_bless_relationship(&role_types, &neighbor, origin)
            };
            if let Err(e) = result {
                warn!("Merging neighbor {} into {}: {}", neighbor, existing.identifier(), e);
            }
        }
    }

    /// Makes the resident replica match `ext`: types, properties, neighbors,
    /// roles and equivalence pointers are added and removed as needed.
    /// Never re-points the replica.
    ///
    /// Removals go first so that no role still requires a type being
    /// removed, and additions go last so that roles find their types blessed.
    pub fn ripple_update(&self, ext: &ExternalizedMeshObject, via: &MeshBaseIdentifier) -> NetResult<()> {
        let core = self.net.core();
        core.check_transaction()?;
        let object = core.get_mesh_object(&ext.identifier)?;
        let model = core.model_base().clone();
        let origin = Some(via);
        let time = Some(ext.time_updated);

        let new_neighbors = ext.resolve_neighbors(model.as_ref());
        for old in object.get_neighbor_identifiers()? {
            match new_neighbors.iter().find(|(n, _)| n == &old) {
                None => object.ripple_unrelate(&old, origin)?,
                Some((_, role_types)) => {
                    let gone: Vec<RoleType> = object
                        .get_role_types(&old)?
                        .into_iter()
                        .filter(|r| !role_types.contains(r))
                        .collect();
                    if !gone.is_empty() {
                        object.ripple_unbless_relationship(&gone, &old, origin)?;
                    }
                }
            }
        }

        let new_types = ext.resolve_entity_types(model.as_ref());
        let old_types = object.get_types()?;
        let removed: Vec<EntityType> = old_types.iter().filter(|t| !new_types.contains(t)).cloned().collect();
        if !removed.is_empty() {
            object.ripple_unbless(&removed, origin, time)?;
        }
        let added: Vec<EntityType> = new_types.iter().filter(|t| !old_types.contains(t)).cloned().collect();
        if !added.is_empty() {
            object.ripple_bless(&added, origin, time)?;
        }

        let declared = object.declared_property_types()?;
        let mut values: Vec<(PropertyType, _)> = ext
            .resolve_properties(model.as_ref())
            .into_iter()
            .filter(|(pt, _)| declared.contains(pt))
            .collect();
        for pt in declared {
            if pt.is_optional() && !values.iter().any(|(p, _)| p == &pt) {
                values.push((pt, None));
            }
        }
        if !values.is_empty() {
            object.ripple_set_property_values(&values, origin, time)?;
        }

        for (neighbor, role_types) in &new_neighbors {
            if !object.is_related_to(neighbor) {
                object.ripple_relate(neighbor, origin)?;
            }
            let current = object.get_role_types(neighbor)?;
            let fresh: Vec<RoleType> = role_types.iter().filter(|r| !current.contains(r)).cloned().collect();
            if !fresh.is_empty() {
                object.ripple_bless_relationship(&fresh, neighbor, origin)?;
            }
        }

        object.ripple_set_equivalence_pointers(
            EquivalencePointers::from_chain(&ext.identifier, &ext.equivalents),
            origin,
        )?;
        debug!("Updated replica {} from {}", ext.identifier, via);
        Ok(())
    }

    /// Deletes the replica as decided by `via`, without asking the
    /// access-control collaborator.
    ///
    /// # Returns
    /// The now dead object.
    pub fn ripple_delete(
        &self,
        identifier: &MeshObjectIdentifier,
        via: &MeshBaseIdentifier,
        time: i64,
    ) -> NetResult<Arc<MeshObject>> {
        let core = self.net.core();
        core.check_transaction()?;
        let object = core.get_mesh_object(identifier)?;
        core.lifecycle().remove(&object, Change::Deleted, Some(via), time)?;
        self.net.forget_replica(identifier);
        info!("Replica {} deleted by {}", identifier, via);
        Ok(object)
    }

    /// Drops a replica from the local store without deleting the object.
    pub fn purge_replica(&self, object: &NetMeshObject) -> NetResult<()> {
        self.purge_replicas(std::slice::from_ref(object))
    }

    /// Drops replicas from the local store without deleting the objects.
    /// Neither the home object nor a home replica can be purged.
    pub fn purge_replicas(&self, objects: &[NetMeshObject]) -> NetResult<()> {
        let core = self.net.core();
        core.check_transaction()?;
        for object in objects {
            if object.identifier() == core.home_object_identifier() {
                return Err(MeshError::MustNotDeleteHomeObject {
                    identifier: object.identifier().clone(),
                }
                .into());
            }
            if object.is_home_replica() {
                return Err(NetError::InconsistentReplicationGraph {
                    reason: format!("{} is a home replica and cannot be purged", object.identifier()),
                });
            }
        }
        let now = now_millis();
        for object in objects {
            core.lifecycle()
                .remove(object.mesh_object(), Change::Purged, None, now)?;
            self.net.forget_replica(object.identifier());
            debug!("Purged replica {}", object.identifier());
        }
        Ok(())
    }

    /// Deletes one object. See [`NetMeshBaseLifecycleManager::delete_mesh_objects`].
    pub async fn delete_mesh_object(&self, object: &NetMeshObject) -> NetResult<()> {
        self.delete_mesh_objects(std::slice::from_ref(object)).await
    }

    /// Deletes objects, all or nothing. Every object is validated and its
    /// update lock obtained before anything is deleted; the deletion itself
    /// runs in one transaction.
    ///
    /// Must not be called while the calling thread holds a transaction of
    /// this NetMeshBase.
    pub async fn delete_mesh_objects(&self, objects: &[NetMeshObject]) -> NetResult<()> {
        let core = self.net.core().clone();
        let plain: Vec<Arc<MeshObject>> = objects.iter().map(|o| o.mesh_object().clone()).collect();
        core.lifecycle().check_deletable(&plain)?;

        for object in objects {
            if let Err(e) = object.try_to_obtain_lock().await {
                warn!("Cannot delete {}: {}", object.identifier(), e);
                return Err(NetError::CannotObtainLock {
                    identifier: object.identifier().clone(),
                });
            }
        }

        let count = plain.len();
        tokio::task::spawn_blocking(move || -> NetResult<()> {
            let guard = core.create_transaction_asap()?;
            core.lifecycle().delete_mesh_objects(&plain)?;
            guard.commit();
            Ok(())
        })
        .await
        .map_err(|e| NetError::TaskFailed { reason: e.to_string() })??;
        info!("Deleted {} object(s) from {}", count, self.net.identifier());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_spec::{CoherenceSpecification, NetMeshObjectAccessSpecification};
    use crate::error::ProxyError;
    use crate::externalized::ReplicaUpdate;
    use crate::proxy::{ProxyFactory, ReplicaRight, ReplicaTicket};
    use async_trait::async_trait;
    use meshbase_core::{
        DataType, EntityTypeBuilder, ExternalizedNeighbor, InMemoryModelBase, PropertyTypeBuilder, PropertyValue,
        RelationshipType, TransactionId,
    };
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Weak;

    #[derive(Debug)]
    struct Quiet {
        partner: MeshBaseIdentifier,
        registered: Arc<Mutex<Vec<MeshObjectIdentifier>>>,
    }

    #[async_trait]
    impl Proxy for Quiet {
        fn partner_identifier(&self) -> &MeshBaseIdentifier {
            &self.partner
        }
        fn coherence(&self) -> Option<&CoherenceSpecification> {
            None
        }
        fn obtain_replicas(
            &self,
            _paths: Vec<NetMeshObjectAccessSpecification>,
            _ticket: ReplicaTicket,
        ) -> Result<(), ProxyError> {
            Ok(())
        }
        async fn try_to_obtain_rights(
            &self,
            _right: ReplicaRight,
            _identifiers: Vec<MeshObjectIdentifier>,
        ) -> Result<Vec<MeshObjectIdentifier>, ProxyError> {
            Ok(Vec::new())
        }
        fn transaction_committed(&self, _transaction: TransactionId, _updates: Vec<ReplicaUpdate>) {}
        fn resynchronize_dependent_replicas(&self, identifiers: Vec<MeshObjectIdentifier>) {
            self.registered.lock().extend(identifiers);
        }
        fn die(&self) {}
    }

    struct QuietFactory(Arc<Mutex<Vec<MeshObjectIdentifier>>>);

    impl ProxyFactory for QuietFactory {
        fn create_proxy(
            &self,
            _local: Weak<NetMeshBase>,
            partner: &MeshBaseIdentifier,
            _coherence: Option<CoherenceSpecification>,
        ) -> Result<Arc<dyn Proxy>, ProxyError> {
            Ok(Arc::new(Quiet {
                partner: partner.clone(),
                registered: self.0.clone(),
            }))
        }
    }

    struct Fixture {
        net: Arc<NetMeshBase>,
        person: EntityType,
        employee: EntityType,
        owner: EntityType,
        knows: RelationshipType,
        owns: RelationshipType,
        registered: Arc<Mutex<Vec<MeshObjectIdentifier>>>,
    }

    fn fixture() -> Fixture {
        let person = EntityTypeBuilder::new("Person")
            .property(PropertyTypeBuilder::new("Person_Name", DataType::string()).optional())
            .build();
        let employee = EntityTypeBuilder::new("Employee").build();
        let owner = EntityTypeBuilder::new("Owner").build();
        let knows = RelationshipType::new("Knows", None, None);
        let owns = RelationshipType::new("Owns", Some(&owner), Some(&person));
        let model = Arc::new(InMemoryModelBase::new());
        for t in [&person, &employee, &owner] {
            model.register_entity_type(t);
        }
        model.register_relationship_type(&knows);
        model.register_relationship_type(&owns);
        let registered = Arc::new(Mutex::new(Vec::new()));
        let net = NetMeshBase::builder(MeshBaseIdentifier::new("here"), model)
            .proxy_factory(Arc::new(QuietFactory(registered.clone())))
            .build();
        Fixture {
            net,
            person,
            employee,
            owner,
            knows,
            owns,
            registered,
        }
    }

    fn snapshot(id: &MeshObjectIdentifier, types: &[&str]) -> ExternalizedMeshObject {
        ExternalizedMeshObject {
            identifier: id.clone(),
            time_created: 10,
            time_updated: 20,
            time_read: 20,
            time_expires: -1,
            entity_types: types.iter().map(|t| (*t).into()).collect(),
            properties: Vec::new(),
            neighbors: Vec::new(),
            equivalents: Vec::new(),
        }
    }

    fn replica_of(object: ExternalizedMeshObject, towards_home: Option<&str>) -> ExternalizedNetMeshObject {
        ExternalizedNetMeshObject {
            object,
            give_up_lock: true,
            give_up_home_replica: false,
            proxy_towards_home: towards_home.map(MeshBaseIdentifier::new),
        }
    }

    #[test]
    fn test_ripple_create_points_towards_sender() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let replica = f
            .net
            .lifecycle()
            .ripple_create(&replica_of(snapshot(&id, &["Person", "Unknown"]), None), &there)
            .unwrap();
        tx.commit();

        assert_eq!(replica.proxies().len(), 1);
        assert_eq!(replica.proxies()[0].partner_identifier(), &there);
        assert_eq!(replica.home_proxy_index(), Some(0));
        assert!(!replica.has_lock());
        assert!(!replica.will_give_up_home_replica());
        assert_eq!(replica.get_types().unwrap(), vec![f.person.clone()]);
        assert_eq!(replica.time_created(), 10);
        assert!(f.registered.lock().is_empty());
    }

    #[test]
    fn test_ripple_create_with_distinct_home_registers_dependent() {
        let f = fixture();
        let via = MeshBaseIdentifier::new("middle");
        let id = MeshObjectIdentifier::new(MeshBaseIdentifier::new("far"), "x");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let replica = f
            .net
            .lifecycle()
            .ripple_create(&replica_of(snapshot(&id, &[]), Some("far")), &via)
            .unwrap();
        tx.commit();
        assert_eq!(
            replica.home_proxy().unwrap().partner_identifier(),
            &MeshBaseIdentifier::new("far")
        );
        assert_eq!(*f.registered.lock(), vec![id]);
    }

    #[test]
    fn test_ripple_create_merges_into_resident_object() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        lifecycle
            .ripple_create(&replica_of(snapshot(&id, &["Person"]), None), &there)
            .unwrap();
        let mut richer = snapshot(&id, &["Employee"]);
        richer.properties = vec![("Person_Name".into(), Some(PropertyValue::String("ann".into())))];
        let merged = lifecycle.ripple_create(&replica_of(richer, None), &there).unwrap();
        tx.commit();

        let types = merged.get_types().unwrap();
        assert!(types.contains(&f.person));
        assert!(types.contains(&f.employee));
        let name = f.person.find_property_type("Person_Name").unwrap();
        assert_eq!(
            merged.get_property_value(&name).unwrap(),
            Some(PropertyValue::String("ann".into()))
        );
    }

    #[test]
    fn test_resynchronize_repoints() {
        let f = fixture();
        let id = MeshObjectIdentifier::new(MeshBaseIdentifier::new("a"), "x");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        lifecycle
            .ripple_create(&replica_of(snapshot(&id, &[]), None), &MeshBaseIdentifier::new("a"))
            .unwrap();
        let replica = lifecycle
            .resynchronize(&replica_of(snapshot(&id, &[]), None), &MeshBaseIdentifier::new("b"))
            .unwrap();
        tx.commit();
        assert_eq!(
            replica.lock_proxy().unwrap().partner_identifier(),
            &MeshBaseIdentifier::new("b")
        );
    }

    #[test]
    fn test_ripple_update_applies_full_diff() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let friend = MeshObjectIdentifier::new(there.clone(), "y");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        let mut first = snapshot(&id, &["Person"]);
        first.properties = vec![("Person_Name".into(), Some(PropertyValue::String("ann".into())))];
        first.neighbors = vec![ExternalizedNeighbor {
            identifier: friend.clone(),
            role_types: vec![f.knows.source().identifier().clone()],
        }];
        let replica = lifecycle.ripple_create(&replica_of(first, None), &there).unwrap();

        let second = snapshot(&id, &["Employee"]);
        lifecycle.ripple_update(&second, &there).unwrap();
        tx.commit();

        assert_eq!(replica.get_types().unwrap(), vec![f.employee.clone()]);
        assert!(replica.get_neighbor_identifiers().unwrap().is_empty());
        assert_eq!(replica.lock_proxy().unwrap().partner_identifier(), &there);
    }

    #[test]
    fn test_ripple_update_drops_role_with_its_required_type() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let pet = MeshObjectIdentifier::new(there.clone(), "y");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        let mut first = snapshot(&id, &["Owner"]);
        first.neighbors = vec![ExternalizedNeighbor {
            identifier: pet.clone(),
            role_types: vec![f.owns.source().identifier().clone()],
        }];
        let replica = lifecycle.ripple_create(&replica_of(first, None), &there).unwrap();
        assert_eq!(replica.get_role_types(&pet).unwrap(), vec![f.owns.source()]);

        lifecycle.ripple_update(&snapshot(&id, &[]), &there).unwrap();
        tx.commit();

        assert!(replica.get_types().unwrap().is_empty());
        assert!(replica.get_neighbor_identifiers().unwrap().is_empty());
    }

    #[test]
    fn test_ripple_update_keeps_relationship_when_only_role_goes() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let pet = MeshObjectIdentifier::new(there.clone(), "y");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        let mut first = snapshot(&id, &["Owner", "Employee"]);
        first.neighbors = vec![ExternalizedNeighbor {
            identifier: pet.clone(),
            role_types: vec![f.owns.source().identifier().clone()],
        }];
        let replica = lifecycle.ripple_create(&replica_of(first, None), &there).unwrap();

        let mut second = snapshot(&id, &["Employee"]);
        second.neighbors = vec![ExternalizedNeighbor {
            identifier: pet.clone(),
            role_types: Vec::new(),
        }];
        lifecycle.ripple_update(&second, &there).unwrap();
        tx.commit();

        assert_eq!(replica.get_types().unwrap(), vec![f.employee.clone()]);
        assert!(replica.get_role_types(&pet).unwrap().is_empty());
    }

    #[test]
    fn test_ripple_update_adds_type_with_role_requiring_it() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let pet = MeshObjectIdentifier::new(there.clone(), "y");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        let replica = lifecycle.ripple_create(&replica_of(snapshot(&id, &[]), None), &there).unwrap();
        let resident_pet = lifecycle
            .ripple_create(&replica_of(snapshot(&pet, &["Person"]), None), &there)
            .unwrap();

        let mut second = snapshot(&id, &["Owner"]);
        second.neighbors = vec![ExternalizedNeighbor {
            identifier: pet.clone(),
            role_types: vec![f.owns.source().identifier().clone()],
        }];
        lifecycle.ripple_update(&second, &there).unwrap();
        tx.commit();

        assert_eq!(replica.get_types().unwrap(), vec![f.owner.clone()]);
        assert_eq!(replica.get_role_types(&pet).unwrap(), vec![f.owns.source()]);
        assert_eq!(resident_pet.get_role_types(&id).unwrap(), vec![f.owns.destination()]);
    }

    #[test]
    fn test_ripple_update_ignores_read_permissions() {
        struct HideNames;
        impl meshbase_core::AccessManager for HideNames {
            fn check_permitted_get_property(
                &self,
                object: &MeshObject,
                property_type: &PropertyType,
            ) -> meshbase_core::MeshResult<()> {
                if property_type.identifier().as_str() == "Person_Name" {
                    return Err(meshbase_core::access::not_permitted(object.identifier(), "read", "hidden"));
                }
                Ok(())
            }
        }
        let f = fixture();
        let net = NetMeshBase::builder(MeshBaseIdentifier::new("guarded"), f.net.core().model_base().clone())
            .access_manager(Arc::new(HideNames))
            .proxy_factory(Arc::new(QuietFactory(f.registered.clone())))
            .build();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let tx = net.core().create_transaction_asap().unwrap();
        let lifecycle = net.lifecycle();
        let replica = lifecycle
            .ripple_create(&replica_of(snapshot(&id, &["Person"]), None), &there)
            .unwrap();
        let mut named = snapshot(&id, &["Person"]);
        named.properties = vec![("Person_Name".into(), Some(PropertyValue::String("ann".into())))];
        lifecycle.ripple_update(&named, &there).unwrap();
        tx.commit();

        assert!(replica.get_all_property_types().unwrap().is_empty());
        assert_eq!(replica.externalize().unwrap().properties, named.properties);
    }

    /// One node state drawn by the convergence test: blessed types, an
    /// optional name and the relationship towards each of two neighbors
    /// (0 = none, 1 = related, 2 = knows, 3 = owns).
    #[derive(Debug, Clone)]
    struct Shape {
        types: [bool; 3],
        name: Option<String>,
        links: [u8; 2],
    }

    fn shape() -> impl Strategy<Value = Shape> {
        (any::<[bool; 3]>(), proptest::option::of("[a-z]{1,4}"), any::<[u8; 2]>()).prop_map(
            |(types, name, links)| Shape {
                types,
                name,
                links: links.map(|l| l % 4),
            },
        )
    }

    impl Shape {
        fn snapshot(
            &self,
            f: &Fixture,
            id: &MeshObjectIdentifier,
            neighbors: &[MeshObjectIdentifier],
        ) -> ExternalizedMeshObject {
            let names = ["Person", "Employee", "Owner"];
            let types: Vec<&str> = names
                .iter()
                .zip(self.types)
                .filter(|(_, on)| *on)
                .map(|(n, _)| *n)
                .collect();
            let mut ext = snapshot(id, &types);
            if self.types[0] {
                if let Some(name) = &self.name {
                    ext.properties = vec![("Person_Name".into(), Some(PropertyValue::String(name.clone())))];
                }
            }
            for (neighbor, link) in neighbors.iter().zip(self.links) {
                let role_types = match link {
                    0 => continue,
                    2 => vec![f.knows.source().identifier().clone()],
                    3 if self.types[2] => vec![f.owns.source().identifier().clone()],
                    _ => Vec::new(),
                };
                ext.neighbors.push(ExternalizedNeighbor {
                    identifier: neighbor.clone(),
                    role_types,
                });
            }
            ext
        }
    }

    fn type_ids(types: &[EntityType]) -> Vec<meshbase_core::MeshTypeIdentifier> {
        let mut ids: Vec<_> = types.iter().map(|t| t.identifier().clone()).collect();
        ids.sort();
        ids
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Updating a replica from any valid state to any other valid state
        /// ends in exactly the target state.
        #[test]
        fn test_ripple_update_converges(from in shape(), to in shape()) {
            let f = fixture();
            let there = MeshBaseIdentifier::new("there");
            let id = MeshObjectIdentifier::new(there.clone(), "x");
            let neighbors = [
                MeshObjectIdentifier::new(there.clone(), "y"),
                MeshObjectIdentifier::new(there.clone(), "z"),
            ];
            let target = to.snapshot(&f, &id, &neighbors);

            let tx = f.net.core().create_transaction_asap().unwrap();
            let lifecycle = f.net.lifecycle();
            let replica = lifecycle
                .ripple_create(&replica_of(from.snapshot(&f, &id, &neighbors), None), &there)
                .unwrap();
            let applied = lifecycle.ripple_update(&target, &there);
            tx.commit();
            prop_assert!(applied.is_ok(), "{:?}", applied);

            let mut expected_types: Vec<_> = target.entity_types.clone();
            expected_types.sort();
            prop_assert_eq!(type_ids(&replica.get_types().unwrap()), expected_types);

            let related: Vec<MeshObjectIdentifier> = replica.get_neighbor_identifiers().unwrap();
            prop_assert_eq!(related.len(), target.neighbors.len());
            for neighbor in &target.neighbors {
                let roles: Vec<_> = replica
                    .get_role_types(&neighbor.identifier)
                    .unwrap()
                    .iter()
                    .map(|r| r.identifier().clone())
                    .collect();
                prop_assert_eq!(&roles, &neighbor.role_types);
            }

            if to.types[0] {
                let name = f.person.find_property_type("Person_Name").unwrap();
                let expected = to.name.clone().map(PropertyValue::String);
                prop_assert_eq!(replica.get_property_value(&name).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_ripple_delete_and_purge() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let a = MeshObjectIdentifier::new(there.clone(), "a");
        let b = MeshObjectIdentifier::new(there.clone(), "b");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        lifecycle.ripple_create(&replica_of(snapshot(&a, &[]), None), &there).unwrap();
        let rb = lifecycle.ripple_create(&replica_of(snapshot(&b, &[]), None), &there).unwrap();

        let dead = lifecycle.ripple_delete(&a, &there, 99).unwrap();
        assert!(dead.is_dead());
        assert!(matches!(
            lifecycle.ripple_delete(&a, &there, 100),
            Err(NetError::Mesh(MeshError::NotFound { .. }))
        ));

        let home = f.net.home_object();
        assert!(matches!(
            lifecycle.purge_replica(&home),
            Err(NetError::Mesh(MeshError::MustNotDeleteHomeObject { .. }))
        ));
        lifecycle.purge_replica(&rb).unwrap();
        tx.commit();
        assert!(f.net.find_replica(&b).is_none());
    }

    #[test]
    fn test_purged_replica_state_stays_gone() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        let replica = lifecycle.ripple_create(&replica_of(snapshot(&id, &[]), None), &there).unwrap();
        lifecycle.purge_replica(&replica).unwrap();
        assert!(f.net.existing_replica_state(&id).is_none());

        let rewrapped = f.net.wrap(replica.mesh_object().clone());
        assert!(rewrapped.is_dead());
        assert!(f.net.existing_replica_state(&id).is_none());
        tx.commit();
        assert!(f.net.existing_replica_state(&id).is_none());
    }

    #[test]
    fn test_create_replica_validates_graph() {
        let f = fixture();
        let foreign = MeshObjectIdentifier::new(MeshBaseIdentifier::new("there"), "x");
        let tx = f.net.core().create_transaction_asap().unwrap();
        let lifecycle = f.net.lifecycle();
        assert!(matches!(
            lifecycle.create_replica(NewReplica::new(foreign.clone())),
            Err(NetError::CannotCreateNonLocalMeshObject { .. })
        ));

        let proxy = f.net.obtain_proxy(&MeshBaseIdentifier::new("there")).unwrap();
        let mut new = NewReplica::new(foreign.clone());
        new.proxies = vec![proxy];
        new.home_proxy_index = Some(0);
        new.lock_proxy_index = Some(0);
        new.types = vec![f.person.clone()];
        let replica = lifecycle.create_replica(new.clone()).unwrap();
        assert!(!replica.is_home_replica());
        assert!(matches!(
            lifecycle.create_replica(new),
            Err(NetError::Mesh(MeshError::IdentifierNotUnique { .. }))
        ));
        tx.commit();
    }

    #[tokio::test]
    async fn test_delete_rejects_home_object() {
        let f = fixture();
        let other = {
            let tx = f.net.core().create_transaction_asap().unwrap();
            let o = f.net.lifecycle().create_mesh_object().unwrap();
            tx.commit();
            o
        };
        let home = f.net.home_object();
        let err = f
            .net
            .lifecycle()
            .delete_mesh_objects(&[other.clone(), home])
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Mesh(MeshError::MustNotDeleteHomeObject { .. })));
        assert!(!other.is_dead());

        f.net.lifecycle().delete_mesh_object(&other).await.unwrap();
        assert!(other.is_dead());
    }

    #[tokio::test]
    async fn test_delete_needs_lock() {
        let f = fixture();
        let there = MeshBaseIdentifier::new("there");
        let id = MeshObjectIdentifier::new(there.clone(), "x");
        let replica = {
            let tx = f.net.core().create_transaction_asap().unwrap();
            let r = f
                .net
                .lifecycle()
                .ripple_create(&replica_of(snapshot(&id, &[]), None), &there)
                .unwrap();
            tx.commit();
            r
        };
        let err = f.net.lifecycle().delete_mesh_object(&replica).await.unwrap_err();
        assert!(matches!(err, NetError::CannotObtainLock { .. }));
        assert!(!replica.is_dead());
    }
}
