//! Creation and deletion of MeshObjects.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MeshError, MeshResult};
use crate::event::Change;
use crate::externalized::ExternalizedMeshObject;
use crate::identifier::{MeshBaseIdentifier, MeshObjectIdentifier};
use crate::mesh_base::MeshBase;
use crate::mesh_object::{EquivalencePointers, MeshObject, MeshObjectTimes};
use crate::model::{EntityType, RoleType};
use crate::time::{now_millis, UNSET_TIME};

/// Everything needed to create one MeshObject.
#[derive(Clone, Debug)]
pub struct NewMeshObject {
    /// The identifier; `None` generates a random one.
    pub identifier: Option<MeshObjectIdentifier>,
    /// Types to bless the new object with.
    pub types: Vec<EntityType>,
    /// Time stamps; negative values mean now (or never, for expiry).
    pub times: MeshObjectTimes,
}

impl NewMeshObject {
    /// An object with a random identifier and no types.
    pub fn new() -> Self {
        Self {
            identifier: None,
            types: Vec::new(),
            times: MeshObjectTimes::default(),
        }
    }

    /// Sets the identifier.
    pub fn identifier(mut self, identifier: MeshObjectIdentifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Sets the types.
    pub fn types(mut self, types: &[EntityType]) -> Self {
        self.types = types.to_vec();
        self
    }

    /// Sets the time stamps.
    pub fn times(mut self, times: MeshObjectTimes) -> Self {
        self.times = times;
        self
    }
}

impl Default for NewMeshObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates and deletes the MeshObjects of one MeshBase.
pub struct MeshBaseLifecycleManager {
    base: Arc<MeshBase>,
}

impl MeshBaseLifecycleManager {
    /// Creates a lifecycle manager for the MeshBase.
    pub fn new(base: Arc<MeshBase>) -> Self {
        Self { base }
    }

    /// The MeshBase.
    pub fn mesh_base(&self) -> &Arc<MeshBase> {
        &self.base
    }

    /// Creates an object with a random identifier and no types.
    pub fn create_mesh_object(&self) -> MeshResult<Arc<MeshObject>> {
        self.create_mesh_object_with(NewMeshObject::new())
    }

    /// Creates an object with a random identifier, blessed with the types.
    pub fn create_mesh_object_with_types(&self, types: &[EntityType]) -> MeshResult<Arc<MeshObject>> {
        self.create_mesh_object_with(NewMeshObject::new().types(types))
    }

    /// Creates an object with the given identifier, blessed with the types.
    pub fn create_mesh_object_with_identifier(
        &self,
        identifier: MeshObjectIdentifier,
        types: &[EntityType],
    ) -> MeshResult<Arc<MeshObject>> {
        self.create_mesh_object_with(NewMeshObject::new().identifier(identifier).types(types))
    }

    /// Creates an object as described.
    pub fn create_mesh_object_with(&self, new: NewMeshObject) -> MeshResult<Arc<MeshObject>> {
        self.create_mesh_object_internal(new, EquivalencePointers::default(), None, true)
    }

    /// Creates an object, optionally on behalf of a peer.
    ///
    /// Replication passes the peer in `origin`, pre-computed equivalence
    /// pointers and `assign_owner = false`; the object is then a replica and
    /// the access-control collaborator is neither consulted for creation nor
    /// asked to assign an owner.
    pub fn create_mesh_object_internal(
        &self,
        new: NewMeshObject,
        equivalents: EquivalencePointers,
        origin: Option<&MeshBaseIdentifier>,
        assign_owner: bool,
    ) -> MeshResult<Arc<MeshObject>> {
        let base = &self.base;
        base.check_transaction()?;
        let identifier = new
            .identifier
            .unwrap_or_else(|| MeshObjectIdentifier::random(base.identifier()));
        if base.find_mesh_object_by_identifier(&identifier).is_some() {
            return Err(MeshError::IdentifierNotUnique { identifier });
        }
        if origin.is_none() {
            if let Some(am) = base.access_manager() {
                am.check_permitted_create(base.identifier(), &identifier)?;
            }
        }
        if let Some(t) = new.types.iter().find(|t| t.is_abstract()) {
            return Err(MeshError::IsAbstract {
                mesh_type: t.identifier().clone(),
            });
        }

        let object = Arc::new(MeshObject::new(
            identifier,
            Arc::downgrade(base),
            new.times,
            equivalents,
        ));
        if !new.types.is_empty() {
            if origin.is_none() {
                if let Some(am) = base.access_manager() {
                    am.check_permitted_bless(&object, &new.types)?;
                }
            }
            match object.bless_virgin(&new.types, object.time_created()) {
                Ok(()) => {}
                Err(e @ MeshError::EntityBlessedAlready { .. }) => {
                    warn!("Redundant types creating {}: {}", object.identifier(), e);
                }
                Err(e) => return Err(e),
            }
        }
        base.put_into_mesh_base(object.clone(), origin)?;
        if assign_owner {
            if let Some(am) = base.access_manager() {
                am.assign_owner(&object);
            }
        }
        debug!("Created {} in {}", object.identifier(), base.identifier());
        Ok(object)
    }

    /// Instantiates a replica from a snapshot received from `origin`.
    ///
    /// The snapshot's time stamps, types, properties, neighbors and
    /// equivalence pointers are taken as they are; the only event recorded
    /// for the replica itself is `Created`. Resident neighbors that do not yet
    /// point back are related to the replica. Unknown types are skipped.
    pub fn recreate_mesh_object(
        &self,
        ext: &ExternalizedMeshObject,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<Arc<MeshObject>> {
        let base = &self.base;
        base.check_transaction()?;
        if base.find_mesh_object_by_identifier(&ext.identifier).is_some() {
            return Err(MeshError::IdentifierNotUnique {
                identifier: ext.identifier.clone(),
            });
        }
        let model = base.model_base().clone();
        let object = Arc::new(MeshObject::new(
            ext.identifier.clone(),
            Arc::downgrade(base),
            replica_times(ext.time_created, ext.time_updated, ext.time_read, ext.time_expires),
            EquivalencePointers::from_chain(&ext.identifier, &ext.equivalents),
        ));
        let neighbors = ext.resolve_neighbors(model.as_ref());
        object.restore(
            ext.resolve_entity_types(model.as_ref()),
            ext.resolve_properties(model.as_ref()),
            neighbors.clone(),
        );
        base.put_into_mesh_base(object.clone(), origin)?;

        for (neighbor_id, role_types) in neighbors {
            let Some(neighbor) = base.find_mesh_object_by_identifier(&neighbor_id) else {
                continue;
            };
            if neighbor.is_related_to(object.identifier()) {
                continue;
            }
            let inverses: Vec<RoleType> = role_types.iter().map(|r| r.inverse()).collect();
            neighbor.ripple_bless_relationship(&inverses, object.identifier(), origin)?;
        }
        debug!("Recreated replica {} in {}", object.identifier(), base.identifier());
        Ok(object)
    }

    /// Deletes one object.
    pub fn delete_mesh_object(&self, object: &Arc<MeshObject>) -> MeshResult<()> {
        self.delete_mesh_objects(std::slice::from_ref(object))
    }

    /// Deletes objects, all or nothing: every object is validated and every
    /// permission checked before the first one is deleted.
    pub fn delete_mesh_objects(&self, objects: &[Arc<MeshObject>]) -> MeshResult<()> {
        self.base.check_transaction()?;
        self.check_deletable(objects)?;
        if let Some(am) = self.base.access_manager() {
            for object in objects {
                am.check_permitted_delete(object)?;
            }
        }
        let now = now_millis();
        for object in objects {
            self.remove(object, Change::Deleted, None, now)?;
        }
        Ok(())
    }

    /// Validates that the objects are alive, live here, are not the home
    /// object and are named only once.
    pub fn check_deletable(&self, objects: &[Arc<MeshObject>]) -> MeshResult<()> {
        let mut seen = HashSet::with_capacity(objects.len());
        for object in objects {
            if !seen.insert(object.identifier()) {
                return Err(MeshError::DuplicateArgument {
                    identifier: object.identifier().clone(),
                });
            }
            let belongs = object
                .mesh_base()
                .map(|b| Arc::ptr_eq(&b, &self.base))
                .unwrap_or(false);
            if !belongs {
                return Err(MeshError::WrongMeshBase {
                    identifier: object.identifier().clone(),
                    mesh_base: self.base.identifier().clone(),
                });
            }
            if object.is_dead() {
                return Err(MeshError::IsDead {
                    identifier: object.identifier().clone(),
                });
            }
            if object.identifier() == self.base.home_object_identifier() {
                return Err(MeshError::MustNotDeleteHomeObject {
                    identifier: object.identifier().clone(),
                });
            }
        }
        Ok(())
    }

    /// Removes an object without permission checks.
    ///
    /// `Deleted` first cuts the object's relationships and equivalences;
    /// `Purged` only drops the local replica.
    pub fn remove(
        &self,
        object: &MeshObject,
        change: Change,
        origin: Option<&MeshBaseIdentifier>,
        time: i64,
    ) -> MeshResult<()> {
        let time = if time < 0 { now_millis() } else { time };
        if matches!(change, Change::Deleted) {
            object.disconnect(origin, time)?;
        }
        self.base
            .remove_from_mesh_base(object.identifier(), change, origin, time)?;
        Ok(())
    }
}

/// Times for a replica that keep the sender's stamps.
pub fn replica_times(created: i64, updated: i64, read: i64, expires: i64) -> MeshObjectTimes {
    MeshObjectTimes {
        created,
        updated,
        read,
        expires: if expires < 0 { UNSET_TIME } else { expires },
    }
}
