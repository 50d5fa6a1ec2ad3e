//! The access-control collaborator.
//!
//! A MeshBase consults its [`AccessManager`] before every read or mutation.
//! Every check defaults to "permitted", so an implementation only overrides
//! the checks it cares about. A MeshBase without an access manager permits
//! everything.

use crate::error::{MeshError, MeshResult};
use crate::identifier::{MeshBaseIdentifier, MeshObjectIdentifier};
use crate::mesh_object::MeshObject;
use crate::model::{EntityType, PropertyType, PropertyValue, RoleType};

/// Builds the error an access manager returns to refuse an operation.
pub fn not_permitted(
    identifier: &MeshObjectIdentifier,
    operation: &str,
    reason: impl Into<String>,
) -> MeshError {
    MeshError::NotPermitted {
        identifier: identifier.clone(),
        operation: operation.to_string(),
        reason: reason.into(),
    }
}

/// Capability checks consulted by MeshObjects and LifecycleManagers.
pub trait AccessManager: Send + Sync {
    /// May the property be read?
    fn check_permitted_get_property(
        &self,
        _object: &MeshObject,
        _property_type: &PropertyType,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// May the property be set to the new value?
    fn check_permitted_set_property(
        &self,
        _object: &MeshObject,
        _property_type: &PropertyType,
        _new_value: Option<&PropertyValue>,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// May the object be blessed with these types?
    fn check_permitted_bless(&self, _object: &MeshObject, _types: &[EntityType]) -> MeshResult<()> {
        Ok(())
    }

    /// May these types be removed from the object?
    fn check_permitted_unbless(&self, _object: &MeshObject, _types: &[EntityType]) -> MeshResult<()> {
        Ok(())
    }

    /// May the caller find out whether the object is blessed with this type?
    fn check_permitted_blessed_by(&self, _object: &MeshObject, _entity_type: &EntityType) -> MeshResult<()> {
        Ok(())
    }

    /// May the caller traverse from the object to the neighbor via this role?
    fn check_permitted_traversal(
        &self,
        _object: &MeshObject,
        _role_type: &RoleType,
        _neighbor: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// May the object be related to the neighbor?
    fn check_permitted_relate(&self, _object: &MeshObject, _neighbor: &MeshObject) -> MeshResult<()> {
        Ok(())
    }

    /// May the object be unrelated from the neighbor?
    fn check_permitted_unrelate(
        &self,
        _object: &MeshObject,
        _neighbor: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// May the relationship to the neighbor be blessed with these roles?
    fn check_permitted_bless_role_types(
        &self,
        _object: &MeshObject,
        _role_types: &[RoleType],
        _neighbor: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// May these roles be removed from the relationship to the neighbor?
    fn check_permitted_unbless_role_types(
        &self,
        _object: &MeshObject,
        _role_types: &[RoleType],
        _neighbor: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// May the object join the other object's equivalence set?
    fn check_permitted_add_as_equivalent(&self, _object: &MeshObject, _other: &MeshObject) -> MeshResult<()> {
        Ok(())
    }

    /// May the object leave its equivalence set?
    fn check_permitted_remove_as_equivalent(&self, _object: &MeshObject) -> MeshResult<()> {
        Ok(())
    }

    /// May the object be deleted?
    fn check_permitted_delete(&self, _object: &MeshObject) -> MeshResult<()> {
        Ok(())
    }

    /// May an object with this identifier be created in this MeshBase?
    fn check_permitted_create(
        &self,
        _mesh_base: &MeshBaseIdentifier,
        _identifier: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        Ok(())
    }

    /// Called once for each object created locally (not for replicas).
    fn assign_owner(&self, _object: &MeshObject) {}
}
