//! Error types for the mesh object engine.

use thiserror::Error;

use crate::identifier::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier};

/// Errors raised by the transaction discipline of a MeshBase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// A mutation was attempted without an active transaction.
    #[error("no active transaction on mesh base {mesh_base}")]
    NotActive {
        /// The MeshBase that was mutated.
        mesh_base: MeshBaseIdentifier,
    },

    /// A mutation was attempted from a thread that does not own the active transaction.
    #[error("transaction {transaction} on mesh base {mesh_base} is owned by another thread")]
    WrongThread {
        /// The MeshBase that was mutated.
        mesh_base: MeshBaseIdentifier,
        /// The transaction currently active.
        transaction: u64,
    },

    /// The calling thread already owns the active transaction.
    #[error("calling thread already owns transaction {transaction} on mesh base {mesh_base}")]
    ActiveAlready {
        /// The MeshBase.
        mesh_base: MeshBaseIdentifier,
        /// The transaction the thread owns.
        transaction: u64,
    },

    /// Another thread holds the transaction and the caller asked not to wait.
    #[error("mesh base {mesh_base} is busy with transaction {transaction}")]
    Busy {
        /// The MeshBase.
        mesh_base: MeshBaseIdentifier,
        /// The transaction held by the other thread.
        transaction: u64,
    },

    /// Waiting for another thread's transaction took longer than configured.
    #[error("timed out after {waited_ms}ms waiting for a transaction on mesh base {mesh_base}")]
    Timeout {
        /// The MeshBase.
        mesh_base: MeshBaseIdentifier,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The MeshBase has been shut down.
    #[error("mesh base {mesh_base} is dead")]
    MeshBaseDead {
        /// The dead MeshBase.
        mesh_base: MeshBaseIdentifier,
    },
}

/// Errors raised by MeshObject, MeshBase and LifecycleManager operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    /// The transaction discipline was violated.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The object has been deleted or purged, or its MeshBase is dead.
    #[error("mesh object {identifier} is dead")]
    IsDead {
        /// The dead object.
        identifier: MeshObjectIdentifier,
    },

    /// The MeshBase has been shut down.
    #[error("mesh base {mesh_base} is dead")]
    MeshBaseDead {
        /// The dead MeshBase.
        mesh_base: MeshBaseIdentifier,
    },

    /// The access-control collaborator refused the operation.
    #[error("not permitted to {operation} on {identifier}: {reason}")]
    NotPermitted {
        /// The object the operation was attempted on.
        identifier: MeshObjectIdentifier,
        /// The operation that was refused.
        operation: String,
        /// Human-readable reason given by the collaborator.
        reason: String,
    },

    /// The object is not blessed with a type that the operation requires.
    #[error("mesh object {identifier} is not blessed with {entity_type}")]
    EntityNotBlessed {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The missing entity type.
        entity_type: MeshTypeIdentifier,
    },

    /// The object is already blessed with the type, or a subtype of it.
    #[error("mesh object {identifier} is already blessed with {entity_type}")]
    EntityBlessedAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The type that was blessed already.
        entity_type: MeshTypeIdentifier,
    },

    /// An abstract type, or a type not usable as forward reference, was used for blessing.
    #[error("type {mesh_type} is abstract and cannot be instantiated")]
    IsAbstract {
        /// The offending type.
        mesh_type: MeshTypeIdentifier,
    },

    /// A relationship role still requires the entity type that was about to be removed.
    #[error("role {role_type} of {identifier} requires entity type {entity_type}")]
    RoleTypeRequiresEntityType {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The role type that requires the entity type.
        role_type: MeshTypeIdentifier,
        /// The required entity type.
        entity_type: MeshTypeIdentifier,
    },

    /// The property type is read-only.
    #[error("property {property_type} of {identifier} is read-only (pair {index})")]
    PropertyReadOnly {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The read-only property type.
        property_type: MeshTypeIdentifier,
        /// Position of the offending pair in the batch.
        index: usize,
    },

    /// The value does not conform to the property's data type, or is absent for a mandatory property.
    #[error("illegal value for property {property_type} of {identifier} (pair {index}): {reason}")]
    IllegalPropertyValue {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The property type.
        property_type: MeshTypeIdentifier,
        /// Position of the offending pair in the batch.
        index: usize,
        /// What is wrong with the value.
        reason: String,
    },

    /// The two objects are related already.
    #[error("{identifier} is already related to {neighbor}")]
    RelatedAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
    },

    /// The two objects are not related.
    #[error("{identifier} is not related to {neighbor}")]
    NotRelated {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The would-be neighbor.
        neighbor: MeshObjectIdentifier,
    },

    /// An object was asked to relate to itself.
    #[error("mesh object {identifier} cannot be related to itself")]
    CannotRelateToSelf {
        /// The object.
        identifier: MeshObjectIdentifier,
    },

    /// The relationship already carries the role type.
    #[error("relationship {identifier} -> {neighbor} is already blessed with {role_type}")]
    RoleTypeBlessedAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
        /// The role type.
        role_type: MeshTypeIdentifier,
    },

    /// The relationship does not carry the role type.
    #[error("relationship {identifier} -> {neighbor} is not blessed with {role_type}")]
    RoleTypeNotBlessed {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
        /// The role type.
        role_type: MeshTypeIdentifier,
    },

    /// The object is a member of the other object's equivalence set already.
    #[error("{identifier} is already equivalent to {equivalent}")]
    EquivalentAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The other member.
        equivalent: MeshObjectIdentifier,
    },

    /// The object is not a member of any equivalence set.
    #[error("mesh object {identifier} has no equivalents")]
    NotEquivalent {
        /// The object.
        identifier: MeshObjectIdentifier,
    },

    /// An object with this identifier exists already.
    #[error("identifier {identifier} is not unique")]
    IdentifierNotUnique {
        /// The duplicate identifier.
        identifier: MeshObjectIdentifier,
    },

    /// The external form could not be parsed into an identifier.
    #[error("invalid identifier: {external_form}")]
    InvalidIdentifier {
        /// The unparseable string.
        external_form: String,
    },

    /// The home object of a MeshBase can never be deleted or purged.
    #[error("must not delete home object {identifier}")]
    MustNotDeleteHomeObject {
        /// The home object.
        identifier: MeshObjectIdentifier,
    },

    /// A batch operation names the same object more than once.
    #[error("mesh object {identifier} appears more than once")]
    DuplicateArgument {
        /// The repeated object.
        identifier: MeshObjectIdentifier,
    },

    /// The object belongs to a different MeshBase.
    #[error("mesh object {identifier} does not belong to mesh base {mesh_base}")]
    WrongMeshBase {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The MeshBase the operation was invoked on.
        mesh_base: MeshBaseIdentifier,
    },

    /// No object with this identifier is known locally.
    #[error("mesh object {identifier} not found")]
    NotFound {
        /// The missing identifier.
        identifier: MeshObjectIdentifier,
    },

    /// The type collaborator does not know the type.
    #[error("mesh type {identifier} not found")]
    MeshTypeNotFound {
        /// The unknown type identifier.
        identifier: MeshTypeIdentifier,
    },

    /// Parallel argument arrays of a batch operation differ in length.
    #[error("argument length mismatch: {left} vs {right}")]
    ArgumentLengthMismatch {
        /// Length of the first argument.
        left: usize,
        /// Length of the second argument.
        right: usize,
    },
}

/// Convenience alias for results of mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
