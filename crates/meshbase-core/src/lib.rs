#![warn(missing_docs)]

//! meshbase core: typed mesh objects, transactions, change events and the
//! local MeshBase store

pub mod access;
pub mod config;
pub mod error;
pub mod event;
pub mod externalized;
pub mod facade;
pub mod identifier;
pub mod lifecycle;
pub mod mesh_base;
pub mod mesh_object;
pub mod model;
pub mod time;
pub mod transaction;

pub use access::AccessManager;
pub use config::MeshBaseConfig;
pub use error::{MeshError, MeshResult, TransactionError};
pub use event::{Change, MeshObjectEvent, MeshObjectListener};
pub use externalized::{ExternalizedMeshObject, ExternalizedNeighbor};
pub use identifier::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier};
pub use lifecycle::{MeshBaseLifecycleManager, NewMeshObject};
pub use mesh_base::{MeshBase, MeshBaseBuilder, UpdateRightsPolicy};
pub use mesh_object::{EquivalencePointers, MeshObject, MeshObjectTimes};
pub use model::{
    DataType, EntityType, EntityTypeBuilder, InMemoryModelBase, ModelBase, PropertyType,
    PropertyTypeBuilder, PropertyValue, RelationshipType, RoleType,
};
pub use transaction::{Transaction, TransactionGuard, TransactionId, TransactionListener};
