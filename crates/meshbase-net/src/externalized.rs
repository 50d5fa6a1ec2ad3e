//! The form in which replicas travel between peers.

use meshbase_core::{ExternalizedMeshObject, MeshBaseIdentifier, MeshObjectIdentifier};
use serde::{Deserialize, Serialize};

/// A MeshObject snapshot plus the replication metadata the receiver needs to
/// wire the new replica into the replication graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedNetMeshObject {
    /// The object state.
    pub object: ExternalizedMeshObject,
    /// Whether the sender's replica gives up its lock on request.
    pub give_up_lock: bool,
    /// Whether the sender's replica gives up home status on request.
    pub give_up_home_replica: bool,
    /// The peer the receiver should treat as the way towards the home
    /// replica; `None` means the sender.
    pub proxy_towards_home: Option<MeshBaseIdentifier>,
}

impl ExternalizedNetMeshObject {
    /// The identifier of the object.
    pub fn identifier(&self) -> &MeshObjectIdentifier {
        &self.object.identifier
    }
}

/// One change a peer needs to apply to its replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReplicaUpdate {
    /// The object changed; this is its new state.
    Changed(ExternalizedNetMeshObject),
    /// The object was deleted.
    Deleted {
        /// The deleted object.
        identifier: MeshObjectIdentifier,
        /// When it was deleted.
        time: i64,
    },
}

impl ReplicaUpdate {
    /// The identifier of the object the update is about.
    pub fn identifier(&self) -> &MeshObjectIdentifier {
        match self {
            ReplicaUpdate::Changed(ext) => ext.identifier(),
            ReplicaUpdate::Deleted { identifier, .. } => identifier,
        }
    }
}
