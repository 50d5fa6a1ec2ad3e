//! Error types for the replication layer.

use meshbase_core::{MeshBaseIdentifier, MeshError, MeshObjectIdentifier, TransactionError};
use thiserror::Error;

use crate::access_spec::NetMeshObjectAccessSpecification;
use crate::net_mesh_object::NetMeshObject;

/// Errors reported by a [`Proxy`](crate::proxy::Proxy).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The peer cannot be reached.
    #[error("peer {partner} is unreachable")]
    Unreachable {
        /// The peer.
        partner: MeshBaseIdentifier,
    },

    /// The peer received the request but refused it.
    #[error("peer {partner} refused the request: {reason}")]
    Refused {
        /// The peer.
        partner: MeshBaseIdentifier,
        /// Why the request was refused.
        reason: String,
    },

    /// The proxy has been shut down.
    #[error("proxy to {partner} is dead")]
    Dead {
        /// The peer.
        partner: MeshBaseIdentifier,
    },

    /// Replicas arrived from the peer but could not be applied locally.
    #[error("replication from {partner} failed: {reason}")]
    Failed {
        /// The peer.
        partner: MeshBaseIdentifier,
        /// What went wrong.
        reason: String,
    },
}

/// Errors raised by NetMeshBase, NetMeshObject and the net lifecycle manager.
#[derive(Debug, Error)]
pub enum NetError {
    /// An error of the local object graph.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// The transaction discipline was violated.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A proxy failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// The update lock could not be obtained from the replication graph.
    #[error("cannot obtain update lock for {identifier}")]
    CannotObtainLock {
        /// The object.
        identifier: MeshObjectIdentifier,
    },

    /// A remote request did not complete in time.
    #[error("remote query for {identifier} timed out after {waited_ms}ms")]
    RemoteQueryTimeout {
        /// The object the query was about.
        identifier: MeshObjectIdentifier,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Home and lock proxy indices contradict each other.
    #[error("inconsistent replication graph: {reason}")]
    InconsistentReplicationGraph {
        /// What is inconsistent.
        reason: String,
    },

    /// An object of another MeshBase was to be created without any proxy
    /// connecting it to its home.
    #[error("cannot create {identifier} in {mesh_base} without a proxy towards its home")]
    CannotCreateNonLocalMeshObject {
        /// The identifier.
        identifier: MeshObjectIdentifier,
        /// The local MeshBase.
        mesh_base: MeshBaseIdentifier,
    },

    /// A blocking task could not be completed.
    #[error("background task failed: {reason}")]
    TaskFailed {
        /// Why.
        reason: String,
    },
}

/// Convenience alias for results of replication operations.
pub type NetResult<T> = Result<T, NetError>;

/// Why `access_locally` could not resolve every path.
#[derive(Debug, Clone, Error)]
pub enum AccessFailure {
    /// The wait ended before all proxies replied; replies may still arrive.
    #[error("query still ongoing")]
    QueryOngoing,

    /// A proxy failed to fetch its batch.
    #[error(transparent)]
    Proxy(ProxyError),

    /// The access-control collaborator refused the remote access.
    #[error(transparent)]
    NotPermitted(MeshError),
}

/// Partial result of `access_locally`.
///
/// `partial` has one slot per requested path, in request order; slots of
/// paths that could not be resolved are `None`.
#[derive(Debug, Clone, Error)]
#[error("could not access {} path(s): {cause}", .failed_paths.len())]
pub struct NetMeshObjectAccessError {
    /// The objects that were resolved.
    pub partial: Vec<Option<NetMeshObject>>,
    /// The paths the failure applies to.
    pub failed_paths: Vec<NetMeshObjectAccessSpecification>,
    /// What went wrong.
    pub cause: AccessFailure,
}

impl NetMeshObjectAccessError {
    /// True if the failure is a timeout that may still resolve later.
    pub fn is_ongoing(&self) -> bool {
        matches!(self.cause, AccessFailure::QueryOngoing)
    }
}
