//! The communication channel to one peer.
//!
//! The replication engine only talks to peers through the [`Proxy`] trait;
//! the transport behind it is pluggable. Requests that fetch replicas are
//! fire-and-forget and complete a [`ReplicaTicket`] when the reply has been
//! applied locally. Rights requests are awaited directly.

use async_trait::async_trait;
use meshbase_core::{MeshBaseIdentifier, MeshObjectIdentifier, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use crate::access_spec::{CoherenceSpecification, NetMeshObjectAccessSpecification};
use crate::error::ProxyError;
use crate::externalized::ReplicaUpdate;
use crate::net_mesh_base::NetMeshBase;
use crate::return_sync::QueryTicket;

/// Result of one replica fetch: the identifiers rippled into the local store.
pub type ReplicaQueryResult = Result<Vec<MeshObjectIdentifier>, ProxyError>;

/// Ticket completed by a proxy when a replica fetch is done.
pub type ReplicaTicket = QueryTicket<u64, ReplicaQueryResult>;

/// A right that can move between replicas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaRight {
    /// The right to update the object.
    UpdateLock,
    /// The right to be the home replica.
    HomeReplica,
}

/// Local representative of the channel to one peer.
#[async_trait]
pub trait Proxy: Send + Sync + Debug {
    /// The peer at the other end.
    fn partner_identifier(&self) -> &MeshBaseIdentifier;

    /// The coherence policy negotiated with the peer.
    fn coherence(&self) -> Option<&CoherenceSpecification>;

    /// Asks the peer for replicas of the objects the paths lead to. The
    /// paths are relative to the peer. Returns once the request is
    /// dispatched; `ticket` is completed when the replicas have been applied
    /// locally, or with the error that prevented it.
    fn obtain_replicas(
        &self,
        paths: Vec<NetMeshObjectAccessSpecification>,
        ticket: ReplicaTicket,
    ) -> Result<(), ProxyError>;

    /// Asks the peer to hand over a right for the objects.
    ///
    /// # Returns
    /// The identifiers for which the right was granted.
    async fn try_to_obtain_rights(
        &self,
        right: ReplicaRight,
        identifiers: Vec<MeshObjectIdentifier>,
    ) -> Result<Vec<MeshObjectIdentifier>, ProxyError>;

    /// Forwards the replica updates of a committed transaction to the peer.
    fn transaction_committed(&self, transaction: TransactionId, updates: Vec<ReplicaUpdate>);

    /// Tells the peer that this node now holds dependent replicas of the objects.
    fn resynchronize_dependent_replicas(&self, identifiers: Vec<MeshObjectIdentifier>);

    /// Shuts the proxy down.
    fn die(&self);
}

/// Creates proxies for a NetMeshBase.
pub trait ProxyFactory: Send + Sync {
    /// Creates the proxy connecting `local` to `partner`.
    fn create_proxy(
        &self,
        local: Weak<NetMeshBase>,
        partner: &MeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> Result<Arc<dyn Proxy>, ProxyError>;
}

/// A factory for NetMeshBases that never talk to anybody.
#[derive(Debug, Default)]
pub struct NoProxyFactory;

impl ProxyFactory for NoProxyFactory {
    fn create_proxy(
        &self,
        _local: Weak<NetMeshBase>,
        partner: &MeshBaseIdentifier,
        _coherence: Option<CoherenceSpecification>,
    ) -> Result<Arc<dyn Proxy>, ProxyError> {
        Err(ProxyError::Unreachable {
            partner: partner.clone(),
        })
    }
}
