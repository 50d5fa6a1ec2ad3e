#![warn(missing_docs)]

//! meshbase networking: replication graph, proxies, remote object access
//! and an in-process transport

pub mod access_spec;
pub mod config;
pub mod error;
pub mod externalized;
pub mod local;
pub mod net_lifecycle;
pub mod net_mesh_base;
pub mod net_mesh_object;
pub mod proxy;
pub mod proxy_manager;
pub mod return_sync;

pub use access_spec::{CoherenceSpecification, NetMeshBaseAccessSpecification, NetMeshObjectAccessSpecification};
pub use config::NetMeshBaseConfig;
pub use error::{AccessFailure, NetError, NetMeshObjectAccessError, NetResult, ProxyError};
pub use externalized::{ExternalizedNetMeshObject, ReplicaUpdate};
pub use local::{LocalNetwork, LocalNetworkStats, LocalProxy};
pub use net_lifecycle::{NetMeshBaseLifecycleManager, NewReplica};
pub use net_mesh_base::{NetAccessManager, NetMeshBase, NetMeshBaseBuilder};
pub use net_mesh_object::{NetMeshObject, ReplicaState};
pub use proxy::{NoProxyFactory, Proxy, ProxyFactory, ReplicaQueryResult, ReplicaRight, ReplicaTicket};
pub use proxy_manager::ProxyManager;
pub use return_sync::{JoinGroup, QueryTicket, ReturnSynchronizer};
