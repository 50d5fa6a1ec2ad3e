//! Access paths: how to reach a possibly remote MeshObject.
//!
//! A path is an ordered list of hops (peer MeshBases, each with an optional
//! coherence policy) followed by an optional target object. Without an
//! explicit target the path names the home object of its last hop.

use meshbase_core::{MeshBaseIdentifier, MeshObjectIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How strictly a replica is kept in sync with its home.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoherenceSpecification {
    /// Fetch once; rely on pushed updates afterwards.
    OneTime,
    /// Re-check with the home at the given period.
    Periodic {
        /// Period in milliseconds.
        period_ms: u64,
    },
}

/// One hop of an access path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetMeshBaseAccessSpecification {
    /// The peer to go through.
    pub identifier: MeshBaseIdentifier,
    /// The coherence policy requested from that peer.
    pub coherence: Option<CoherenceSpecification>,
}

impl NetMeshBaseAccessSpecification {
    /// A hop without coherence policy.
    pub fn new(identifier: MeshBaseIdentifier) -> Self {
        Self {
            identifier,
            coherence: None,
        }
    }

    /// A hop with a coherence policy.
    pub fn with_coherence(identifier: MeshBaseIdentifier, coherence: CoherenceSpecification) -> Self {
        Self {
            identifier,
            coherence: Some(coherence),
        }
    }
}

impl From<MeshBaseIdentifier> for NetMeshBaseAccessSpecification {
    fn from(identifier: MeshBaseIdentifier) -> Self {
        Self::new(identifier)
    }
}

/// A path towards a MeshObject.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetMeshObjectAccessSpecification {
    path: Vec<NetMeshBaseAccessSpecification>,
    object: Option<MeshObjectIdentifier>,
}

impl NetMeshObjectAccessSpecification {
    /// Creates a path.
    pub fn new(path: Vec<NetMeshBaseAccessSpecification>, object: Option<MeshObjectIdentifier>) -> Self {
        Self { path, object }
    }

    /// A zero-hop path to an object expected in the local store.
    pub fn to_object(object: MeshObjectIdentifier) -> Self {
        Self::new(Vec::new(), Some(object))
    }

    /// A one-hop path to an object through a peer.
    pub fn via(peer: MeshBaseIdentifier, object: MeshObjectIdentifier) -> Self {
        Self::new(vec![peer.into()], Some(object))
    }

    /// A one-hop path to the home object of a peer.
    pub fn home_of(peer: MeshBaseIdentifier) -> Self {
        Self::new(vec![peer.into()], None)
    }

    /// The hops.
    pub fn path(&self) -> &[NetMeshBaseAccessSpecification] {
        &self.path
    }

    /// The explicit target, if any.
    pub fn object(&self) -> Option<&MeshObjectIdentifier> {
        self.object.as_ref()
    }

    /// The first hop, if any.
    pub fn first_hop(&self) -> Option<&NetMeshBaseAccessSpecification> {
        self.path.first()
    }

    /// True if the path has no hops.
    pub fn is_local(&self) -> bool {
        self.path.is_empty()
    }

    /// The object the path leads to. A path without explicit target leads to
    /// the home object of its last hop, or of `local` if it has no hops.
    pub fn target_identifier(&self, local: &MeshBaseIdentifier) -> MeshObjectIdentifier {
        match (&self.object, self.path.last()) {
            (Some(object), _) => object.clone(),
            (None, Some(last)) => MeshObjectIdentifier::home_of(&last.identifier),
            (None, None) => MeshObjectIdentifier::home_of(local),
        }
    }

    /// The path as seen by the first hop.
    pub fn without_first_hop(&self) -> Self {
        Self {
            path: self.path.iter().skip(1).cloned().collect(),
            object: self.object.clone(),
        }
    }

    /// The path with an extra hop in front.
    pub fn with_prefix(&self, hop: NetMeshBaseAccessSpecification) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(hop);
        path.extend(self.path.iter().cloned());
        Self {
            path,
            object: self.object.clone(),
        }
    }

    /// Strips everything up to and including the last hop that names `local`.
    pub fn corrected_for(&self, local: &MeshBaseIdentifier) -> Self {
        match self.path.iter().rposition(|hop| &hop.identifier == local) {
            Some(pos) => Self {
                path: self.path[pos + 1..].to_vec(),
                object: self.object.clone(),
            },
            None => self.clone(),
        }
    }
}

impl fmt::Display for NetMeshObjectAccessSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in &self.path {
            write!(f, "{} -> ", hop.identifier)?;
        }
        match &self.object {
            Some(object) => write!(f, "{}", object),
            None => write!(f, "(home)"),
        }
    }
}
