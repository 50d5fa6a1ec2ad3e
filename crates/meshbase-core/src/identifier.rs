//! Identifiers for mesh bases, mesh objects and type tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MeshError;

/// Separates the mesh base part from the local part in the string form of a
/// [`MeshObjectIdentifier`].
pub const LOCAL_ID_SEPARATOR: char = '#';

/// Identifies a MeshBase, i.e. one node of the replication graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshBaseIdentifier(String);

impl MeshBaseIdentifier {
    /// Creates a new MeshBaseIdentifier from its external form.
    pub fn new(id: impl Into<String>) -> Self {
        MeshBaseIdentifier(id.into())
    }

    /// Returns the external form of this identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshBaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MeshBaseIdentifier {
    fn from(s: &str) -> Self {
        MeshBaseIdentifier::new(s)
    }
}

/// Identifies a MeshObject.
///
/// The identifier is scoped by the MeshBase that created the object. The
/// home object of a MeshBase has an empty local part.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshObjectIdentifier {
    mesh_base: MeshBaseIdentifier,
    local_id: String,
}

impl MeshObjectIdentifier {
    /// Creates a new identifier within the given MeshBase.
    pub fn new(mesh_base: MeshBaseIdentifier, local_id: impl Into<String>) -> Self {
        Self {
            mesh_base,
            local_id: local_id.into(),
        }
    }

    /// Returns the identifier of the home object of the given MeshBase.
    pub fn home_of(mesh_base: &MeshBaseIdentifier) -> Self {
        Self::new(mesh_base.clone(), "")
    }

    /// Generates a fresh, random identifier within the given MeshBase.
    pub fn random(mesh_base: &MeshBaseIdentifier) -> Self {
        Self::new(mesh_base.clone(), uuid::Uuid::new_v4().simple().to_string())
    }

    /// The MeshBase this identifier was created in.
    pub fn mesh_base(&self) -> &MeshBaseIdentifier {
        &self.mesh_base
    }

    /// The part of the identifier that is unique within its MeshBase.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// True if this identifies the home object of its MeshBase.
    pub fn is_home_object(&self) -> bool {
        self.local_id.is_empty()
    }
}

impl fmt::Display for MeshObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.mesh_base, LOCAL_ID_SEPARATOR, self.local_id)
    }
}

impl FromStr for MeshObjectIdentifier {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(LOCAL_ID_SEPARATOR) {
            Some((base, local)) if !base.is_empty() => Ok(Self::new(MeshBaseIdentifier::new(base), local)),
            _ => Err(MeshError::InvalidIdentifier {
                external_form: s.to_string(),
            }),
        }
    }
}

/// Identifies a type token (entity type, property type or role type).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshTypeIdentifier(String);

impl MeshTypeIdentifier {
    /// Creates a new MeshTypeIdentifier.
    pub fn new(id: impl Into<String>) -> Self {
        MeshTypeIdentifier(id.into())
    }

    /// Returns the external form of this identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshTypeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MeshTypeIdentifier {
    fn from(s: &str) -> Self {
        MeshTypeIdentifier::new(s)
    }
}
