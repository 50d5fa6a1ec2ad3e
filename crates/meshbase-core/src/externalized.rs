//! Serializable snapshots of MeshObjects.
//!
//! Type tokens travel as identifiers; the receiving side resolves them with
//! its own [`ModelBase`](crate::model::ModelBase).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::identifier::{MeshObjectIdentifier, MeshTypeIdentifier};
use crate::model::{EntityType, ModelBase, PropertyType, PropertyValue, RoleType};

/// One neighbor of an externalized object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedNeighbor {
    /// The neighbor.
    pub identifier: MeshObjectIdentifier,
    /// The roles the object plays towards the neighbor.
    pub role_types: Vec<MeshTypeIdentifier>,
}

/// The complete state of one MeshObject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedMeshObject {
    /// The object's identifier.
    pub identifier: MeshObjectIdentifier,
    /// Creation time.
    pub time_created: i64,
    /// Last update time.
    pub time_updated: i64,
    /// Last read time.
    pub time_read: i64,
    /// Expiry time; negative means never.
    pub time_expires: i64,
    /// Entity types, in blessing order.
    pub entity_types: Vec<MeshTypeIdentifier>,
    /// Property values, sorted by property type.
    pub properties: Vec<(MeshTypeIdentifier, Option<PropertyValue>)>,
    /// Neighbors, in relating order.
    pub neighbors: Vec<ExternalizedNeighbor>,
    /// Members of the equivalence set left to right, including the object;
    /// empty if it has no equivalents.
    pub equivalents: Vec<MeshObjectIdentifier>,
}

impl ExternalizedMeshObject {
    /// Resolves the entity types, skipping and logging unknown ones.
    pub fn resolve_entity_types(&self, model: &dyn ModelBase) -> Vec<EntityType> {
        self.entity_types
            .iter()
            .filter_map(|id| match model.find_entity_type_by_identifier(id) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("Skipping entity type of {}: {}", self.identifier, e);
                    None
                }
            })
            .collect()
    }

    /// Resolves the property values, skipping and logging unknown property types.
    pub fn resolve_properties(&self, model: &dyn ModelBase) -> Vec<(PropertyType, Option<PropertyValue>)> {
        self.properties
            .iter()
            .filter_map(|(id, value)| match model.find_property_type_by_identifier(id) {
                Ok(pt) => Some((pt, value.clone())),
                Err(e) => {
                    warn!("Skipping property of {}: {}", self.identifier, e);
                    None
                }
            })
            .collect()
    }

    /// Resolves the roles played towards each neighbor, skipping unknown role types.
    pub fn resolve_neighbors(&self, model: &dyn ModelBase) -> Vec<(MeshObjectIdentifier, Vec<RoleType>)> {
        self.neighbors
            .iter()
            .map(|n| {
                let roles = n
                    .role_types
                    .iter()
                    .filter_map(|id| match model.find_role_type_by_identifier(id) {
                        Ok(r) => Some(r),
                        Err(e) => {
                            warn!("Skipping role of {} towards {}: {}", self.identifier, n.identifier, e);
                            None
                        }
                    })
                    .collect();
                (n.identifier.clone(), roles)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::MeshBaseIdentifier;
    use crate::model::{DataType, EntityTypeBuilder, InMemoryModelBase, PropertyTypeBuilder};

    #[test]
    fn test_unknown_types_are_skipped() {
        let known = EntityTypeBuilder::new("Known")
            .property(PropertyTypeBuilder::new("Known_P", DataType::integer()).optional())
            .build();
        let model = InMemoryModelBase::new();
        model.register_entity_type(&known);

        let base = MeshBaseIdentifier::new("a");
        let ext = ExternalizedMeshObject {
            identifier: MeshObjectIdentifier::new(base.clone(), "x"),
            time_created: 1,
            time_updated: 2,
            time_read: 3,
            time_expires: -1,
            entity_types: vec!["Known".into(), "Unknown".into()],
            properties: vec![
                ("Known_P".into(), Some(PropertyValue::Integer(4))),
                ("Unknown_P".into(), None),
            ],
            neighbors: vec![ExternalizedNeighbor {
                identifier: MeshObjectIdentifier::new(base, "y"),
                role_types: vec!["Nope-S".into()],
            }],
            equivalents: vec![],
        };
        assert_eq!(ext.resolve_entity_types(&model), vec![known]);
        assert_eq!(ext.resolve_properties(&model).len(), 1);
        let neighbors = ext.resolve_neighbors(&model);
        assert_eq!(neighbors.len(), 1);
        assert!(neighbors[0].1.is_empty());

        let json = serde_json::to_string(&ext).unwrap();
        let back: ExternalizedMeshObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ext);
    }
}
