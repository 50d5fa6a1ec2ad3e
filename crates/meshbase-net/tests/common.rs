//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use meshbase_core::{
    DataType, EntityType, EntityTypeBuilder, InMemoryModelBase, MeshBaseIdentifier, PropertyType,
    PropertyTypeBuilder, PropertyValue, RelationshipType,
};
use meshbase_net::{LocalNetwork, NetMeshBase, NetMeshBaseConfig, NetMeshObject};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The types every test node knows.
pub struct SampleTypes {
    pub person: EntityType,
    pub name: PropertyType,
    pub knows: RelationshipType,
}

/// Builds a model with a Person type (optional string Name) and a Knows relationship.
pub fn sample_model() -> (Arc<InMemoryModelBase>, SampleTypes) {
    let person = EntityTypeBuilder::new("Person")
        .property(PropertyTypeBuilder::new("Person_Name", DataType::string()).optional())
        .build();
    let knows = RelationshipType::new("Knows", Some(&person), Some(&person));
    let model = Arc::new(InMemoryModelBase::new());
    model.register_entity_type(&person);
    model.register_relationship_type(&knows);
    let name = person.find_property_type("Person_Name").expect("declared above");
    (model, SampleTypes { person, name, knows })
}

/// An in-process network of nodes named `n0`, `n1`, ...
pub struct TestNetwork {
    pub network: Arc<LocalNetwork>,
    pub nodes: Vec<Arc<NetMeshBase>>,
    pub types: SampleTypes,
}

impl TestNetwork {
    /// Create a network with the given number of nodes and fast timeouts.
    pub fn new(num_nodes: usize) -> Self {
        let config = NetMeshBaseConfig {
            access_locally_timeout_ms: 2_000,
            try_to_obtain_lock_timeout_ms: 1_000,
            ..NetMeshBaseConfig::default()
        };
        Self::with_config(num_nodes, config)
    }

    /// Create a network whose nodes share `config`.
    pub fn with_config(num_nodes: usize, config: NetMeshBaseConfig) -> Self {
        let (model, types) = sample_model();
        let network = LocalNetwork::new();
        let nodes = (0..num_nodes)
            .map(|i| network.create_node(MeshBaseIdentifier::new(format!("n{}", i)), model.clone(), config.clone()))
            .collect();
        Self { network, nodes, types }
    }

    /// The node with the given index.
    pub fn node(&self, i: usize) -> &Arc<NetMeshBase> {
        &self.nodes[i]
    }

    /// Creates a Person with a name on node `i`.
    pub fn create_person(&self, i: usize, name: &str) -> NetMeshObject {
        let node = self.node(i);
        let tx = node.core().create_transaction_asap().unwrap();
        let person = node
            .lifecycle()
            .create_mesh_object_with_types(&[self.types.person.clone()])
            .unwrap();
        person
            .set_property_value(&self.types.name, Some(PropertyValue::String(name.to_string())))
            .unwrap();
        tx.commit();
        person
    }

    /// Sets the name of a Person in its own transaction.
    pub fn rename(&self, person: &NetMeshObject, name: &str) -> meshbase_core::MeshResult<()> {
        let base = person.mesh_object().mesh_base().expect("alive");
        let tx = base.create_transaction_asap().unwrap();
        let result = person
            .set_property_value(&self.types.name, Some(PropertyValue::String(name.to_string())))
            .map(|_| ());
        tx.commit();
        result
    }

    /// The name of a Person.
    pub fn name_of(&self, person: &NetMeshObject) -> Option<String> {
        match person.get_property_value(&self.types.name).ok().flatten() {
            Some(PropertyValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Shut down every node.
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.die();
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
