//! Typed facades over MeshObjects and the LRU cache that owns them.
//!
//! A typed facade presents a MeshObject through one of its entity types.
//! Facades are cached per (object, type) by the MeshBase; the cache entry is
//! dropped when the object is unblessed from the type or leaves the MeshBase.

use lru::LruCache;
use parking_lot::Mutex;
use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use crate::error::{MeshError, MeshResult};
use crate::identifier::{MeshObjectIdentifier, MeshTypeIdentifier};
use crate::mesh_object::MeshObject;
use crate::model::{EntityType, PropertyValue};

/// A MeshObject viewed through one of its entity types.
pub trait TypedFacade: Send + Sync {
    /// The entity type this facade presents.
    fn entity_type(&self) -> &EntityType;

    /// The identifier of the underlying object.
    fn subject(&self) -> &MeshObjectIdentifier;

    /// Access to the concrete facade type.
    fn as_any(&self) -> &dyn Any;
}

/// Creates the facade for an object and one of its types.
pub type FacadeFactory = Arc<dyn Fn(&Arc<MeshObject>, &EntityType) -> Arc<dyn TypedFacade> + Send + Sync>;

/// The facade used for entity types without a factory: property access by name.
pub struct GenericFacade {
    subject: MeshObjectIdentifier,
    object: Weak<MeshObject>,
    entity_type: EntityType,
}

impl GenericFacade {
    /// Creates a facade over the object.
    pub fn new(object: &Arc<MeshObject>, entity_type: &EntityType) -> Self {
        Self {
            subject: object.identifier().clone(),
            object: Arc::downgrade(object),
            entity_type: entity_type.clone(),
        }
    }

    fn object(&self) -> MeshResult<Arc<MeshObject>> {
        self.object.upgrade().ok_or_else(|| MeshError::IsDead {
            identifier: self.subject.clone(),
        })
    }

    fn property_type(&self, name: &str) -> MeshResult<crate::model::PropertyType> {
        self.entity_type
            .find_property_type(name)
            .ok_or_else(|| MeshError::MeshTypeNotFound {
                identifier: MeshTypeIdentifier::new(name),
            })
    }

    /// Reads a property by identifier or short name.
    pub fn get(&self, name: &str) -> MeshResult<Option<PropertyValue>> {
        let pt = self.property_type(name)?;
        self.object()?.get_property_value(&pt)
    }

    /// Sets a property by identifier or short name.
    pub fn set(&self, name: &str, value: Option<PropertyValue>) -> MeshResult<Option<PropertyValue>> {
        let pt = self.property_type(name)?;
        self.object()?.set_property_value(&pt, value)
    }
}

impl TypedFacade for GenericFacade {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn subject(&self) -> &MeshObjectIdentifier {
        &self.subject
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type FacadeKey = (MeshObjectIdentifier, MeshTypeIdentifier);

/// LRU cache of typed facades, keyed by (object id, type id).
pub struct FacadeCache {
    entries: Mutex<LruCache<FacadeKey, Arc<dyn TypedFacade>>>,
}

impl FacadeCache {
    /// Creates a cache holding at most `capacity` facades (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached facade, creating it if needed.
    pub fn get_or_create(&self, object: &Arc<MeshObject>, entity_type: &EntityType) -> Arc<dyn TypedFacade> {
        let key = (object.identifier().clone(), entity_type.identifier().clone());
        let mut entries = self.entries.lock();
        if let Some(found) = entries.get(&key) {
            return found.clone();
        }
        let facade: Arc<dyn TypedFacade> = match entity_type.facade_factory() {
            Some(factory) => factory(object, entity_type),
            None => Arc::new(GenericFacade::new(object, entity_type)),
        };
        entries.put(key, facade.clone());
        facade
    }

    /// Drops the facade of one object and type.
    pub fn invalidate(&self, object: &MeshObjectIdentifier, entity_type: &MeshTypeIdentifier) {
        self.entries.lock().pop(&(object.clone(), entity_type.clone()));
    }

    /// Drops all facades of one object.
    pub fn invalidate_object(&self, object: &MeshObjectIdentifier) {
        let mut entries = self.entries.lock();
        let keys: Vec<FacadeKey> = entries
            .iter()
            .filter(|(k, _)| &k.0 == object)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            entries.pop(&key);
        }
    }

    /// Number of cached facades.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
