//! Change events and listeners.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::identifier::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier};
use crate::model::PropertyValue;

/// What changed about a MeshObject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// The object was created (or a replica of it was rippled in).
    Created,
    /// The object was deleted.
    Deleted,
    /// The replica was purged from the local store without deleting the object.
    Purged,
    /// A property value changed.
    PropertyChanged {
        /// The property type.
        property_type: MeshTypeIdentifier,
        /// Value before the change.
        old_value: Option<PropertyValue>,
        /// Value after the change.
        new_value: Option<PropertyValue>,
    },
    /// Entity types were added.
    TypesAdded {
        /// Types before the change.
        old_types: Vec<MeshTypeIdentifier>,
        /// Types that were added.
        added: Vec<MeshTypeIdentifier>,
        /// Types after the change.
        new_types: Vec<MeshTypeIdentifier>,
    },
    /// Entity types were removed.
    TypesRemoved {
        /// Types before the change.
        old_types: Vec<MeshTypeIdentifier>,
        /// Types that were removed.
        removed: Vec<MeshTypeIdentifier>,
        /// Types after the change.
        new_types: Vec<MeshTypeIdentifier>,
    },
    /// A neighbor was added.
    NeighborAdded {
        /// The new neighbor.
        neighbor: MeshObjectIdentifier,
    },
    /// A neighbor was removed, together with the roles the object played.
    NeighborRemoved {
        /// The former neighbor.
        neighbor: MeshObjectIdentifier,
        /// The roles played towards the former neighbor.
        role_types: Vec<MeshTypeIdentifier>,
    },
    /// Roles were added to the relationship with a neighbor.
    RoleTypesAdded {
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
        /// Roles before the change.
        old_role_types: Vec<MeshTypeIdentifier>,
        /// Roles added.
        added: Vec<MeshTypeIdentifier>,
        /// Roles after the change.
        new_role_types: Vec<MeshTypeIdentifier>,
    },
    /// Roles were removed from the relationship with a neighbor.
    RoleTypesRemoved {
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
        /// Roles before the change.
        old_role_types: Vec<MeshTypeIdentifier>,
        /// Roles removed.
        removed: Vec<MeshTypeIdentifier>,
        /// Roles after the change.
        new_role_types: Vec<MeshTypeIdentifier>,
    },
    /// The object joined an equivalence set.
    EquivalentsAdded {
        /// The members the object is now equivalent to.
        added: Vec<MeshObjectIdentifier>,
    },
    /// The object left its equivalence set.
    EquivalentsRemoved {
        /// The members the object is no longer equivalent to.
        removed: Vec<MeshObjectIdentifier>,
    },
}

/// One immutable change record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshObjectEvent {
    /// The object that changed.
    pub source: MeshObjectIdentifier,
    /// When the change happened, in milliseconds since the epoch.
    pub time: i64,
    /// The peer on whose behalf the change was made; `None` for local changes.
    pub origin: Option<MeshBaseIdentifier>,
    /// What changed.
    pub change: Change,
}

impl MeshObjectEvent {
    /// Creates a new event.
    pub fn new(
        source: MeshObjectIdentifier,
        time: i64,
        origin: Option<MeshBaseIdentifier>,
        change: Change,
    ) -> Self {
        Self {
            source,
            time,
            origin,
            change,
        }
    }

    /// True if the event removes the object from its MeshBase.
    pub fn is_removal(&self) -> bool {
        matches!(self.change, Change::Deleted | Change::Purged)
    }
}

/// Receives change events of one MeshObject, synchronously, on the mutating thread.
pub trait MeshObjectListener: Send + Sync {
    /// Called after a change has been applied.
    fn mesh_object_changed(&self, event: &MeshObjectEvent);
}

pub(crate) fn notify_listeners(listeners: &[Arc<dyn MeshObjectListener>], event: &MeshObjectEvent) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener.mesh_object_changed(event))).is_err() {
            warn!("Listener panicked while processing event on {}", event.source);
        }
    }
}
