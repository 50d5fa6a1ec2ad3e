//! MeshObject: a typed, attributed, relatable node of the object graph.
//!
//! All mutators come in two flavours. The regular ones (`bless`,
//! `set_property_values`, `relate`, ...) are used by local code: they consult
//! the access-control collaborator and the MeshBase's update-rights policy.
//! The `ripple_*` ones apply changes that were decided elsewhere in the
//! replication graph: they skip both checks, tolerate state that already
//! matches, and stamp their events with the peer that caused them.
//!
//! Object state is guarded by a per-object mutex. The lock is never held
//! while calling into collaborators or listeners, and never held on two
//! objects at once; cross-object consistency relies on the transaction
//! discipline of the MeshBase.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::event::{notify_listeners, Change, MeshObjectEvent, MeshObjectListener};
use crate::externalized::{ExternalizedMeshObject, ExternalizedNeighbor};
use crate::facade::TypedFacade;
use crate::identifier::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier};
use crate::mesh_base::MeshBase;
use crate::model::{EntityType, PropertyType, PropertyValue, RoleType};
use crate::time::{now_millis, or_now, UNSET_TIME};
use crate::transaction::Transaction;

/// Time stamps of a MeshObject, in milliseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshObjectTimes {
    /// When the object was created; negative means now.
    pub created: i64,
    /// When the object was last updated; negative means now.
    pub updated: i64,
    /// When the object was last read; negative means now.
    pub read: i64,
    /// When the object expires; negative means never.
    pub expires: i64,
}

impl Default for MeshObjectTimes {
    fn default() -> Self {
        Self {
            created: UNSET_TIME,
            updated: UNSET_TIME,
            read: UNSET_TIME,
            expires: UNSET_TIME,
        }
    }
}

/// Left and right neighbors of an object in its equivalence set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EquivalencePointers {
    /// The member to the left.
    pub left: Option<MeshObjectIdentifier>,
    /// The member to the right.
    pub right: Option<MeshObjectIdentifier>,
}

impl EquivalencePointers {
    /// True if the object is not a member of any equivalence set.
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Computes the pointers of `identifier` from the ordered members of its set.
    ///
    /// If `identifier` is not listed it is placed at the left end.
    pub fn from_chain(identifier: &MeshObjectIdentifier, chain: &[MeshObjectIdentifier]) -> Self {
        match chain.iter().position(|c| c == identifier) {
            Some(pos) => Self {
                left: pos.checked_sub(1).map(|p| chain[p].clone()),
                right: chain.get(pos + 1).cloned(),
            },
            None => Self {
                left: None,
                right: chain.first().cloned(),
            },
        }
    }
}

#[derive(Clone, Debug)]
struct Neighbor {
    identifier: MeshObjectIdentifier,
    role_types: Vec<RoleType>,
}

struct ObjectState {
    dead: bool,
    time_created: i64,
    time_updated: i64,
    time_read: i64,
    time_expires: i64,
    types: Option<Vec<EntityType>>,
    properties: Option<HashMap<PropertyType, PropertyValue>>,
    neighbors: Option<Vec<Neighbor>>,
    equivalents: EquivalencePointers,
}

impl ObjectState {
    fn types(&self) -> &[EntityType] {
        self.types.as_deref().unwrap_or(&[])
    }

    fn declares(&self, property_type: &PropertyType) -> bool {
        self.types().iter().any(|t| t.declares(property_type))
    }

    fn is_blessed_by(&self, entity_type: &EntityType) -> bool {
        self.types().iter().any(|t| t.is_subtype_of_or_equals(entity_type))
    }

    fn neighbors(&self) -> &[Neighbor] {
        self.neighbors.as_deref().unwrap_or(&[])
    }

    fn neighbor(&self, identifier: &MeshObjectIdentifier) -> Option<&Neighbor> {
        self.neighbors().iter().find(|n| &n.identifier == identifier)
    }

    fn neighbor_mut(&mut self, identifier: &MeshObjectIdentifier) -> Option<&mut Neighbor> {
        self.neighbors
            .as_mut()
            .and_then(|ns| ns.iter_mut().find(|n| &n.identifier == identifier))
    }

    fn add_neighbor(&mut self, identifier: MeshObjectIdentifier) {
        self.neighbors.get_or_insert_with(Vec::new).push(Neighbor {
            identifier,
            role_types: Vec::new(),
        });
    }

    fn remove_neighbor(&mut self, identifier: &MeshObjectIdentifier) -> Option<Neighbor> {
        let neighbors = self.neighbors.as_mut()?;
        let pos = neighbors.iter().position(|n| &n.identifier == identifier)?;
        Some(neighbors.remove(pos))
    }

    fn property(&self, property_type: &PropertyType) -> Option<PropertyValue> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(property_type))
            .cloned()
    }

    fn put_property(&mut self, property_type: &PropertyType, value: Option<PropertyValue>) -> Option<PropertyValue> {
        match value {
            Some(v) => self
                .properties
                .get_or_insert_with(HashMap::new)
                .insert(property_type.clone(), v),
            None => self.properties.as_mut().and_then(|p| p.remove(property_type)),
        }
    }
}

fn type_ids(types: &[EntityType]) -> Vec<MeshTypeIdentifier> {
    types.iter().map(|t| t.identifier().clone()).collect()
}

fn role_ids(roles: &[RoleType]) -> Vec<MeshTypeIdentifier> {
    roles.iter().map(|r| r.identifier().clone()).collect()
}

/// How a mutation is performed.
#[derive(Clone, Copy)]
struct Mode<'a> {
    /// Decided locally: consult permissions and update rights.
    master: bool,
    /// Do not record change events.
    silent: bool,
    origin: Option<&'a MeshBaseIdentifier>,
    time: Option<i64>,
}

impl<'a> Mode<'a> {
    fn master(time: Option<i64>) -> Self {
        Self {
            master: true,
            silent: false,
            origin: None,
            time,
        }
    }

    fn ripple(origin: Option<&'a MeshBaseIdentifier>, time: Option<i64>) -> Self {
        Self {
            master: false,
            silent: false,
            origin,
            time,
        }
    }
}

/// How `bless` validates the types it is given.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BlessCheck {
    /// Reject abstract types.
    Abstract,
    /// Reject types not usable as forward reference.
    ForwardReference,
}

struct Ctx {
    base: Arc<MeshBase>,
    tx: Arc<Transaction>,
    origin: Option<MeshBaseIdentifier>,
    time: i64,
    silent: bool,
}

/// A typed, attributed, relatable node of the object graph.
pub struct MeshObject {
    identifier: MeshObjectIdentifier,
    mesh_base: Weak<MeshBase>,
    state: Mutex<ObjectState>,
    listeners: RwLock<Vec<Arc<dyn MeshObjectListener>>>,
}

impl MeshObject {
    /// Instantiates an object that belongs to `mesh_base` but is not yet
    /// registered with it. Use a LifecycleManager to create objects.
    pub fn new(
        identifier: MeshObjectIdentifier,
        mesh_base: Weak<MeshBase>,
        times: MeshObjectTimes,
        equivalents: EquivalencePointers,
    ) -> Self {
        let now = now_millis();
        let created = if times.created < 0 { now } else { times.created };
        Self {
            identifier,
            mesh_base,
            state: Mutex::new(ObjectState {
                dead: false,
                time_created: created,
                time_updated: if times.updated < 0 { created } else { times.updated },
                time_read: if times.read < 0 { created } else { times.read },
                time_expires: times.expires,
                types: None,
                properties: None,
                neighbors: None,
                equivalents,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The identifier of this object.
    pub fn identifier(&self) -> &MeshObjectIdentifier {
        &self.identifier
    }

    /// The MeshBase this object lives in, if it is still alive.
    pub fn mesh_base(&self) -> Option<Arc<MeshBase>> {
        self.mesh_base.upgrade().filter(|b| b.is_alive())
    }

    /// True if the object has been removed from its MeshBase or the MeshBase is dead.
    pub fn is_dead(&self) -> bool {
        self.state.lock().dead || self.mesh_base().is_none()
    }

    /// True if this object is the home object of its MeshBase.
    pub fn is_home_object(&self) -> bool {
        self.mesh_base()
            .map(|b| b.home_object_identifier() == &self.identifier)
            .unwrap_or(false)
    }

    /// True if both objects live in the same MeshBase.
    pub fn shares_mesh_base_with(&self, other: &MeshObject) -> bool {
        Weak::ptr_eq(&self.mesh_base, &other.mesh_base)
    }

    /// When the object was created.
    pub fn time_created(&self) -> i64 {
        self.state.lock().time_created
    }

    /// When the object was last updated.
    pub fn time_updated(&self) -> i64 {
        self.state.lock().time_updated
    }

    /// When a property of the object was last read.
    pub fn time_read(&self) -> i64 {
        self.state.lock().time_read
    }

    /// When the object expires; negative means never.
    pub fn time_expires(&self) -> i64 {
        self.state.lock().time_expires
    }

    /// Registers a listener for this object's change events.
    pub fn add_listener(&self, listener: Arc<dyn MeshObjectListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregisters a listener; returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn MeshObjectListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn dead_error(&self) -> MeshError {
        MeshError::IsDead {
            identifier: self.identifier.clone(),
        }
    }

    fn live_base(&self) -> MeshResult<Arc<MeshBase>> {
        let base = self.mesh_base().ok_or_else(|| self.dead_error())?;
        if self.state.lock().dead {
            return Err(self.dead_error());
        }
        Ok(base)
    }

    fn begin(&self, mode: Mode<'_>) -> MeshResult<Ctx> {
        let base = self.live_base()?;
        let tx = base.check_transaction()?;
        if mode.master {
            base.check_update_rights(self)?;
        }
        Ok(Ctx {
            base,
            tx,
            origin: mode.origin.cloned(),
            time: mode.time.map(or_now).unwrap_or_else(now_millis),
            silent: mode.silent,
        })
    }

    fn record(&self, ctx: &Ctx, change: Change) {
        if ctx.silent {
            return;
        }
        self.record_change(&ctx.tx, ctx.origin.as_ref(), ctx.time, change);
    }

    pub(crate) fn record_change(
        &self,
        tx: &Transaction,
        origin: Option<&MeshBaseIdentifier>,
        time: i64,
        change: Change,
    ) {
        let event = MeshObjectEvent::new(self.identifier.clone(), time, origin.cloned(), change);
        tx.add_change(event.clone());
        let listeners = self.listeners.read().clone();
        notify_listeners(&listeners, &event);
    }

    pub(crate) fn mark_dead(&self) {
        self.state.lock().dead = true;
    }

    // ---- properties ----

    /// Reads a property.
    ///
    /// # Returns
    /// The value, or `None` if the property is declared but has no value.
    pub fn get_property_value(&self, property_type: &PropertyType) -> MeshResult<Option<PropertyValue>> {
        let base = self.live_base()?;
        if !self.state.lock().declares(property_type) {
            return Err(MeshError::EntityNotBlessed {
                identifier: self.identifier.clone(),
                entity_type: property_type.declaring_type().clone(),
            });
        }
        if let Some(am) = base.access_manager() {
            am.check_permitted_get_property(self, property_type)?;
        }
        let mut state = self.state.lock();
        state.time_read = now_millis();
        Ok(state.property(property_type))
    }

    /// Reads several properties at once.
    pub fn get_property_values(&self, property_types: &[PropertyType]) -> MeshResult<Vec<Option<PropertyValue>>> {
        property_types
            .iter()
            .map(|pt| self.get_property_value(pt))
            .collect()
    }

    /// All property types of all blessed types that the caller may read.
    pub fn get_all_property_types(&self) -> MeshResult<Vec<PropertyType>> {
        let base = self.live_base()?;
        let declared = self.declared_property_types()?;
        Ok(match base.access_manager() {
            Some(am) => declared
                .into_iter()
                .filter(|pt| am.check_permitted_get_property(self, pt).is_ok())
                .collect(),
            None => declared,
        })
    }

    /// Every property type declared by the blessed types, whether or not
    /// the caller may read it.
    pub fn declared_property_types(&self) -> MeshResult<Vec<PropertyType>> {
        self.live_base()?;
        let types = self.state.lock().types().to_vec();
        let mut ret: Vec<PropertyType> = Vec::new();
        for t in &types {
            for pt in t.all_property_types() {
                if !ret.contains(&pt) {
                    ret.push(pt);
                }
            }
        }
        Ok(ret)
    }

    /// Sets one property, returning the old value.
    pub fn set_property_value(
        &self,
        property_type: &PropertyType,
        value: Option<PropertyValue>,
    ) -> MeshResult<Option<PropertyValue>> {
        let mut old = self.set_property_values(&[(property_type.clone(), value)])?;
        Ok(old.pop().flatten())
    }

    /// Sets several properties, all or nothing, returning the old values.
    pub fn set_property_values(
        &self,
        pairs: &[(PropertyType, Option<PropertyValue>)],
    ) -> MeshResult<Vec<Option<PropertyValue>>> {
        self.internal_set_property_values(pairs, Mode::master(None))
    }

    /// Like [`MeshObject::set_property_values`] with an explicit update time.
    pub fn set_property_values_at(
        &self,
        pairs: &[(PropertyType, Option<PropertyValue>)],
        time_updated: i64,
    ) -> MeshResult<Vec<Option<PropertyValue>>> {
        self.internal_set_property_values(pairs, Mode::master(Some(time_updated)))
    }

    /// Applies property values decided elsewhere in the replication graph.
    pub fn ripple_set_property_values(
        &self,
        pairs: &[(PropertyType, Option<PropertyValue>)],
        origin: Option<&MeshBaseIdentifier>,
        time_updated: Option<i64>,
    ) -> MeshResult<Vec<Option<PropertyValue>>> {
        self.internal_set_property_values(pairs, Mode::ripple(origin, time_updated))
    }

    fn internal_set_property_values(
        &self,
        pairs: &[(PropertyType, Option<PropertyValue>)],
        mode: Mode<'_>,
    ) -> MeshResult<Vec<Option<PropertyValue>>> {
        self.live_base()?;
        for (index, (pt, value)) in pairs.iter().enumerate() {
            if mode.master && pt.is_read_only() {
                return Err(MeshError::PropertyReadOnly {
                    identifier: self.identifier.clone(),
                    property_type: pt.identifier().clone(),
                    index,
                });
            }
            match value {
                None if !pt.is_optional() => {
                    return Err(MeshError::IllegalPropertyValue {
                        identifier: self.identifier.clone(),
                        property_type: pt.identifier().clone(),
                        index,
                        reason: "mandatory property cannot be empty".to_string(),
                    });
                }
                Some(v) => {
                    if let Err(reason) = pt.data_type().check(v) {
                        return Err(MeshError::IllegalPropertyValue {
                            identifier: self.identifier.clone(),
                            property_type: pt.identifier().clone(),
                            index,
                            reason,
                        });
                    }
                }
                None => {}
            }
        }

        let ctx = self.begin(mode)?;
        if mode.master {
            if let Some(am) = ctx.base.access_manager() {
                for (pt, value) in pairs {
                    am.check_permitted_set_property(self, pt, value.as_ref())?;
                }
            }
        }

        let mut changes = Vec::new();
        let old_values = {
            let mut state = self.state.lock();
            if let Some((pt, _)) = pairs.iter().find(|(pt, _)| !state.declares(pt)) {
                return Err(MeshError::EntityNotBlessed {
                    identifier: self.identifier.clone(),
                    entity_type: pt.declaring_type().clone(),
                });
            }
            let mut old_values = Vec::with_capacity(pairs.len());
            for (pt, value) in pairs {
                let old = state.put_property(pt, value.clone());
                if PropertyValue::compare(old.as_ref(), value.as_ref()).is_ne() {
                    changes.push(Change::PropertyChanged {
                        property_type: pt.identifier().clone(),
                        old_value: old.clone(),
                        new_value: value.clone(),
                    });
                }
                old_values.push(old);
            }
            if !changes.is_empty() {
                state.time_updated = ctx.time;
            }
            old_values
        };
        for change in changes {
            self.record(&ctx, change);
        }
        Ok(old_values)
    }

    // ---- types ----

    /// The entity types this object is blessed with.
    pub fn get_types(&self) -> MeshResult<Vec<EntityType>> {
        self.live_base()?;
        Ok(self.state.lock().types().to_vec())
    }

    /// True if the object is blessed with the type or a subtype of it.
    pub fn is_blessed_by(&self, entity_type: &EntityType) -> MeshResult<bool> {
        let base = self.live_base()?;
        if let Some(am) = base.access_manager() {
            am.check_permitted_blessed_by(self, entity_type)?;
        }
        Ok(self.state.lock().is_blessed_by(entity_type))
    }

    /// Blesses the object with additional types.
    pub fn bless(&self, types: &[EntityType]) -> MeshResult<()> {
        self.internal_bless(types, Mode::master(None), BlessCheck::Abstract, false)
    }

    /// Blesses a forward reference: only types usable as forward reference are accepted.
    pub fn bless_for_forward_reference(&self, types: &[EntityType]) -> MeshResult<()> {
        self.internal_bless(types, Mode::master(None), BlessCheck::ForwardReference, false)
    }

    /// Adds types decided elsewhere; types that are covered already are skipped.
    pub fn ripple_bless(
        &self,
        types: &[EntityType],
        origin: Option<&MeshBaseIdentifier>,
        time_updated: Option<i64>,
    ) -> MeshResult<()> {
        self.internal_bless(types, Mode::ripple(origin, time_updated), BlessCheck::Abstract, true)
    }

    /// Blesses a virgin object that is not yet registered, without events.
    pub(crate) fn bless_virgin(&self, types: &[EntityType], time: i64) -> MeshResult<()> {
        let mode = Mode {
            master: false,
            silent: true,
            origin: None,
            time: Some(time),
        };
        self.internal_bless(types, mode, BlessCheck::Abstract, false)
    }

    /// Fills a virgin object that is not yet registered with state received
    /// from a peer, without events or checks.
    pub(crate) fn restore(
        &self,
        types: Vec<EntityType>,
        properties: Vec<(PropertyType, Option<PropertyValue>)>,
        neighbors: Vec<(MeshObjectIdentifier, Vec<RoleType>)>,
    ) {
        let mut state = self.state.lock();
        if !types.is_empty() {
            state.types = Some(types);
        }
        for (pt, value) in properties {
            state.put_property(&pt, value);
        }
        for (identifier, role_types) in neighbors {
            if identifier == self.identifier || state.neighbor(&identifier).is_some() {
                continue;
            }
            state
                .neighbors
                .get_or_insert_with(Vec::new)
                .push(Neighbor { identifier, role_types });
        }
    }

    fn internal_bless(
        &self,
        types: &[EntityType],
        mode: Mode<'_>,
        check: BlessCheck,
        forgiving: bool,
    ) -> MeshResult<()> {
        self.live_base()?;
        for t in types {
            let rejected = match check {
                BlessCheck::Abstract => t.is_abstract(),
                BlessCheck::ForwardReference => !t.may_be_used_as_forward_reference(),
            };
            if rejected {
                return Err(MeshError::IsAbstract {
                    mesh_type: t.identifier().clone(),
                });
            }
        }

        let ctx = self.begin(mode)?;
        if mode.master {
            if let Some(am) = ctx.base.access_manager() {
                am.check_permitted_bless(self, types)?;
            }
        }

        let (old, added, target) = {
            let mut state = self.state.lock();
            let old = state.types().to_vec();

            let mut added: Vec<EntityType> = Vec::new();
            for t in types {
                if let Some(existing) = old.iter().find(|e| e.is_subtype_of_or_equals(t)) {
                    if forgiving {
                        continue;
                    }
                    debug!("{} already blessed with {} via {}", self.identifier, t.identifier(), existing.identifier());
                    return Err(MeshError::EntityBlessedAlready {
                        identifier: self.identifier.clone(),
                        entity_type: t.identifier().clone(),
                    });
                }
                if !added.contains(t) {
                    added.push(t.clone());
                }
            }
            // within the batch, a subtype makes its supertypes redundant
            let snapshot = added.clone();
            added.retain(|t| !snapshot.iter().any(|o| o.is_subtype_of_does_not_equal(t)));
            if added.is_empty() {
                return Ok(());
            }

            let mut target: Vec<EntityType> = old
                .iter()
                .filter(|e| !added.iter().any(|a| a.is_subtype_of_does_not_equal(e)))
                .cloned()
                .collect();
            target.extend(added.iter().cloned());
            state.types = Some(target.clone());

            for t in &added {
                for pt in t.all_property_types() {
                    if let Some(default) = pt.default_value() {
                        if state.property(&pt).is_none() {
                            state.put_property(&pt, Some(default.clone()));
                        }
                    }
                }
            }
            state.time_updated = ctx.time;
            (old, added, target)
        };

        self.record(
            &ctx,
            Change::TypesAdded {
                old_types: type_ids(&old),
                added: type_ids(&added),
                new_types: type_ids(&target),
            },
        );
        Ok(())
    }

    /// Removes types from the object, all or nothing.
    pub fn unbless(&self, types: &[EntityType]) -> MeshResult<()> {
        self.internal_unbless(types, Mode::master(None), false)
    }

    /// Removes types decided elsewhere; types not present are skipped.
    pub fn ripple_unbless(
        &self,
        types: &[EntityType],
        origin: Option<&MeshBaseIdentifier>,
        time_updated: Option<i64>,
    ) -> MeshResult<()> {
        self.internal_unbless(types, Mode::ripple(origin, time_updated), true)
    }

    fn internal_unbless(&self, types: &[EntityType], mode: Mode<'_>, forgiving: bool) -> MeshResult<()> {
        let ctx = self.begin(mode)?;

        let (old, removing) = {
            let state = self.state.lock();
            let old = state.types().to_vec();
            let mut removing: Vec<EntityType> = Vec::new();
            for t in types {
                if old.contains(t) {
                    if !removing.contains(t) {
                        removing.push(t.clone());
                    }
                } else if !forgiving {
                    return Err(MeshError::EntityNotBlessed {
                        identifier: self.identifier.clone(),
                        entity_type: t.identifier().clone(),
                    });
                }
            }
            if removing.is_empty() {
                return Ok(());
            }
            let remaining: Vec<&EntityType> = old.iter().filter(|t| !removing.contains(t)).collect();
            for neighbor in state.neighbors() {
                for role in &neighbor.role_types {
                    if let Some(required) = role.entity_type() {
                        if !remaining.iter().any(|r| r.is_subtype_of_or_equals(required)) {
                            return Err(MeshError::RoleTypeRequiresEntityType {
                                identifier: self.identifier.clone(),
                                role_type: role.identifier().clone(),
                                entity_type: required.identifier().clone(),
                            });
                        }
                    }
                }
            }
            (old, removing)
        };

        if mode.master {
            if let Some(am) = ctx.base.access_manager() {
                am.check_permitted_unbless(self, &removing)?;
            }
        }

        let target = {
            let mut state = self.state.lock();
            let target: Vec<EntityType> = old.iter().filter(|t| !removing.contains(t)).cloned().collect();
            if let Some(properties) = state.properties.as_mut() {
                properties.retain(|pt, _| target.iter().any(|t| t.declares(pt)));
            }
            state.types = if target.is_empty() { None } else { Some(target.clone()) };
            state.time_updated = ctx.time;
            target
        };
        for t in &removing {
            ctx.base.facades().invalidate(&self.identifier, t.identifier());
        }

        self.record(
            &ctx,
            Change::TypesRemoved {
                old_types: type_ids(&old),
                removed: type_ids(&removing),
                new_types: type_ids(&target),
            },
        );
        Ok(())
    }

    /// The typed facade of this object for the type, created on first use
    /// and cached by the MeshBase.
    pub fn typed_facade_for(self: &Arc<Self>, entity_type: &EntityType) -> MeshResult<Arc<dyn TypedFacade>> {
        let base = self.live_base()?;
        let blessed = {
            let state = self.state.lock();
            state
                .types()
                .iter()
                .find(|t| t.is_subtype_of_or_equals(entity_type))
                .cloned()
        };
        match blessed {
            Some(_) => Ok(base.facades().get_or_create(self, entity_type)),
            None => Err(MeshError::EntityNotBlessed {
                identifier: self.identifier.clone(),
                entity_type: entity_type.identifier().clone(),
            }),
        }
    }

    // ---- relationships ----

    /// Identifiers of all neighbors, in the order they were related.
    pub fn get_neighbor_identifiers(&self) -> MeshResult<Vec<MeshObjectIdentifier>> {
        self.live_base()?;
        Ok(self
            .state
            .lock()
            .neighbors()
            .iter()
            .map(|n| n.identifier.clone())
            .collect())
    }

    /// True if the object is related to the neighbor.
    pub fn is_related_to(&self, neighbor: &MeshObjectIdentifier) -> bool {
        self.state.lock().neighbor(neighbor).is_some()
    }

    /// The locally resident neighbors.
    pub fn traverse_to_neighbors(&self) -> MeshResult<Vec<Arc<MeshObject>>> {
        let base = self.live_base()?;
        let ids = self.get_neighbor_identifiers()?;
        Ok(ids
            .iter()
            .filter_map(|id| base.find_mesh_object_by_identifier(id))
            .collect())
    }

    /// The locally resident neighbors reached by playing `role_type`.
    /// Neighbors the caller may not traverse to are skipped.
    pub fn traverse(&self, role_type: &RoleType) -> MeshResult<Vec<Arc<MeshObject>>> {
        let base = self.live_base()?;
        let ids: Vec<MeshObjectIdentifier> = self
            .state
            .lock()
            .neighbors()
            .iter()
            .filter(|n| n.role_types.contains(role_type))
            .map(|n| n.identifier.clone())
            .collect();
        let mut ret = Vec::new();
        for id in ids {
            if let Some(am) = base.access_manager() {
                if am.check_permitted_traversal(self, role_type, &id).is_err() {
                    continue;
                }
            }
            if let Some(found) = base.find_mesh_object_by_identifier(&id) {
                ret.push(found);
            }
        }
        Ok(ret)
    }

    /// The roles this object plays towards the neighbor.
    pub fn get_role_types(&self, neighbor: &MeshObjectIdentifier) -> MeshResult<Vec<RoleType>> {
        self.live_base()?;
        match self.state.lock().neighbor(neighbor) {
            Some(n) => Ok(n.role_types.clone()),
            None => Err(MeshError::NotRelated {
                identifier: self.identifier.clone(),
                neighbor: neighbor.clone(),
            }),
        }
    }

    /// All roles this object plays towards any neighbor.
    pub fn get_all_role_types(&self) -> MeshResult<Vec<RoleType>> {
        self.live_base()?;
        let state = self.state.lock();
        let mut ret: Vec<RoleType> = Vec::new();
        for n in state.neighbors() {
            for r in &n.role_types {
                if !ret.contains(r) {
                    ret.push(r.clone());
                }
            }
        }
        Ok(ret)
    }

    fn check_same_base(&self, other: &MeshObject, base: &MeshBase) -> MeshResult<()> {
        if self.shares_mesh_base_with(other) {
            Ok(())
        } else {
            Err(MeshError::WrongMeshBase {
                identifier: other.identifier.clone(),
                mesh_base: base.identifier().clone(),
            })
        }
    }

    fn begin_pair(&self, other: &MeshObject) -> MeshResult<Ctx> {
        if other.identifier == self.identifier {
            return Err(MeshError::CannotRelateToSelf {
                identifier: self.identifier.clone(),
            });
        }
        let ctx = self.begin(Mode::master(None))?;
        self.check_same_base(other, &ctx.base)?;
        other.live_base()?;
        ctx.base.check_update_rights(other)?;
        Ok(ctx)
    }

    /// Relates this object to another object of the same MeshBase.
    pub fn relate(&self, other: &MeshObject) -> MeshResult<()> {
        let ctx = self.begin_pair(other)?;
        if self.is_related_to(&other.identifier) {
            return Err(MeshError::RelatedAlready {
                identifier: self.identifier.clone(),
                neighbor: other.identifier.clone(),
            });
        }
        if let Some(am) = ctx.base.access_manager() {
            am.check_permitted_relate(self, other)?;
        }
        self.state.lock().add_neighbor(other.identifier.clone());
        other.state.lock().add_neighbor(self.identifier.clone());
        self.record(&ctx, Change::NeighborAdded { neighbor: other.identifier.clone() });
        other.record(&ctx, Change::NeighborAdded { neighbor: self.identifier.clone() });
        Ok(())
    }

    /// Records a relationship decided elsewhere. The neighbor does not need
    /// to be resident; if it is, its side is updated as well.
    pub fn ripple_relate(
        &self,
        neighbor: &MeshObjectIdentifier,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<()> {
        if neighbor == &self.identifier {
            return Err(MeshError::CannotRelateToSelf {
                identifier: self.identifier.clone(),
            });
        }
        let ctx = self.begin(Mode::ripple(origin, None))?;
        self.ripple_relate_one_side(&ctx, neighbor);
        if let Some(other) = ctx.base.find_mesh_object_by_identifier(neighbor) {
            other.ripple_relate_one_side(&ctx, &self.identifier);
        }
        Ok(())
    }

    fn ripple_relate_one_side(&self, ctx: &Ctx, neighbor: &MeshObjectIdentifier) {
        {
            let mut state = self.state.lock();
            if state.neighbor(neighbor).is_some() {
                return;
            }
            state.add_neighbor(neighbor.clone());
        }
        self.record(ctx, Change::NeighborAdded { neighbor: neighbor.clone() });
    }

    /// Removes the relationship to another object, including all its roles.
    pub fn unrelate(&self, other: &MeshObject) -> MeshResult<()> {
        let ctx = self.begin_pair(other)?;
        if !self.is_related_to(&other.identifier) {
            return Err(MeshError::NotRelated {
                identifier: self.identifier.clone(),
                neighbor: other.identifier.clone(),
            });
        }
        if let Some(am) = ctx.base.access_manager() {
            am.check_permitted_unrelate(self, &other.identifier)?;
        }
        self.unrelate_one_side(&ctx, &other.identifier);
        other.unrelate_one_side(&ctx, &self.identifier);
        Ok(())
    }

    /// Removes a relationship decided elsewhere; a no-op if not related.
    pub fn ripple_unrelate(
        &self,
        neighbor: &MeshObjectIdentifier,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<()> {
        let ctx = self.begin(Mode::ripple(origin, None))?;
        self.unrelate_one_side(&ctx, neighbor);
        if let Some(other) = ctx.base.find_mesh_object_by_identifier(neighbor) {
            other.unrelate_one_side(&ctx, &self.identifier);
        }
        Ok(())
    }

    fn unrelate_one_side(&self, ctx: &Ctx, neighbor: &MeshObjectIdentifier) {
        let removed = self.state.lock().remove_neighbor(neighbor);
        if let Some(removed) = removed {
            self.record(
                ctx,
                Change::NeighborRemoved {
                    neighbor: neighbor.clone(),
                    role_types: role_ids(&removed.role_types),
                },
            );
        }
    }

    /// Adds roles to an existing relationship. This object plays the given
    /// roles; the neighbor plays their inverses.
    pub fn bless_relationship(&self, role_types: &[RoleType], other: &MeshObject) -> MeshResult<()> {
        let ctx = self.begin_pair(other)?;
        let current = match self.state.lock().neighbor(&other.identifier) {
            Some(n) => n.role_types.clone(),
            None => {
                return Err(MeshError::NotRelated {
                    identifier: self.identifier.clone(),
                    neighbor: other.identifier.clone(),
                })
            }
        };
        for rt in role_types {
            if rt.is_abstract() {
                return Err(MeshError::IsAbstract {
                    mesh_type: rt.identifier().clone(),
                });
            }
            if current.contains(rt) {
                return Err(MeshError::RoleTypeBlessedAlready {
                    identifier: self.identifier.clone(),
                    neighbor: other.identifier.clone(),
                    role_type: rt.identifier().clone(),
                });
            }
            if let Some(required) = rt.entity_type() {
                if !self.state.lock().is_blessed_by(required) {
                    return Err(MeshError::EntityNotBlessed {
                        identifier: self.identifier.clone(),
                        entity_type: required.identifier().clone(),
                    });
                }
            }
            if let Some(required) = rt.inverse().entity_type() {
                if !other.state.lock().is_blessed_by(required) {
                    return Err(MeshError::EntityNotBlessed {
                        identifier: other.identifier.clone(),
                        entity_type: required.identifier().clone(),
                    });
                }
            }
        }
        if let Some(am) = ctx.base.access_manager() {
            am.check_permitted_bless_role_types(self, role_types, &other.identifier)?;
        }
        let inverses: Vec<RoleType> = role_types.iter().map(|r| r.inverse()).collect();
        self.add_roles_one_side(&ctx, &other.identifier, role_types);
        other.add_roles_one_side(&ctx, &self.identifier, &inverses);
        Ok(())
    }

    /// Adds roles decided elsewhere, relating first if needed. Roles present
    /// already are skipped.
    pub fn ripple_bless_relationship(
        &self,
        role_types: &[RoleType],
        neighbor: &MeshObjectIdentifier,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<()> {
        self.ripple_relate(neighbor, origin)?;
        let ctx = self.begin(Mode::ripple(origin, None))?;
        self.add_roles_one_side(&ctx, neighbor, role_types);
        if let Some(other) = ctx.base.find_mesh_object_by_identifier(neighbor) {
            let inverses: Vec<RoleType> = role_types.iter().map(|r| r.inverse()).collect();
            other.add_roles_one_side(&ctx, &self.identifier, &inverses);
        }
        Ok(())
    }

    fn add_roles_one_side(&self, ctx: &Ctx, neighbor: &MeshObjectIdentifier, role_types: &[RoleType]) {
        let change = {
            let mut state = self.state.lock();
            let Some(entry) = state.neighbor_mut(neighbor) else {
                return;
            };
            let old = entry.role_types.clone();
            let added: Vec<RoleType> = role_types
                .iter()
                .filter(|r| !old.contains(r))
                .cloned()
                .collect();
            if added.is_empty() {
                return;
            }
            entry.role_types.extend(added.iter().cloned());
            Change::RoleTypesAdded {
                neighbor: neighbor.clone(),
                old_role_types: role_ids(&old),
                added: role_ids(&added),
                new_role_types: role_ids(&entry.role_types),
            }
        };
        self.record(ctx, change);
    }

    /// Removes roles from a relationship; the relationship itself remains.
    pub fn unbless_relationship(&self, role_types: &[RoleType], other: &MeshObject) -> MeshResult<()> {
        let ctx = self.begin_pair(other)?;
        let current = match self.state.lock().neighbor(&other.identifier) {
            Some(n) => n.role_types.clone(),
            None => {
                return Err(MeshError::NotRelated {
                    identifier: self.identifier.clone(),
                    neighbor: other.identifier.clone(),
                })
            }
        };
        if let Some(missing) = role_types.iter().find(|r| !current.contains(r)) {
            return Err(MeshError::RoleTypeNotBlessed {
                identifier: self.identifier.clone(),
                neighbor: other.identifier.clone(),
                role_type: missing.identifier().clone(),
            });
        }
        if let Some(am) = ctx.base.access_manager() {
            am.check_permitted_unbless_role_types(self, role_types, &other.identifier)?;
        }
        let inverses: Vec<RoleType> = role_types.iter().map(|r| r.inverse()).collect();
        self.remove_roles_one_side(&ctx, &other.identifier, role_types);
        other.remove_roles_one_side(&ctx, &self.identifier, &inverses);
        Ok(())
    }

    /// Removes roles decided elsewhere; roles not present are skipped.
    pub fn ripple_unbless_relationship(
        &self,
        role_types: &[RoleType],
        neighbor: &MeshObjectIdentifier,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<()> {
        let ctx = self.begin(Mode::ripple(origin, None))?;
        self.remove_roles_one_side(&ctx, neighbor, role_types);
        if let Some(other) = ctx.base.find_mesh_object_by_identifier(neighbor) {
            let inverses: Vec<RoleType> = role_types.iter().map(|r| r.inverse()).collect();
            other.remove_roles_one_side(&ctx, &self.identifier, &inverses);
        }
        Ok(())
    }

    fn remove_roles_one_side(&self, ctx: &Ctx, neighbor: &MeshObjectIdentifier, role_types: &[RoleType]) {
        let change = {
            let mut state = self.state.lock();
            let Some(entry) = state.neighbor_mut(neighbor) else {
                return;
            };
            let old = entry.role_types.clone();
            let removed: Vec<RoleType> = old.iter().filter(|r| role_types.contains(r)).cloned().collect();
            if removed.is_empty() {
                return;
            }
            entry.role_types.retain(|r| !removed.contains(r));
            Change::RoleTypesRemoved {
                neighbor: neighbor.clone(),
                old_role_types: role_ids(&old),
                removed: role_ids(&removed),
                new_role_types: role_ids(&entry.role_types),
            }
        };
        self.record(ctx, change);
    }

    // ---- equivalence sets ----

    /// The left/right pointers of this object in its equivalence set.
    pub fn equivalence_pointers(&self) -> EquivalencePointers {
        self.state.lock().equivalents.clone()
    }

    /// All members of this object's equivalence set, left to right, including
    /// this object. Members that are not resident end the walk in their
    /// direction but are still listed.
    pub fn get_equivalents(&self) -> MeshResult<Vec<MeshObjectIdentifier>> {
        let base = self.live_base()?;
        Ok(self.equivalence_chain(&base))
    }

    fn equivalence_chain(&self, base: &MeshBase) -> Vec<MeshObjectIdentifier> {
        let pointers = self.equivalence_pointers();
        let mut left = Vec::new();
        let mut cursor = pointers.left;
        while let Some(id) = cursor {
            if id == self.identifier || left.contains(&id) {
                break;
            }
            cursor = base
                .find_mesh_object_by_identifier(&id)
                .and_then(|o| o.equivalence_pointers().left);
            left.push(id);
        }
        left.reverse();
        left.push(self.identifier.clone());

        let mut cursor = pointers.right;
        while let Some(id) = cursor {
            if left.contains(&id) {
                break;
            }
            cursor = base
                .find_mesh_object_by_identifier(&id)
                .and_then(|o| o.equivalence_pointers().right);
            left.push(id);
        }
        left
    }

    /// True if `identifier` names this object or one of its equivalents.
    pub fn is_identified_by(&self, identifier: &MeshObjectIdentifier) -> bool {
        if identifier == &self.identifier {
            return true;
        }
        match self.live_base() {
            Ok(base) => self.equivalence_chain(&base).contains(identifier),
            Err(_) => false,
        }
    }

    /// Merges this object's equivalence set with the other object's set.
    pub fn add_as_equivalent(&self, other: &MeshObject) -> MeshResult<()> {
        let ctx = self.begin(Mode::master(None))?;
        self.check_same_base(other, &ctx.base)?;
        other.live_base()?;
        ctx.base.check_update_rights(other)?;

        let here = self.equivalence_chain(&ctx.base);
        if here.contains(&other.identifier) {
            return Err(MeshError::EquivalentAlready {
                identifier: self.identifier.clone(),
                equivalent: other.identifier.clone(),
            });
        }
        if let Some(am) = ctx.base.access_manager() {
            am.check_permitted_add_as_equivalent(self, other)?;
        }
        let there = other.equivalence_chain(&ctx.base);

        let left_most_here = here.first().cloned().unwrap_or_else(|| self.identifier.clone());
        let right_most_there = there.last().cloned().unwrap_or_else(|| other.identifier.clone());
        let left_obj = ctx.base.find_mesh_object_by_identifier(&left_most_here).ok_or(MeshError::NotFound {
            identifier: left_most_here.clone(),
        })?;
        let right_obj = ctx
            .base
            .find_mesh_object_by_identifier(&right_most_there)
            .ok_or(MeshError::NotFound {
                identifier: right_most_there.clone(),
            })?;

        ctx.base.check_update_rights(&left_obj)?;
        ctx.base.check_update_rights(&right_obj)?;

        right_obj.state.lock().equivalents.right = Some(left_most_here);
        left_obj.state.lock().equivalents.left = Some(right_most_there);

        if left_obj.identifier != self.identifier {
            left_obj.record(&ctx, Change::EquivalentsAdded { added: there.clone() });
        }
        if right_obj.identifier != other.identifier {
            right_obj.record(&ctx, Change::EquivalentsAdded { added: here.clone() });
        }
        self.record(&ctx, Change::EquivalentsAdded { added: there });
        other.record(&ctx, Change::EquivalentsAdded { added: here });
        Ok(())
    }

    /// Leaves the equivalence set this object is a member of.
    pub fn remove_as_equivalent(&self) -> MeshResult<()> {
        let ctx = self.begin(Mode::master(None))?;
        let pointers = self.equivalence_pointers();
        if pointers.is_empty() {
            return Err(MeshError::NotEquivalent {
                identifier: self.identifier.clone(),
            });
        }
        if let Some(am) = ctx.base.access_manager() {
            am.check_permitted_remove_as_equivalent(self)?;
        }
        for id in [&pointers.left, &pointers.right].into_iter().flatten() {
            if let Some(neighbor) = ctx.base.find_mesh_object_by_identifier(id) {
                ctx.base.check_update_rights(&neighbor)?;
            }
        }
        self.leave_equivalence_set(&ctx);
        Ok(())
    }

    fn leave_equivalence_set(&self, ctx: &Ctx) {
        let members = self.equivalence_chain(&ctx.base);
        let pointers = std::mem::take(&mut self.state.lock().equivalents);
        if pointers.is_empty() {
            return;
        }
        let left_behind = vec![self.identifier.clone()];
        if let Some(left) = pointers.left.as_ref().and_then(|id| ctx.base.find_mesh_object_by_identifier(id)) {
            left.state.lock().equivalents.right = pointers.right.clone();
            left.record(ctx, Change::EquivalentsRemoved { removed: left_behind.clone() });
        }
        if let Some(right) = pointers.right.as_ref().and_then(|id| ctx.base.find_mesh_object_by_identifier(id)) {
            right.state.lock().equivalents.left = pointers.left.clone();
            right.record(ctx, Change::EquivalentsRemoved { removed: left_behind });
        }
        let removed = members.into_iter().filter(|m| m != &self.identifier).collect();
        self.record(ctx, Change::EquivalentsRemoved { removed });
    }

    /// Replaces the equivalence pointers with ones decided elsewhere.
    pub fn ripple_set_equivalence_pointers(
        &self,
        pointers: EquivalencePointers,
        origin: Option<&MeshBaseIdentifier>,
    ) -> MeshResult<()> {
        let ctx = self.begin(Mode::ripple(origin, None))?;
        let old = std::mem::replace(&mut self.state.lock().equivalents, pointers.clone());
        if old == pointers {
            return Ok(());
        }
        let change = if pointers.is_empty() {
            Change::EquivalentsRemoved {
                removed: old.left.into_iter().chain(old.right).collect(),
            }
        } else {
            Change::EquivalentsAdded {
                added: pointers.left.into_iter().chain(pointers.right).collect(),
            }
        };
        self.record(&ctx, change);
        Ok(())
    }

    // ---- lifecycle support ----

    /// Cuts all relationships and leaves the equivalence set before deletion.
    pub(crate) fn disconnect(&self, origin: Option<&MeshBaseIdentifier>, time: i64) -> MeshResult<()> {
        let ctx = self.begin(Mode::ripple(origin, Some(time)))?;
        let neighbors: Vec<MeshObjectIdentifier> = self
            .state
            .lock()
            .neighbors()
            .iter()
            .map(|n| n.identifier.clone())
            .collect();
        for neighbor in neighbors {
            self.unrelate_one_side(&ctx, &neighbor);
            if let Some(other) = ctx.base.find_mesh_object_by_identifier(&neighbor) {
                other.unrelate_one_side(&ctx, &self.identifier);
            }
        }
        self.leave_equivalence_set(&ctx);
        Ok(())
    }

    /// A serializable snapshot of the object's state.
    pub fn externalize(&self) -> MeshResult<ExternalizedMeshObject> {
        let base = self.live_base()?;
        let equivalents = {
            let pointers = self.equivalence_pointers();
            if pointers.is_empty() {
                Vec::new()
            } else {
                self.equivalence_chain(&base)
            }
        };
        let state = self.state.lock();
        let mut properties: Vec<(MeshTypeIdentifier, Option<PropertyValue>)> = state
            .properties
            .as_ref()
            .map(|p| {
                p.iter()
                    .map(|(pt, v)| (pt.identifier().clone(), Some(v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        properties.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ExternalizedMeshObject {
            identifier: self.identifier.clone(),
            time_created: state.time_created,
            time_updated: state.time_updated,
            time_read: state.time_read,
            time_expires: state.time_expires,
            entity_types: type_ids(state.types()),
            properties,
            neighbors: state
                .neighbors()
                .iter()
                .map(|n| ExternalizedNeighbor {
                    identifier: n.identifier.clone(),
                    role_types: role_ids(&n.role_types),
                })
                .collect(),
            equivalents,
        })
    }
}

impl fmt::Debug for MeshObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshObject")
            .field("identifier", &self.identifier)
            .field("dead", &self.state.lock().dead)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{not_permitted, AccessManager};
    use crate::facade::GenericFacade;
    use crate::mesh_base::MeshBase;
    use crate::model::{
        DataType, EntityTypeBuilder, InMemoryModelBase, PropertyTypeBuilder, RelationshipType,
    };
    use proptest::prelude::*;

    struct Fixture {
        base: Arc<MeshBase>,
        animal: EntityType,
        dog: EntityType,
        cat: EntityType,
        owner: EntityType,
        owns: RelationshipType,
        name: PropertyType,
        age: PropertyType,
        barks: PropertyType,
        serial: PropertyType,
    }

    fn fixture_with(access: Option<Arc<dyn AccessManager>>) -> Fixture {
        let animal = EntityTypeBuilder::new("Animal")
            .abstract_type()
            .property(PropertyTypeBuilder::new("Animal_Name", DataType::string()).optional())
            .property(
                PropertyTypeBuilder::new("Animal_Age", DataType::Integer { min: Some(0), max: None }).optional(),
            )
            .property(PropertyTypeBuilder::new("Animal_Serial", DataType::string()).optional().read_only())
            .build();
        let dog = EntityTypeBuilder::new("Dog")
            .supertype(&animal)
            .forward_reference()
            .property(
                PropertyTypeBuilder::new("Dog_Barks", DataType::Boolean)
                    .default_value(PropertyValue::Boolean(true)),
            )
            .build();
        let cat = EntityTypeBuilder::new("Cat").supertype(&animal).build();
        let owner = EntityTypeBuilder::new("Owner").build();
        let owns = RelationshipType::new("Owns", Some(&owner), Some(&animal));

        let model = Arc::new(InMemoryModelBase::new());
        for t in [&animal, &dog, &cat, &owner] {
            model.register_entity_type(t);
        }
        model.register_relationship_type(&owns);

        let mut builder = MeshBase::builder(MeshBaseIdentifier::new("test"), model);
        if let Some(access) = access {
            builder = builder.access_manager(access);
        }
        let base = builder.build();
        Fixture {
            name: animal.find_property_type("Animal_Name").unwrap(),
            age: animal.find_property_type("Animal_Age").unwrap(),
            serial: animal.find_property_type("Animal_Serial").unwrap(),
            barks: dog.find_property_type("Dog_Barks").unwrap(),
            base,
            animal,
            dog,
            cat,
            owner,
            owns,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn create(f: &Fixture, types: &[EntityType]) -> Arc<MeshObject> {
        let tx = f.base.create_transaction_asap().unwrap();
        let obj = f.base.lifecycle().create_mesh_object_with_types(types).unwrap();
        tx.commit();
        obj
    }

    #[test]
    fn test_mutation_requires_transaction() {
        let f = fixture();
        let obj = create(&f, &[]);
        let err = obj.bless(&[f.dog.clone()]).unwrap_err();
        assert!(matches!(err, MeshError::Transaction(_)));
    }

    #[test]
    fn test_mutation_from_other_thread_is_rejected() {
        let f = fixture();
        let obj = create(&f, &[]);
        let _tx = f.base.create_transaction_asap().unwrap();
        let dog = f.dog.clone();
        let other = obj.clone();
        let err = std::thread::spawn(move || other.bless(&[dog]).unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(
            err,
            MeshError::Transaction(crate::error::TransactionError::WrongThread { .. })
        ));
    }

    #[test]
    fn test_bless_rejects_abstract_and_duplicates() {
        let f = fixture();
        let obj = create(&f, &[]);
        let _tx = f.base.create_transaction_asap().unwrap();
        assert!(matches!(
            obj.bless(&[f.animal.clone()]),
            Err(MeshError::IsAbstract { .. })
        ));
        obj.bless(&[f.dog.clone()]).unwrap();
        assert!(matches!(
            obj.bless(&[f.dog.clone()]),
            Err(MeshError::EntityBlessedAlready { .. })
        ));
        // a subtype covers its supertype
        assert!(obj.is_blessed_by(&f.animal).unwrap());
    }

    #[test]
    fn test_bless_with_subtype_replaces_supertype() {
        let f = fixture();
        let puppy = EntityTypeBuilder::new("Puppy").supertype(&f.dog).build();
        let obj = create(&f, &[f.dog.clone()]);
        let _tx = f.base.create_transaction_asap().unwrap();
        obj.bless(&[puppy.clone()]).unwrap();
        assert_eq!(obj.get_types().unwrap(), vec![puppy]);
    }

    #[test]
    fn test_forward_reference_mode() {
        let f = fixture();
        let obj = create(&f, &[]);
        let _tx = f.base.create_transaction_asap().unwrap();
        assert!(matches!(
            obj.bless_for_forward_reference(&[f.cat.clone()]),
            Err(MeshError::IsAbstract { .. })
        ));
        obj.bless_for_forward_reference(&[f.dog.clone()]).unwrap();
    }

    #[test]
    fn test_bless_initializes_defaults() {
        let f = fixture();
        let obj = create(&f, &[]);
        let tx = f.base.create_transaction_asap().unwrap();
        obj.bless(&[f.dog.clone()]).unwrap();
        assert_eq!(obj.get_property_value(&f.barks).unwrap(), Some(PropertyValue::Boolean(true)));
        assert_eq!(tx.transaction().changes().len(), 1);
    }

    #[test]
    fn test_property_requires_declaring_type() {
        let f = fixture();
        let obj = create(&f, &[f.cat.clone()]);
        let err = obj.get_property_value(&f.barks).unwrap_err();
        assert!(matches!(err, MeshError::EntityNotBlessed { .. }));
        assert_eq!(obj.get_property_value(&f.name).unwrap(), None);
    }

    #[test]
    fn test_set_property_fires_only_on_change() {
        let f = fixture();
        let obj = create(&f, &[f.dog.clone()]);
        let tx = f.base.create_transaction_asap().unwrap();
        let old = obj
            .set_property_value(&f.name, Some(PropertyValue::String("Rex".into())))
            .unwrap();
        assert_eq!(old, None);
        obj.set_property_value(&f.name, Some(PropertyValue::String("Rex".into())))
            .unwrap();
        assert_eq!(tx.transaction().changes().len(), 1);
        assert_eq!(
            obj.get_property_value(&f.name).unwrap(),
            Some(PropertyValue::String("Rex".into()))
        );
    }

    #[test]
    fn test_set_property_rejects_read_only_and_null() {
        let f = fixture();
        let obj = create(&f, &[f.dog.clone()]);
        let _tx = f.base.create_transaction_asap().unwrap();
        let err = obj
            .set_property_value(&f.serial, Some(PropertyValue::String("x".into())))
            .unwrap_err();
        assert!(matches!(err, MeshError::PropertyReadOnly { index: 0, .. }));
        let err = obj.set_property_value(&f.barks, None).unwrap_err();
        assert!(matches!(err, MeshError::IllegalPropertyValue { index: 0, .. }));
        // replication may write read-only properties
        obj.ripple_set_property_values(&[(f.serial.clone(), Some(PropertyValue::String("x".into())))], None, None)
            .unwrap();
    }

    #[test]
    fn test_set_property_values_is_all_or_nothing() {
        let f = fixture();
        let obj = create(&f, &[f.dog.clone()]);
        let tx = f.base.create_transaction_asap().unwrap();
        let err = obj
            .set_property_values(&[
                (f.name.clone(), Some(PropertyValue::String("Rex".into()))),
                (f.age.clone(), Some(PropertyValue::String("three".into()))),
                (f.barks.clone(), Some(PropertyValue::Boolean(false))),
            ])
            .unwrap_err();
        assert!(matches!(err, MeshError::IllegalPropertyValue { index: 1, .. }));
        assert_eq!(obj.get_property_value(&f.name).unwrap(), None);
        assert_eq!(obj.get_property_value(&f.barks).unwrap(), Some(PropertyValue::Boolean(true)));
        assert!(tx.transaction().changes().is_empty());
    }

    #[test]
    fn test_unbless_removes_properties() {
        let f = fixture();
        let obj = create(&f, &[f.dog.clone()]);
        let _tx = f.base.create_transaction_asap().unwrap();
        obj.set_property_value(&f.name, Some(PropertyValue::String("Rex".into())))
            .unwrap();
        obj.unbless(&[f.dog.clone()]).unwrap();
        assert!(obj.get_types().unwrap().is_empty());
        obj.bless(&[f.cat.clone()]).unwrap();
        assert_eq!(obj.get_property_value(&f.name).unwrap(), None);
        assert!(matches!(
            obj.unbless(&[f.dog.clone()]),
            Err(MeshError::EntityNotBlessed { .. })
        ));
    }

    #[test]
    fn test_unbless_rejected_while_role_requires_type() {
        let f = fixture();
        let person = create(&f, &[f.owner.clone()]);
        let pet = create(&f, &[f.dog.clone()]);
        let _tx = f.base.create_transaction_asap().unwrap();
        person.relate(&pet).unwrap();
        person.bless_relationship(&[f.owns.source()], &pet).unwrap();

        let err = pet.unbless(&[f.dog.clone()]).unwrap_err();
        assert!(matches!(err, MeshError::RoleTypeRequiresEntityType { .. }));
        assert_eq!(pet.get_types().unwrap(), vec![f.dog.clone()]);

        assert_eq!(pet.get_role_types(person.identifier()).unwrap(), vec![f.owns.destination()]);
        let owned = person.traverse(&f.owns.source()).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].identifier(), pet.identifier());

        person.unbless_relationship(&[f.owns.source()], &pet).unwrap();
        pet.unbless(&[f.dog.clone()]).unwrap();
    }

    #[test]
    fn test_relate_rules() {
        let f = fixture();
        let a = create(&f, &[]);
        let b = create(&f, &[]);
        let _tx = f.base.create_transaction_asap().unwrap();
        assert!(matches!(a.relate(&a), Err(MeshError::CannotRelateToSelf { .. })));
        a.relate(&b).unwrap();
        assert!(b.is_related_to(a.identifier()));
        assert!(matches!(a.relate(&b), Err(MeshError::RelatedAlready { .. })));
        assert!(matches!(
            a.bless_relationship(&[f.owns.source()], &b),
            Err(MeshError::EntityNotBlessed { .. })
        ));
        a.unrelate(&b).unwrap();
        assert!(matches!(a.unrelate(&b), Err(MeshError::NotRelated { .. })));
        assert!(matches!(
            a.bless_relationship(&[f.owns.source()], &b),
            Err(MeshError::NotRelated { .. })
        ));
    }

    #[test]
    fn test_ripple_relate_is_lenient() {
        let f = fixture();
        let a = create(&f, &[f.owner.clone()]);
        let b = create(&f, &[f.dog.clone()]);
        let _tx = f.base.create_transaction_asap().unwrap();
        let peer = MeshBaseIdentifier::new("peer");
        a.ripple_bless_relationship(&[f.owns.source()], b.identifier(), Some(&peer))
            .unwrap();
        a.ripple_bless_relationship(&[f.owns.source()], b.identifier(), Some(&peer))
            .unwrap();
        assert_eq!(a.get_role_types(b.identifier()).unwrap(), vec![f.owns.source()]);
        assert_eq!(b.get_role_types(a.identifier()).unwrap(), vec![f.owns.destination()]);
        let remote = MeshObjectIdentifier::new(peer.clone(), "far");
        a.ripple_relate(&remote, Some(&peer)).unwrap();
        assert_eq!(a.get_neighbor_identifiers().unwrap().len(), 2);
        assert_eq!(a.traverse_to_neighbors().unwrap().len(), 1);
        a.ripple_unrelate(&remote, Some(&peer)).unwrap();
        a.ripple_unrelate(&remote, Some(&peer)).unwrap();
    }

    #[test]
    fn test_equivalence_symmetry() {
        let f = fixture();
        let one = create(&f, &[]);
        let two = create(&f, &[]);
        let three = create(&f, &[]);
        let _tx = f.base.create_transaction_asap().unwrap();

        one.add_as_equivalent(&two).unwrap();
        assert!(one.is_identified_by(two.identifier()));
        assert!(two.is_identified_by(one.identifier()));
        assert!(matches!(
            two.add_as_equivalent(&one),
            Err(MeshError::EquivalentAlready { .. })
        ));

        three.add_as_equivalent(&one).unwrap();
        assert_eq!(one.get_equivalents().unwrap().len(), 3);
        assert!(three.is_identified_by(two.identifier()));

        one.remove_as_equivalent().unwrap();
        assert!(!one.is_identified_by(two.identifier()));
        assert!(!two.is_identified_by(one.identifier()));
        assert!(two.is_identified_by(three.identifier()));
        assert!(matches!(one.remove_as_equivalent(), Err(MeshError::NotEquivalent { .. })));
    }

    #[test]
    fn test_joining_sets_records_far_endpoint() {
        let f = fixture();
        let one = create(&f, &[]);
        let two = create(&f, &[]);
        let three = create(&f, &[]);
        let four = create(&f, &[]);
        let tx = f.base.create_transaction_asap().unwrap();
        one.add_as_equivalent(&two).unwrap();
        three.add_as_equivalent(&one).unwrap();
        tx.commit();

        // two's chain is two, one, three: three is the right end and gets re-pointed
        let tx = f.base.create_transaction_asap().unwrap();
        four.add_as_equivalent(&two).unwrap();
        let sources: Vec<MeshObjectIdentifier> =
            tx.transaction().changes().iter().map(|e| e.source.clone()).collect();
        assert!(sources.contains(three.identifier()));
        assert!(sources.contains(four.identifier()));
        assert!(sources.contains(two.identifier()));
        tx.commit();
        assert!(three.is_identified_by(four.identifier()));

        let tx = f.base.create_transaction_asap().unwrap();
        one.remove_as_equivalent().unwrap();
        let sources: Vec<MeshObjectIdentifier> =
            tx.transaction().changes().iter().map(|e| e.source.clone()).collect();
        assert!(sources.contains(two.identifier()));
        assert!(sources.contains(three.identifier()));
        tx.commit();
    }

    #[test]
    fn test_joining_sets_checks_rights_of_endpoints() {
        struct Frozen(MeshObjectIdentifier);
        impl crate::mesh_base::UpdateRightsPolicy for Frozen {
            fn check_update_rights(&self, object: &MeshObject) -> MeshResult<()> {
                if object.identifier() == &self.0 {
                    return Err(crate::access::not_permitted(object.identifier(), "update", "frozen"));
                }
                Ok(())
            }
        }
        let base_id = MeshBaseIdentifier::new("frozen");
        let frozen = MeshObjectIdentifier::new(base_id.clone(), "c");
        let base = MeshBase::builder(base_id.clone(), Arc::new(InMemoryModelBase::new()))
            .update_rights_policy(Arc::new(Frozen(frozen.clone())))
            .build();
        let tx = base.create_transaction_asap().unwrap();
        let lifecycle = base.lifecycle();
        let a = lifecycle
            .create_mesh_object_with_identifier(MeshObjectIdentifier::new(base_id.clone(), "a"), &[])
            .unwrap();
        let b = lifecycle
            .create_mesh_object_with_identifier(MeshObjectIdentifier::new(base_id, "b"), &[])
            .unwrap();
        let c = lifecycle.create_mesh_object_with_identifier(frozen, &[]).unwrap();
        // c joins by ripple so that its own rights are not consulted
        let chain = vec![b.identifier().clone(), c.identifier().clone()];
        c.ripple_set_equivalence_pointers(EquivalencePointers::from_chain(c.identifier(), &chain), None)
            .unwrap();
        b.ripple_set_equivalence_pointers(EquivalencePointers::from_chain(b.identifier(), &chain), None)
            .unwrap();

        let err = a.add_as_equivalent(&b).unwrap_err();
        assert!(matches!(err, MeshError::NotPermitted { .. }));
        assert!(!a.is_identified_by(b.identifier()));
        assert_eq!(c.equivalence_pointers().right, None);
        tx.commit();
    }

    #[test]
    fn test_pointers_from_chain() {
        let base = MeshBaseIdentifier::new("b");
        let ids: Vec<MeshObjectIdentifier> =
            (0..3).map(|i| MeshObjectIdentifier::new(base.clone(), i.to_string())).collect();
        let p = EquivalencePointers::from_chain(&ids[1], &ids);
        assert_eq!(p.left.as_ref(), Some(&ids[0]));
        assert_eq!(p.right.as_ref(), Some(&ids[2]));
        let stranger = MeshObjectIdentifier::new(base, "x");
        let p = EquivalencePointers::from_chain(&stranger, &ids);
        assert_eq!(p.left, None);
        assert_eq!(p.right.as_ref(), Some(&ids[0]));
    }

    #[test]
    fn test_listener_receives_events() {
        struct Count(Mutex<usize>);
        impl MeshObjectListener for Count {
            fn mesh_object_changed(&self, _event: &MeshObjectEvent) {
                *self.0.lock() += 1;
            }
        }
        let f = fixture();
        let obj = create(&f, &[f.dog.clone()]);
        let counter = Arc::new(Count(Mutex::new(0)));
        let listener: Arc<dyn MeshObjectListener> = counter.clone();
        obj.add_listener(listener.clone());
        let tx = f.base.create_transaction_asap().unwrap();
        obj.set_property_value(&f.age, Some(PropertyValue::Integer(3)))
            .unwrap();
        tx.commit();
        assert_eq!(*counter.0.lock(), 1);
        assert!(obj.remove_listener(&listener));
    }

    #[test]
    fn test_access_manager_refusals() {
        struct NoDogs;
        impl AccessManager for NoDogs {
            fn check_permitted_bless(&self, object: &MeshObject, types: &[EntityType]) -> MeshResult<()> {
                if types.iter().any(|t| t.identifier().as_str() == "Dog") {
                    return Err(not_permitted(object.identifier(), "bless", "no dogs"));
                }
                Ok(())
            }
            fn check_permitted_get_property(&self, object: &MeshObject, pt: &PropertyType) -> MeshResult<()> {
                if pt.identifier().as_str() == "Animal_Age" {
                    return Err(not_permitted(object.identifier(), "read", "secret"));
                }
                Ok(())
            }
        }
        let f = fixture_with(Some(Arc::new(NoDogs)));
        let obj = create(&f, &[f.cat.clone()]);
        let _tx = f.base.create_transaction_asap().unwrap();
        let other = f.base.lifecycle().create_mesh_object().unwrap();
        assert!(matches!(other.bless(&[f.dog.clone()]), Err(MeshError::NotPermitted { .. })));
        assert!(matches!(obj.get_property_value(&f.age), Err(MeshError::NotPermitted { .. })));
        let visible = obj.get_all_property_types().unwrap();
        assert_eq!(visible.len(), 2);
        assert!(!visible.contains(&f.age));
    }

    #[test]
    fn test_typed_facade_cached_and_evicted() {
        let f = fixture();
        let obj = create(&f, &[f.dog.clone()]);
        let first = obj.typed_facade_for(&f.dog).unwrap();
        let second = obj.typed_facade_for(&f.dog).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let generic = first.as_any().downcast_ref::<GenericFacade>().unwrap();
        assert_eq!(generic.get("Dog_Barks").unwrap(), Some(PropertyValue::Boolean(true)));
        assert!(obj.typed_facade_for(&f.cat).is_err());

        let tx = f.base.create_transaction_asap().unwrap();
        obj.unbless(&[f.dog.clone()]).unwrap();
        tx.commit();
        assert!(f.base.facades().is_empty());
    }

    #[test]
    fn test_externalize_snapshot() {
        let f = fixture();
        let a = create(&f, &[f.owner.clone()]);
        let b = create(&f, &[f.dog.clone()]);
        let tx = f.base.create_transaction_asap().unwrap();
        a.relate(&b).unwrap();
        a.bless_relationship(&[f.owns.source()], &b).unwrap();
        tx.commit();
        let ext = b.externalize().unwrap();
        assert_eq!(ext.identifier, *b.identifier());
        assert_eq!(ext.entity_types, vec![MeshTypeIdentifier::new("Dog")]);
        assert_eq!(ext.properties.len(), 1);
        assert_eq!(ext.neighbors.len(), 1);
        assert_eq!(ext.neighbors[0].role_types, vec![f.owns.destination().identifier().clone()]);
        assert!(ext.equivalents.is_empty());
    }

    proptest! {
        #[test]
        fn prop_bless_unbless_round_trip(start_dog in any::<bool>(), with_owner in any::<bool>(), with_cat in any::<bool>()) {
            let f = fixture();
            let initial: Vec<EntityType> = if start_dog { vec![f.dog.clone()] } else { vec![] };
            let obj = create(&f, &initial);
            let mut blessing = Vec::new();
            if with_owner { blessing.push(f.owner.clone()); }
            if with_cat { blessing.push(f.cat.clone()); }
            prop_assume!(!blessing.is_empty());

            let _tx = f.base.create_transaction_asap().unwrap();
            let before = obj.get_types().unwrap();
            obj.bless(&blessing).unwrap();
            obj.unbless(&blessing).unwrap();
            prop_assert_eq!(obj.get_types().unwrap(), before);
        }

        #[test]
        fn prop_invalid_pair_leaves_everything_unchanged(bad in 0usize..3, age in 0i64..100) {
            let f = fixture();
            let obj = create(&f, &[f.dog.clone()]);
            let _tx = f.base.create_transaction_asap().unwrap();
            let mut pairs = vec![
                (f.name.clone(), Some(PropertyValue::String("Rex".into()))),
                (f.age.clone(), Some(PropertyValue::Integer(age))),
                (f.barks.clone(), Some(PropertyValue::Boolean(false))),
            ];
            pairs[bad].1 = Some(PropertyValue::Blob(vec![1]));
            let err = obj.set_property_values(&pairs).unwrap_err();
            prop_assert!(matches!(err, MeshError::IllegalPropertyValue { index, .. } if index == bad), "expected IllegalPropertyValue at index {}", bad);
            prop_assert_eq!(obj.get_property_value(&f.name).unwrap(), None);
            prop_assert_eq!(obj.get_property_value(&f.age).unwrap(), None);
            prop_assert_eq!(obj.get_property_value(&f.barks).unwrap(), Some(PropertyValue::Boolean(true)));
        }
    }
}
