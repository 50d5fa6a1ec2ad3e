//! Type tokens: entity types, property types, relationship and role types.
//!
//! The engine treats these as opaque tokens with identity, subtype tests and
//! a handful of flags. Definitions are looked up by identifier through a
//! [`ModelBase`]; [`InMemoryModelBase`] is the registry used when no external
//! model subsystem is plugged in.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{MeshError, MeshResult};
use crate::facade::FacadeFactory;
use crate::identifier::MeshTypeIdentifier;

/// A property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// A boolean value.
    Boolean(bool),
    /// A signed integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A string value.
    String(String),
    /// An opaque byte sequence.
    Blob(Vec<u8>),
    /// A point in time, in milliseconds since the epoch.
    TimeStamp(i64),
    /// One of the values of an enumerated data type.
    Enumerated(String),
}

impl PropertyValue {
    fn rank(&self) -> u8 {
        match self {
            PropertyValue::Boolean(_) => 0,
            PropertyValue::Integer(_) => 1,
            PropertyValue::Float(_) => 2,
            PropertyValue::String(_) => 3,
            PropertyValue::Blob(_) => 4,
            PropertyValue::TimeStamp(_) => 5,
            PropertyValue::Enumerated(_) => 6,
        }
    }

    /// Total order over values of the same kind; values of different kinds
    /// order by kind.
    pub fn compare_to(&self, other: &PropertyValue) -> Ordering {
        match (self, other) {
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a.cmp(b),
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a.cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.total_cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.cmp(b),
            (PropertyValue::Blob(a), PropertyValue::Blob(b)) => a.cmp(b),
            (PropertyValue::TimeStamp(a), PropertyValue::TimeStamp(b)) => a.cmp(b),
            (PropertyValue::Enumerated(a), PropertyValue::Enumerated(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Compares two possibly-absent values. An absent value sorts first.
    ///
    /// This is the comparison used to decide whether setting a property
    /// actually changed it.
    pub fn compare(a: Option<&PropertyValue>, b: Option<&PropertyValue>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.compare_to(b),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(v) => write!(f, "{}", v),
            PropertyValue::Integer(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(v) => write!(f, "\"{}\"", v),
            PropertyValue::Blob(v) => write!(f, "blob[{}]", v.len()),
            PropertyValue::TimeStamp(v) => write!(f, "@{}", v),
            PropertyValue::Enumerated(v) => write!(f, "{}", v),
        }
    }
}

/// The data type of a property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Booleans.
    Boolean,
    /// Integers, optionally bounded (inclusive).
    Integer {
        /// Smallest allowed value.
        min: Option<i64>,
        /// Largest allowed value.
        max: Option<i64>,
    },
    /// Floating-point numbers.
    Float,
    /// Strings, optionally limited in length (in characters).
    String {
        /// Maximum number of characters.
        max_length: Option<usize>,
    },
    /// Byte sequences.
    Blob,
    /// Time stamps.
    TimeStamp,
    /// One of a fixed list of values.
    Enumerated(Vec<String>),
}

impl DataType {
    /// Unbounded integers.
    pub fn integer() -> Self {
        DataType::Integer { min: None, max: None }
    }

    /// Strings of any length.
    pub fn string() -> Self {
        DataType::String { max_length: None }
    }

    /// Checks a value against this data type, returning the reason it does not conform.
    pub fn check(&self, value: &PropertyValue) -> Result<(), String> {
        match (self, value) {
            (DataType::Boolean, PropertyValue::Boolean(_)) => Ok(()),
            (DataType::Integer { min, max }, PropertyValue::Integer(v)) => {
                if let Some(min) = min {
                    if v < min {
                        return Err(format!("{} is below minimum {}", v, min));
                    }
                }
                if let Some(max) = max {
                    if v > max {
                        return Err(format!("{} is above maximum {}", v, max));
                    }
                }
                Ok(())
            }
            (DataType::Float, PropertyValue::Float(_)) => Ok(()),
            (DataType::String { max_length }, PropertyValue::String(s)) => match max_length {
                Some(max) if s.chars().count() > *max => {
                    Err(format!("string longer than {} characters", max))
                }
                _ => Ok(()),
            },
            (DataType::Blob, PropertyValue::Blob(_)) => Ok(()),
            (DataType::TimeStamp, PropertyValue::TimeStamp(_)) => Ok(()),
            (DataType::Enumerated(values), PropertyValue::Enumerated(v)) => {
                if values.iter().any(|candidate| candidate == v) {
                    Ok(())
                } else {
                    Err(format!("{} is not one of {:?}", v, values))
                }
            }
            _ => Err(format!("{} does not conform to {:?}", value, self)),
        }
    }

    /// True if the value conforms to this data type.
    pub fn conforms(&self, value: &PropertyValue) -> bool {
        self.check(value).is_ok()
    }
}

struct PropertyTypeInner {
    identifier: MeshTypeIdentifier,
    name: String,
    declaring_type: MeshTypeIdentifier,
    data_type: DataType,
    is_optional: bool,
    is_read_only: bool,
    default_value: Option<PropertyValue>,
}

/// A property type, declared by exactly one entity type.
#[derive(Clone)]
pub struct PropertyType(Arc<PropertyTypeInner>);

impl PropertyType {
    /// The identifier of this property type.
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        &self.0.identifier
    }

    /// The short name of this property type.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The entity type that declares this property type.
    pub fn declaring_type(&self) -> &MeshTypeIdentifier {
        &self.0.declaring_type
    }

    /// The data type of values of this property.
    pub fn data_type(&self) -> &DataType {
        &self.0.data_type
    }

    /// True if the property may be absent.
    pub fn is_optional(&self) -> bool {
        self.0.is_optional
    }

    /// True if the property cannot be set through the regular API.
    pub fn is_read_only(&self) -> bool {
        self.0.is_read_only
    }

    /// The value a newly blessed object receives for this property.
    pub fn default_value(&self) -> Option<&PropertyValue> {
        self.0.default_value.as_ref()
    }
}

impl PartialEq for PropertyType {
    fn eq(&self, other: &Self) -> bool {
        self.0.identifier == other.0.identifier
    }
}

impl Eq for PropertyType {}

impl Hash for PropertyType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identifier.hash(state);
    }
}

impl fmt::Debug for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyType({})", self.0.identifier)
    }
}

/// Builds a [`PropertyType`]; the declaring entity type is filled in by
/// [`EntityTypeBuilder::property`].
pub struct PropertyTypeBuilder {
    identifier: MeshTypeIdentifier,
    name: Option<String>,
    data_type: DataType,
    is_optional: bool,
    is_read_only: bool,
    default_value: Option<PropertyValue>,
}

impl PropertyTypeBuilder {
    /// Starts a mandatory, writable property type without default.
    pub fn new(identifier: impl Into<MeshTypeIdentifier>, data_type: DataType) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            data_type,
            is_optional: false,
            is_read_only: false,
            default_value: None,
        }
    }

    /// Sets the short name; defaults to the identifier.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Allows the property to be absent.
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Makes the property read-only.
    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    /// Sets the default value applied when an object is blessed.
    pub fn default_value(mut self, value: PropertyValue) -> Self {
        self.default_value = Some(value);
        self
    }

    fn build(self, declaring_type: &MeshTypeIdentifier) -> PropertyType {
        let name = self
            .name
            .unwrap_or_else(|| self.identifier.as_str().to_string());
        PropertyType(Arc::new(PropertyTypeInner {
            identifier: self.identifier,
            name,
            declaring_type: declaring_type.clone(),
            data_type: self.data_type,
            is_optional: self.is_optional,
            is_read_only: self.is_read_only,
            default_value: self.default_value,
        }))
    }
}

struct EntityTypeInner {
    identifier: MeshTypeIdentifier,
    name: String,
    is_abstract: bool,
    may_be_used_as_forward_reference: bool,
    supertypes: Vec<EntityType>,
    property_types: Vec<PropertyType>,
    facade_factory: Option<FacadeFactory>,
}

/// An entity type with which MeshObjects can be blessed.
#[derive(Clone)]
pub struct EntityType(Arc<EntityTypeInner>);

impl EntityType {
    /// The identifier of this entity type.
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        &self.0.identifier
    }

    /// The short name of this entity type.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// True if objects cannot be blessed with this type directly.
    pub fn is_abstract(&self) -> bool {
        self.0.is_abstract
    }

    /// True if this type may be used to bless forward references.
    pub fn may_be_used_as_forward_reference(&self) -> bool {
        self.0.may_be_used_as_forward_reference
    }

    /// The direct supertypes.
    pub fn supertypes(&self) -> &[EntityType] {
        &self.0.supertypes
    }

    /// The property types declared by this type itself.
    pub fn local_property_types(&self) -> &[PropertyType] {
        &self.0.property_types
    }

    /// The factory for typed facades of this type, if any.
    pub fn facade_factory(&self) -> Option<&FacadeFactory> {
        self.0.facade_factory.as_ref()
    }

    /// The property types declared by this type or any of its supertypes.
    pub fn all_property_types(&self) -> Vec<PropertyType> {
        let mut ret: Vec<PropertyType> = Vec::new();
        self.collect_property_types(&mut ret);
        ret
    }

    fn collect_property_types(&self, ret: &mut Vec<PropertyType>) {
        for pt in &self.0.property_types {
            if !ret.contains(pt) {
                ret.push(pt.clone());
            }
        }
        for sup in &self.0.supertypes {
            sup.collect_property_types(ret);
        }
    }

    /// Finds a property type of this type (or a supertype) by identifier or short name.
    pub fn find_property_type(&self, id_or_name: &str) -> Option<PropertyType> {
        self.all_property_types()
            .into_iter()
            .find(|pt| pt.identifier().as_str() == id_or_name || pt.name() == id_or_name)
    }

    /// True if this type or one of its supertypes declares the property type.
    pub fn declares(&self, property_type: &PropertyType) -> bool {
        self.0.property_types.contains(property_type)
            || self.0.supertypes.iter().any(|s| s.declares(property_type))
    }

    /// True if this type is `other` or inherits from it.
    pub fn is_subtype_of_or_equals(&self, other: &EntityType) -> bool {
        self == other || self.0.supertypes.iter().any(|s| s.is_subtype_of_or_equals(other))
    }

    /// True if this type inherits from `other` but is not `other`.
    pub fn is_subtype_of_does_not_equal(&self, other: &EntityType) -> bool {
        self != other && self.is_subtype_of_or_equals(other)
    }

    /// True if this type is `other` or one of its supertypes.
    pub fn equals_or_is_supertype(&self, other: &EntityType) -> bool {
        other.is_subtype_of_or_equals(self)
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.0.identifier == other.0.identifier
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identifier.hash(state);
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({})", self.0.identifier)
    }
}

/// Builds an [`EntityType`].
pub struct EntityTypeBuilder {
    identifier: MeshTypeIdentifier,
    name: Option<String>,
    is_abstract: bool,
    may_be_used_as_forward_reference: bool,
    supertypes: Vec<EntityType>,
    properties: Vec<PropertyTypeBuilder>,
    facade_factory: Option<FacadeFactory>,
}

impl EntityTypeBuilder {
    /// Starts a concrete entity type without supertypes or properties.
    pub fn new(identifier: impl Into<MeshTypeIdentifier>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            is_abstract: false,
            may_be_used_as_forward_reference: false,
            supertypes: Vec::new(),
            properties: Vec::new(),
            facade_factory: None,
        }
    }

    /// Sets the short name; defaults to the identifier.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Allows the type to bless forward references.
    pub fn forward_reference(mut self) -> Self {
        self.may_be_used_as_forward_reference = true;
        self
    }

    /// Adds a direct supertype.
    pub fn supertype(mut self, supertype: &EntityType) -> Self {
        self.supertypes.push(supertype.clone());
        self
    }

    /// Declares a property type.
    pub fn property(mut self, property: PropertyTypeBuilder) -> Self {
        self.properties.push(property);
        self
    }

    /// Installs a factory for typed facades.
    pub fn facade_factory(mut self, factory: FacadeFactory) -> Self {
        self.facade_factory = Some(factory);
        self
    }

    /// Finishes the type.
    pub fn build(self) -> EntityType {
        let identifier = self.identifier;
        let property_types = self
            .properties
            .into_iter()
            .map(|p| p.build(&identifier))
            .collect();
        let name = self.name.unwrap_or_else(|| identifier.as_str().to_string());
        EntityType(Arc::new(EntityTypeInner {
            identifier,
            name,
            is_abstract: self.is_abstract,
            may_be_used_as_forward_reference: self.may_be_used_as_forward_reference,
            supertypes: self.supertypes,
            property_types,
            facade_factory: self.facade_factory,
        }))
    }
}

struct RelationshipTypeInner {
    identifier: MeshTypeIdentifier,
    source_identifier: MeshTypeIdentifier,
    destination_identifier: MeshTypeIdentifier,
    source: Option<EntityType>,
    destination: Option<EntityType>,
    is_abstract: bool,
}

/// A relationship type with a source and a destination role.
#[derive(Clone)]
pub struct RelationshipType(Arc<RelationshipTypeInner>);

impl RelationshipType {
    /// Creates a relationship type. `None` entity types accept any object.
    pub fn new(
        identifier: impl Into<MeshTypeIdentifier>,
        source: Option<&EntityType>,
        destination: Option<&EntityType>,
    ) -> Self {
        Self::build(identifier.into(), source, destination, false)
    }

    /// Creates an abstract relationship type.
    pub fn new_abstract(
        identifier: impl Into<MeshTypeIdentifier>,
        source: Option<&EntityType>,
        destination: Option<&EntityType>,
    ) -> Self {
        Self::build(identifier.into(), source, destination, true)
    }

    fn build(
        identifier: MeshTypeIdentifier,
        source: Option<&EntityType>,
        destination: Option<&EntityType>,
        is_abstract: bool,
    ) -> Self {
        let source_identifier = MeshTypeIdentifier::new(format!("{}-S", identifier));
        let destination_identifier = MeshTypeIdentifier::new(format!("{}-D", identifier));
        RelationshipType(Arc::new(RelationshipTypeInner {
            identifier,
            source_identifier,
            destination_identifier,
            source: source.cloned(),
            destination: destination.cloned(),
            is_abstract,
        }))
    }

    /// The identifier of this relationship type.
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        &self.0.identifier
    }

    /// The role played by the source object.
    pub fn source(&self) -> RoleType {
        RoleType {
            relationship: self.clone(),
            side: RoleSide::Source,
        }
    }

    /// The role played by the destination object.
    pub fn destination(&self) -> RoleType {
        RoleType {
            relationship: self.clone(),
            side: RoleSide::Destination,
        }
    }
}

impl fmt::Debug for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationshipType({})", self.0.identifier)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoleSide {
    Source,
    Destination,
}

/// One side of a relationship type.
#[derive(Clone)]
pub struct RoleType {
    relationship: RelationshipType,
    side: RoleSide,
}

impl RoleType {
    /// The identifier of this role type.
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        match self.side {
            RoleSide::Source => &self.relationship.0.source_identifier,
            RoleSide::Destination => &self.relationship.0.destination_identifier,
        }
    }

    /// The entity type an object must be blessed with to play this role.
    pub fn entity_type(&self) -> Option<&EntityType> {
        match self.side {
            RoleSide::Source => self.relationship.0.source.as_ref(),
            RoleSide::Destination => self.relationship.0.destination.as_ref(),
        }
    }

    /// The role played by the other side.
    pub fn inverse(&self) -> RoleType {
        RoleType {
            relationship: self.relationship.clone(),
            side: match self.side {
                RoleSide::Source => RoleSide::Destination,
                RoleSide::Destination => RoleSide::Source,
            },
        }
    }

    /// The relationship type this role belongs to.
    pub fn relationship(&self) -> &RelationshipType {
        &self.relationship
    }

    /// True if the relationship type is abstract.
    pub fn is_abstract(&self) -> bool {
        self.relationship.0.is_abstract
    }
}

impl PartialEq for RoleType {
    fn eq(&self, other: &Self) -> bool {
        self.identifier() == other.identifier()
    }
}

impl Eq for RoleType {}

impl Hash for RoleType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier().hash(state);
    }
}

impl fmt::Debug for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoleType({})", self.identifier())
    }
}

/// The type collaborator: resolves type identifiers into type tokens.
pub trait ModelBase: Send + Sync {
    /// Finds an entity type.
    fn find_entity_type_by_identifier(&self, id: &MeshTypeIdentifier) -> MeshResult<EntityType>;

    /// Finds a property type.
    fn find_property_type_by_identifier(&self, id: &MeshTypeIdentifier) -> MeshResult<PropertyType>;

    /// Finds a role type.
    fn find_role_type_by_identifier(&self, id: &MeshTypeIdentifier) -> MeshResult<RoleType>;
}

/// A [`ModelBase`] backed by in-memory registries.
#[derive(Default)]
pub struct InMemoryModelBase {
    entity_types: DashMap<MeshTypeIdentifier, EntityType>,
    property_types: DashMap<MeshTypeIdentifier, PropertyType>,
    role_types: DashMap<MeshTypeIdentifier, RoleType>,
}

impl InMemoryModelBase {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type together with its locally declared property types.
    pub fn register_entity_type(&self, entity_type: &EntityType) {
        for pt in entity_type.local_property_types() {
            self.property_types.insert(pt.identifier().clone(), pt.clone());
        }
        self.entity_types
            .insert(entity_type.identifier().clone(), entity_type.clone());
    }

    /// Registers both roles of a relationship type.
    pub fn register_relationship_type(&self, relationship: &RelationshipType) {
        for role in [relationship.source(), relationship.destination()] {
            self.role_types.insert(role.identifier().clone(), role);
        }
    }

    /// Number of registered entity types.
    pub fn entity_type_count(&self) -> usize {
        self.entity_types.len()
    }
}

impl ModelBase for InMemoryModelBase {
    fn find_entity_type_by_identifier(&self, id: &MeshTypeIdentifier) -> MeshResult<EntityType> {
        self.entity_types
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MeshError::MeshTypeNotFound { identifier: id.clone() })
    }

    fn find_property_type_by_identifier(&self, id: &MeshTypeIdentifier) -> MeshResult<PropertyType> {
        self.property_types
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MeshError::MeshTypeNotFound { identifier: id.clone() })
    }

    fn find_role_type_by_identifier(&self, id: &MeshTypeIdentifier) -> MeshResult<RoleType> {
        self.role_types
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MeshError::MeshTypeNotFound { identifier: id.clone() })
    }
}
