//! # Type Registry
//!
//! Assigns stable [`DataTypeId`] values to Rust types and stores the runtime
//! descriptor the tables need to allocate columns for them.
//!
//! ## Purpose
//! Table storage never knows the concrete types it holds. The registry maps each
//! registered type to a [`DataTypeDesc`] (name, layout, kind and a column
//! factory), which is everything the storage engine needs to create, move and
//! drop values of that type.
//!
//! ## Design
//! - The registry is an explicit object owned by the world. There is no global
//!   state and no dependence on static initialization order.
//! - Ids are assigned sequentially in registration order.
//! - Registering a type again keeps its id, replaces its descriptor and logs a
//!   warning.
//!
//! ## Invariants
//! - Every entry in `by_type` has a matching descriptor in `descs`.
//! - A registered type always has a column factory.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    mem::{align_of, size_of},
};

use tracing::{debug, warn};

use crate::engine::relation::RelationKind;
use crate::engine::storage::{new_column, TypeErasedColumn};
use crate::engine::types::DataTypeId;


/// Any type that can be stored by the ECS as a component, relation or resource.
pub trait Data: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Data for T {}

/// Factory producing an empty column for a registered type.
pub type ColumnFactory = fn() -> Box<dyn TypeErasedColumn>;

/// What a registered data type is used for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataKind {
    /// Stored in dense tables, one value per entity.
    Component,

    /// Stored in sparse relation tables, one value per entity pair.
    Relation(RelationKind),

    /// A single world-wide value.
    Resource,
}

/// Runtime descriptor of a registered type.
///
/// ## Notes
/// `size` and `align` are informational; allocation happens through the column
/// factory, which carries the type's move and drop behaviour.

#[derive(Clone, Debug)]
pub struct DataTypeDesc {
    /// Type name, as reported by `std::any::type_name`.
    pub name: &'static str,

    /// Rust type identity.
    pub type_id: TypeId,

    /// Size of a value in bytes.
    pub size: usize,

    /// Alignment of a value in bytes.
    pub align: usize,

    /// How the type is stored.
    pub kind: DataKind,

    factory: ColumnFactory,
}

impl DataTypeDesc {
    /// Builds the descriptor of `T`.
    pub fn of<T: Data>(kind: DataKind) -> Self {
        Self {
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            kind,
            factory: new_column::<T>,
        }
    }

    /// Allocates an empty column for this type.
    pub fn new_column(&self) -> Box<dyn TypeErasedColumn> {
        (self.factory)()
    }
}

/// Registry of every data type known to a world.

#[derive(Default)]
pub struct TypeRegistry {
    descs: Vec<DataTypeDesc>,
    by_type: HashMap<TypeId, DataTypeId>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Registers `T` with the given kind and returns its id.
    ///
    /// Re-registering a type keeps the previous id and replaces the descriptor.
    pub fn register<T: Data>(&mut self, kind: DataKind) -> DataTypeId {
        let desc = DataTypeDesc::of::<T>(kind);
        if let Some(&id) = self.by_type.get(&desc.type_id) {
            warn!(type_name = desc.name, ?kind, "data type registered twice, replacing its descriptor");
            self.descs[id.index()] = desc;
            return id;
        }

        let id = DataTypeId(self.descs.len() as u32);
        debug!(type_name = desc.name, ?kind, id = id.0, "registered data type");
        self.by_type.insert(desc.type_id, id);
        self.descs.push(desc);
        id
    }

    /// Returns the id of `T`, if registered.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<DataTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the id associated with a `TypeId`, if registered.
    #[inline]
    pub fn id_of_type(&self, type_id: TypeId) -> Option<DataTypeId> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the id of `T`.
    ///
    /// ## Panics
    /// Panics if `T` was never registered. Typed operations on unregistered
    /// types are programmer errors.
    pub fn expect_id<T: 'static>(&self) -> DataTypeId {
        match self.id_of::<T>() {
            Some(id) => id,
            None => panic!("type `{}` is not registered", type_name::<T>()),
        }
    }

    /// Returns the descriptor of a registered type.
    #[inline]
    pub fn desc(&self, id: DataTypeId) -> Option<&DataTypeDesc> {
        self.descs.get(id.index())
    }

    /// Returns the name of a registered type, or `"<unregistered>"`.
    pub fn name(&self, id: DataTypeId) -> &'static str {
        self.desc(id).map_or("<unregistered>", |desc| desc.name)
    }

    /// Returns `true` if `id` is a component type.
    pub fn is_component(&self, id: DataTypeId) -> bool {
        matches!(self.desc(id).map(|d| d.kind), Some(DataKind::Component))
    }

    /// Returns `true` if `id` is a relation type.
    pub fn is_relation(&self, id: DataTypeId) -> bool {
        self.relation_kind(id).is_some()
    }

    /// Returns `true` if `id` is a resource type.
    pub fn is_resource(&self, id: DataTypeId) -> bool {
        matches!(self.desc(id).map(|d| d.kind), Some(DataKind::Resource))
    }

    /// Returns the relation kind of `id`, if it is a relation type.
    pub fn relation_kind(&self, id: DataTypeId) -> Option<RelationKind> {
        match self.desc(id)?.kind {
            DataKind::Relation(kind) => Some(kind),
            _ => None,
        }
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize { self.descs.len() }

    /// Returns `true` if no types are registered.
    pub fn is_empty(&self) -> bool { self.descs.is_empty() }

    /// Iterates over every registered type.
    pub fn iter(&self) -> impl Iterator<Item = (DataTypeId, &DataTypeDesc)> + '_ {
        self.descs.iter().enumerate().map(|(i, d)| (DataTypeId(i as u32), d))
    }
}
