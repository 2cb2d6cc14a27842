//! Core identifier types used throughout the ECS.
//!
//! This module defines the small, `Copy` identifiers that the storage engine,
//! query engine and scheduler pass around:
//!
//! * [`DataTypeId`]: a registered component, relation or resource type,
//! * [`ColumnId`]: a typed column slot, packed into 64 bits,
//! * [`ArchetypeId`]: an interned set of columns,
//! * [`SparseRelationTableId`]: the key of a sparse relation table,
//! * [`ObserverId`] and [`SystemId`]: handles into the observer and system lists.
//!
//! ## Sentinels
//! [`ArchetypeId::INVALID`] and [`ColumnId::INVALID`] never match any query and
//! must short-circuit every lookup that receives them.

use std::fmt;

/// Row index inside a dense or sparse table.
pub type RowIndex = usize;

/// Raw entity slot index.
pub type EntityIndex = u32;

/// Generation counter of an entity slot.
pub type Generation = u32;

/// Identifier of a registered data type (component, relation or resource).
///
/// Assigned sequentially by the type registry and stable for the lifetime of
/// the owning world.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct DataTypeId(pub u32);

impl DataTypeId {
    /// Sentinel for a type that was never registered.
    pub const INVALID: DataTypeId = DataTypeId(u32::MAX);

    /// Returns the position of this type inside the registry.
    #[inline]
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Identifier of a dense column: `(DataTypeId, index)` packed into 64 bits.
///
/// ## Layout
/// The upper 32 bits hold the data type, the lower 32 bits the slot index. The
/// slot index distinguishes multiple same-typed columns; plain components always
/// use index `0`.
///
/// Ordering follows the packed value, so sorting a column set groups columns of
/// the same type together.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(u64);

impl ColumnId {
    /// Sentinel column which is never present in any archetype.
    pub const INVALID: ColumnId = ColumnId(u64::MAX);

    /// Packs a data type and slot index into a column identifier.
    #[inline]
    pub const fn make(data_type: DataTypeId, index: u32) -> Self {
        ColumnId(((data_type.0 as u64) << 32) | index as u64)
    }

    /// Returns the column of the given data type at slot `0`.
    #[inline]
    pub const fn of(data_type: DataTypeId) -> Self { Self::make(data_type, 0) }

    /// Returns the data type stored in this column.
    #[inline]
    pub const fn data_type(self) -> DataTypeId { DataTypeId((self.0 >> 32) as u32) }

    /// Returns the slot index of this column.
    #[inline]
    pub const fn index(self) -> u32 { self.0 as u32 }

    /// Returns the packed representation.
    #[inline]
    pub const fn inner(self) -> u64 { self.0 }

    /// Returns `true` unless this is [`ColumnId::INVALID`].
    #[inline]
    pub fn is_valid(self) -> bool { self != Self::INVALID }
}

impl fmt::Debug for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ColumnId({}:{})", self.data_type().0, self.index())
        } else {
            write!(f, "ColumnId(invalid)")
        }
    }
}

/// Identifier of an interned set of columns.
///
/// `EMPTY` is always the archetype with no columns; `INVALID` is the archetype of
/// reserved or dead entity slots and never matches anything.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// The archetype with no columns.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    /// Sentinel archetype for slots that don't hold a live entity.
    pub const INVALID: ArchetypeId = ArchetypeId(u32::MAX);

    /// Returns the position of this archetype in the graph's node list.
    #[inline]
    pub fn index(self) -> usize { self.0 as usize }

    /// Returns `true` unless this is [`ArchetypeId::INVALID`].
    #[inline]
    pub fn is_valid(self) -> bool { self != Self::INVALID }
}

/// Key of a sparse relation table.
///
/// A table holds every `(from, to)` pair of one relation type where the `from`
/// entity currently lives in archetype `from` and the `to` entity in archetype
/// `to`. Tree relations additionally split rows by `depth`; every other kind
/// always uses depth `0`.
///
/// Equality and hashing cover all four fields, depth included. Two tables that
/// differ only by depth are distinct tables.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SparseRelationTableId {
    /// Relation type stored in the table.
    pub data_type: DataTypeId,

    /// Archetype of every `from` entity in the table.
    pub from: ArchetypeId,

    /// Archetype of every `to` entity in the table.
    pub to: ArchetypeId,

    /// Tree depth of the rows in the table.
    pub depth: u32,
}

impl SparseRelationTableId {
    /// Builds a table identifier.
    #[inline]
    pub fn new(data_type: DataTypeId, from: ArchetypeId, to: ArchetypeId, depth: u32) -> Self {
        Self { data_type, from, to, depth }
    }

    /// Returns the same identifier with a different depth.
    #[inline]
    pub fn with_depth(self, depth: u32) -> Self {
        Self { depth, ..self }
    }
}

/// Handle of a registered observer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ObserverId(pub usize);

/// Handle of a registered system.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SystemId(pub usize);
