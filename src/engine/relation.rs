//! # Sparse Relation Storage
//!
//! Relations are typed edges between two entities. Every relation instance is
//! a row `(from, to, value)` in a [`SparseRelationTable`], where the table is
//! chosen by the relation type, the archetypes of both endpoints and, for tree
//! relations, the depth of the edge.
//!
//! ## Table layout
//! Each table keeps:
//! - `rows`: endpoints plus two intrusive links per row,
//! - `values`: a type-erased column holding the relation values, row-aligned,
//! - `pairs`: an index from `(from, to)` to row,
//! - `from_lists` / `to_lists`: per-entity doubly linked lists threading
//!   through `rows`, so all relations of an entity can be walked or removed
//!   without scanning the table.
//!
//! Rows are removed with swap-remove; the row that fills the hole is relinked
//! in place.
//!
//! ## Invariants
//! - At most one row per `(from, to)` pair.
//! - `values.len() == rows.len()`.
//! - An entity has a `from_lists` entry iff it is the `from` of at least one row,
//!   and likewise for `to_lists`.

use std::any::Any;
use std::collections::HashMap;

use tracing::debug;

use crate::engine::registry::TypeRegistry;
use crate::engine::storage::{downcast, downcast_mut, Column, TypeErasedColumn};
use crate::engine::types::{ArchetypeId, DataTypeId, EntityIndex, RowIndex, SparseRelationTableId};


/// How a relation type behaves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum RelationKind {
    /// A directed edge; any number per entity.
    #[default]
    Normal,

    /// `(a, b)` and `(b, a)` are the same edge. Stored with
    /// `from.index <= to.index`.
    Symmetric,

    /// Each entity has at most one outgoing edge. Edges are split into tables
    /// by their depth in the resulting forest.
    Tree,

    /// Dropped instead of moved whenever either endpoint changes archetype.
    Ephemeral,
}

impl RelationKind {
    /// Returns `true` for [`RelationKind::Symmetric`].
    #[inline]
    pub fn is_symmetric(self) -> bool { self == RelationKind::Symmetric }

    /// Returns `true` for [`RelationKind::Tree`].
    #[inline]
    pub fn is_tree(self) -> bool { self == RelationKind::Tree }

    /// Returns `true` for [`RelationKind::Ephemeral`].
    #[inline]
    pub fn is_ephemeral(self) -> bool { self == RelationKind::Ephemeral }
}

const NONE: RowIndex = RowIndex::MAX;

#[derive(Clone, Copy, Debug)]
struct Link {
    prev: RowIndex,
    next: RowIndex,
}

impl Link {
    const DETACHED: Link = Link { prev: NONE, next: NONE };
}

#[derive(Clone, Copy, Debug)]
struct Row {
    from: EntityIndex,
    to: EntityIndex,
    from_link: Link,
    to_link: Link,
}

#[derive(Clone, Copy, Debug)]
struct List {
    first: RowIndex,
    last: RowIndex,
}

#[derive(Clone, Copy)]
enum Side {
    From,
    To,
}

/// Storage for every relation of one type between two fixed archetypes.

pub struct SparseRelationTable {
    rows: Vec<Row>,
    values: Box<dyn TypeErasedColumn>,
    pairs: HashMap<(EntityIndex, EntityIndex), RowIndex>,
    from_lists: HashMap<EntityIndex, List>,
    to_lists: HashMap<EntityIndex, List>,
}

impl SparseRelationTable {
    /// Creates an empty table storing values in `values`.
    pub fn new(values: Box<dyn TypeErasedColumn>) -> Self {
        assert!(values.is_empty(), "relation tables must start from an empty column");
        Self {
            rows: Vec::new(),
            values,
            pairs: HashMap::new(),
            from_lists: HashMap::new(),
            to_lists: HashMap::new(),
        }
    }

    /// Returns the number of relations stored.
    #[inline]
    pub fn len(&self) -> usize { self.rows.len() }

    /// Returns `true` if the table stores no relations.
    #[inline]
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    /// Inserts the relation `from -> to`, replacing any existing value.
    ///
    /// Returns `true` if the pair was already present.
    ///
    /// ## Panics
    /// Panics if `value` doesn't match the table's value type.
    pub fn insert(&mut self, from: EntityIndex, to: EntityIndex, value: Box<dyn Any + Send>) -> bool {
        let replaced = self.erase(from, to);

        let row = self.rows.len();
        if let Err(error) = self.values.push_dyn(value) {
            panic!("failed to insert relation value: {error}");
        }
        self.rows.push(Row { from, to, from_link: Link::DETACHED, to_link: Link::DETACHED });
        self.pairs.insert((from, to), row);
        self.link(row, Side::From);
        self.link(row, Side::To);
        replaced
    }

    /// Removes the relation `from -> to`. Returns `false` if it didn't exist.
    pub fn erase(&mut self, from: EntityIndex, to: EntityIndex) -> bool {
        match self.pairs.get(&(from, to)) {
            Some(&row) => {
                drop(self.remove_row(row));
                true
            }
            None => false,
        }
    }

    /// Removes every relation whose `from` is `index`. Returns how many were removed.
    pub fn erase_from(&mut self, index: EntityIndex) -> usize {
        let mut count = 0;
        while let Some(row) = self.first_from(index) {
            drop(self.remove_row(row));
            count += 1;
        }
        count
    }

    /// Removes every relation whose `to` is `index`. Returns how many were removed.
    pub fn erase_to(&mut self, index: EntityIndex) -> usize {
        let mut count = 0;
        while let Some(row) = self.first_to(index) {
            drop(self.remove_row(row));
            count += 1;
        }
        count
    }

    /// Moves every relation whose `from` is `index` into `other`.
    ///
    /// Returns the `to` indices of the moved relations.
    pub fn move_from(&mut self, index: EntityIndex, other: &mut SparseRelationTable) -> Vec<EntityIndex> {
        let mut moved = Vec::new();
        while let Some(row) = self.first_from(index) {
            let (from, to) = self.indices(row);
            let value = self.remove_row(row);
            other.insert(from, to, value);
            moved.push(to);
        }
        moved
    }

    /// Moves every relation whose `to` is `index` into `other`.
    ///
    /// Returns the `from` indices of the moved relations.
    pub fn move_to(&mut self, index: EntityIndex, other: &mut SparseRelationTable) -> Vec<EntityIndex> {
        let mut moved = Vec::new();
        while let Some(row) = self.first_to(index) {
            let (from, to) = self.indices(row);
            let value = self.remove_row(row);
            other.insert(from, to, value);
            moved.push(from);
        }
        moved
    }

    /// Returns `true` if the relation `from -> to` is stored here.
    #[inline]
    pub fn contains(&self, from: EntityIndex, to: EntityIndex) -> bool {
        self.pairs.contains_key(&(from, to))
    }

    /// Returns the row of `from -> to`.
    #[inline]
    pub fn row(&self, from: EntityIndex, to: EntityIndex) -> Option<RowIndex> {
        self.pairs.get(&(from, to)).copied()
    }

    /// Returns the `(from, to)` indices stored at `row`.
    ///
    /// ## Panics
    /// Panics if `row` is out of range.
    #[inline]
    pub fn indices(&self, row: RowIndex) -> (EntityIndex, EntityIndex) {
        let r = self.row_at(row);
        (r.from, r.to)
    }

    /// Returns the first row whose `from` is `index`.
    #[inline]
    pub fn first_from(&self, index: EntityIndex) -> Option<RowIndex> {
        self.from_lists.get(&index).map(|list| list.first)
    }

    /// Returns the first row whose `to` is `index`.
    #[inline]
    pub fn first_to(&self, index: EntityIndex) -> Option<RowIndex> {
        self.to_lists.get(&index).map(|list| list.first)
    }

    /// Returns the next row sharing `row`'s `from`.
    #[inline]
    pub fn next_from(&self, row: RowIndex) -> Option<RowIndex> {
        Some(self.row_at(row).from_link.next).filter(|&next| next != NONE)
    }

    /// Returns the next row sharing `row`'s `to`.
    #[inline]
    pub fn next_to(&self, row: RowIndex) -> Option<RowIndex> {
        Some(self.row_at(row).to_link.next).filter(|&next| next != NONE)
    }

    /// Iterates over the rows whose `from` is `index`.
    pub fn rows_from(&self, index: EntityIndex) -> impl Iterator<Item = RowIndex> + '_ {
        std::iter::successors(self.first_from(index), move |&row| self.next_from(row))
    }

    /// Iterates over the rows whose `to` is `index`.
    pub fn rows_to(&self, index: EntityIndex) -> impl Iterator<Item = RowIndex> + '_ {
        std::iter::successors(self.first_to(index), move |&row| self.next_to(row))
    }

    /// Iterates over every `(row, from, to)`.
    pub fn iter(&self) -> impl Iterator<Item = (RowIndex, EntityIndex, EntityIndex)> + '_ {
        self.rows.iter().enumerate().map(|(i, r)| (i, r.from, r.to))
    }

    /// Returns the value column as `Column<T>`.
    pub fn values<T: Send + Sync + 'static>(&self) -> Option<&Column<T>> {
        downcast::<T>(self.values.as_ref())
    }

    /// Returns the value column as `Column<T>`, mutably.
    pub fn values_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut Column<T>> {
        downcast_mut::<T>(self.values.as_mut())
    }

    /// Returns the type-erased value column.
    pub fn values_dyn(&self) -> &dyn TypeErasedColumn {
        self.values.as_ref()
    }

    #[inline]
    fn row_at(&self, row: RowIndex) -> &Row {
        match self.rows.get(row) {
            Some(r) => r,
            None => panic!("row {row} out of range for relation table of {} rows", self.rows.len()),
        }
    }

    fn lists(&mut self, side: Side) -> &mut HashMap<EntityIndex, List> {
        match side {
            Side::From => &mut self.from_lists,
            Side::To => &mut self.to_lists,
        }
    }

    fn link_of(row: &mut Row, side: Side) -> &mut Link {
        match side {
            Side::From => &mut row.from_link,
            Side::To => &mut row.to_link,
        }
    }

    fn key_of(row: &Row, side: Side) -> EntityIndex {
        match side {
            Side::From => row.from,
            Side::To => row.to,
        }
    }

    fn link(&mut self, row: RowIndex, side: Side) {
        let key = Self::key_of(&self.rows[row], side);
        let list = *self.lists(side).entry(key).or_insert(List { first: row, last: NONE });

        if list.last == NONE {
            *Self::link_of(&mut self.rows[row], side) = Link::DETACHED;
            self.lists(side).insert(key, List { first: row, last: row });
        } else {
            Self::link_of(&mut self.rows[list.last], side).next = row;
            *Self::link_of(&mut self.rows[row], side) = Link { prev: list.last, next: NONE };
            self.lists(side).insert(key, List { first: list.first, last: row });
        }
    }

    fn unlink(&mut self, row: RowIndex, side: Side) {
        let key = Self::key_of(&self.rows[row], side);
        let Link { prev, next } = *Self::link_of(&mut self.rows[row], side);

        if prev != NONE {
            Self::link_of(&mut self.rows[prev], side).next = next;
        }
        if next != NONE {
            Self::link_of(&mut self.rows[next], side).prev = prev;
        }

        let lists = self.lists(side);
        let Some(list) = lists.get_mut(&key) else {
            panic!("relation row {row} is not linked");
        };
        if prev == NONE {
            list.first = next;
        }
        if next == NONE {
            list.last = prev;
        }
        if list.first == NONE {
            lists.remove(&key);
        }
        *Self::link_of(&mut self.rows[row], side) = Link::DETACHED;
    }

    /// Points every reference to row `old` at row `new`.
    fn relocate(&mut self, old: RowIndex, new: RowIndex, side: Side) {
        let key = Self::key_of(&self.rows[old], side);
        let Link { prev, next } = *Self::link_of(&mut self.rows[old], side);

        if prev != NONE {
            Self::link_of(&mut self.rows[prev], side).next = new;
        }
        if next != NONE {
            Self::link_of(&mut self.rows[next], side).prev = new;
        }

        let Some(list) = self.lists(side).get_mut(&key) else {
            panic!("relation row {old} is not linked");
        };
        if list.first == old {
            list.first = new;
        }
        if list.last == old {
            list.last = new;
        }
    }

    fn remove_row(&mut self, row: RowIndex) -> Box<dyn Any + Send> {
        assert!(row < self.rows.len(), "row {row} out of range for relation table of {} rows", self.rows.len());

        self.unlink(row, Side::From);
        self.unlink(row, Side::To);
        let removed = self.rows[row];
        self.pairs.remove(&(removed.from, removed.to));

        let last = self.rows.len() - 1;
        if row != last {
            self.relocate(last, row, Side::From);
            self.relocate(last, row, Side::To);
            let moved = self.rows[last];
            self.pairs.insert((moved.from, moved.to), row);
        }

        self.rows.swap_remove(row);
        self.values.take_dyn(row)
    }
}

/// Per-relation-type index over its tables.

#[derive(Default, Debug, Clone)]
pub struct TypeIndex {
    from: HashMap<ArchetypeId, Vec<SparseRelationTableId>>,
    to: HashMap<ArchetypeId, Vec<SparseRelationTableId>>,
    max_depth: u32,
}

impl TypeIndex {
    /// Tables whose `from` archetype is `archetype`.
    pub fn from(&self, archetype: ArchetypeId) -> &[SparseRelationTableId] {
        self.from.get(&archetype).map_or(&[], Vec::as_slice)
    }

    /// Tables whose `to` archetype is `archetype`.
    pub fn to(&self, archetype: ArchetypeId) -> &[SparseRelationTableId] {
        self.to.get(&archetype).map_or(&[], Vec::as_slice)
    }

    /// Deepest depth of any table ever created for the type.
    pub fn max_depth(&self) -> u32 { self.max_depth }

    fn insert(&mut self, id: SparseRelationTableId) {
        self.from.entry(id.from).or_default().push(id);
        self.to.entry(id.to).or_default().push(id);
        self.max_depth = self.max_depth.max(id.depth);
    }

    fn remove(&mut self, id: SparseRelationTableId) {
        for (map, key) in [(&mut self.from, id.from), (&mut self.to, id.to)] {
            if let Some(list) = map.get_mut(&key) {
                list.retain(|other| *other != id);
                if list.is_empty() {
                    map.remove(&key);
                }
            }
        }
    }
}

/// Every sparse relation table of a world.
///
/// ## Notes
/// `version` increases whenever the set of tables changes, so query caches can
/// tell when to refresh.

#[derive(Default)]
pub struct SparseRelationTableRegistry {
    tables: HashMap<SparseRelationTableId, SparseRelationTable>,
    ids: Vec<SparseRelationTableId>,
    types: HashMap<DataTypeId, TypeIndex>,
    version: u64,
}

impl SparseRelationTableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Returns the table `id`, creating it if needed.
    ///
    /// ## Panics
    /// Panics if the relation type isn't registered.
    pub fn create(&mut self, id: SparseRelationTableId, types: &TypeRegistry) -> &mut SparseRelationTable {
        if !self.tables.contains_key(&id) {
            let Some(desc) = types.desc(id.data_type) else {
                panic!("relation table {id:?} refers to an unregistered type");
            };
            debug!(relation = desc.name, from = id.from.0, to = id.to.0, depth = id.depth, "created relation table");
            self.tables.insert(id, SparseRelationTable::new(desc.new_column()));
            self.ids.push(id);
            self.types.entry(id.data_type).or_default().insert(id);
            self.version += 1;
        }

        match self.tables.get_mut(&id) {
            Some(table) => table,
            None => unreachable!("table {id:?} was just inserted"),
        }
    }

    /// Returns `true` if table `id` exists.
    #[inline]
    pub fn contains(&self, id: SparseRelationTableId) -> bool {
        self.tables.contains_key(&id)
    }

    /// Returns table `id`.
    #[inline]
    pub fn get(&self, id: SparseRelationTableId) -> Option<&SparseRelationTable> {
        self.tables.get(&id)
    }

    /// Returns table `id` mutably.
    #[inline]
    pub fn get_mut(&mut self, id: SparseRelationTableId) -> Option<&mut SparseRelationTable> {
        self.tables.get_mut(&id)
    }

    /// Returns the index of relation type `data_type`.
    #[inline]
    pub fn type_index(&self, data_type: DataTypeId) -> Option<&TypeIndex> {
        self.types.get(&data_type)
    }

    /// Returns the deepest table depth of `data_type`, `0` if it has no tables.
    pub fn max_depth(&self, data_type: DataTypeId) -> u32 {
        self.types.get(&data_type).map_or(0, TypeIndex::max_depth)
    }

    /// Returns every table id, in creation order.
    #[inline]
    pub fn ids(&self) -> &[SparseRelationTableId] { &self.ids }

    /// Returns the current structural version.
    #[inline]
    pub fn version(&self) -> u64 { self.version }

    /// Moves every row of `src` whose `from` is `index` into `dst`.
    ///
    /// Returns the `to` indices of the moved rows.
    pub fn move_from(&mut self, src: SparseRelationTableId, dst: SparseRelationTableId, index: EntityIndex, types: &TypeRegistry) -> Vec<EntityIndex> {
        self.move_rows(src, dst, types, |src, dst| src.move_from(index, dst))
    }

    /// Moves every row of `src` whose `to` is `index` into `dst`.
    ///
    /// Returns the `from` indices of the moved rows.
    pub fn move_to(&mut self, src: SparseRelationTableId, dst: SparseRelationTableId, index: EntityIndex, types: &TypeRegistry) -> Vec<EntityIndex> {
        self.move_rows(src, dst, types, |src, dst| src.move_to(index, dst))
    }

    /// Drops every empty table.
    ///
    /// Returns how many tables were removed.
    pub fn clean_up(&mut self) -> usize {
        let empty: Vec<_> = self.ids.iter().copied().filter(|id| self.tables[id].is_empty()).collect();
        for id in &empty {
            self.tables.remove(id);
            if let Some(index) = self.types.get_mut(&id.data_type) {
                index.remove(*id);
            }
        }
        self.ids.retain(|id| self.tables.contains_key(id));
        if !empty.is_empty() {
            debug!(removed = empty.len(), "cleaned up empty relation tables");
            self.version += 1;
        }
        empty.len()
    }

    fn move_rows<F>(&mut self, src: SparseRelationTableId, dst: SparseRelationTableId, types: &TypeRegistry, f: F) -> Vec<EntityIndex>
    where
        F: FnOnce(&mut SparseRelationTable, &mut SparseRelationTable) -> Vec<EntityIndex>,
    {
        if src == dst || !self.tables.contains_key(&src) {
            return Vec::new();
        }
        self.create(dst, types);

        let Some(mut source) = self.tables.remove(&src) else {
            return Vec::new();
        };
        let moved = match self.tables.get_mut(&dst) {
            Some(target) => f(&mut source, target),
            None => Vec::new(),
        };
        self.tables.insert(src, source);
        moved
    }
}
