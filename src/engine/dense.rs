//! Dense tables: columnar row storage for the entities of one archetype.
//!
//! A [`DenseTable`] holds one type-erased column per [`ColumnId`] of its
//! archetype plus the list of entities occupying each row. Row *i* of every
//! column belongs to `entities[i]`.
//!
//! ## Structural operations
//! * [`DenseTable::insert`] appends a full row.
//! * [`DenseTable::swap_erase`] drops a row, moving the last row into the hole.
//! * [`DenseTable::swap_move`] moves a row into another table. Shared columns
//!   are moved, columns the destination lacks are dropped and columns only the
//!   destination has are filled from the supplied values.
//!
//! The swap operations report which entity changed row, so the caller can update
//! the entity pool.
//!
//! ## Invariants
//! - Every column has exactly `entities.len()` rows.
//! - `columns` is sorted by column id and matches the archetype's column set.

use std::any::Any;

use tracing::debug;

use crate::engine::archetype::ArchetypeGraph;
use crate::engine::entity::Entity;
use crate::engine::registry::TypeRegistry;
use crate::engine::storage::{downcast, downcast_mut, Column, TypeErasedColumn};
use crate::engine::types::{ArchetypeId, ColumnId, RowIndex};


/// A boxed value destined for a column.
pub type ColumnValue = (ColumnId, Box<dyn Any + Send>);

/// Row storage for a single archetype.

pub struct DenseTable {
    archetype: ArchetypeId,
    entities: Vec<Entity>,
    columns: Vec<(ColumnId, Box<dyn TypeErasedColumn>)>,
}

impl DenseTable {
    /// Creates an empty table with the given columns.
    pub fn new(archetype: ArchetypeId, mut columns: Vec<(ColumnId, Box<dyn TypeErasedColumn>)>) -> Self {
        columns.sort_unstable_by_key(|(id, _)| *id);
        Self { archetype, entities: Vec::new(), columns }
    }

    /// Returns the archetype stored by this table.
    #[inline]
    pub fn archetype(&self) -> ArchetypeId { self.archetype }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize { self.entities.len() }

    /// Returns `true` if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool { self.entities.is_empty() }

    /// Returns the entity at `row`.
    ///
    /// ## Panics
    /// Panics if `row` is out of range.
    #[inline]
    pub fn entity(&self, row: RowIndex) -> Entity {
        match self.entities.get(row) {
            Some(&entity) => entity,
            None => panic!("row {row} out of range for table of {} rows", self.entities.len()),
        }
    }

    /// Returns every entity, in row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] { &self.entities }

    /// Returns the ids of this table's columns, sorted.
    pub fn column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.columns.iter().map(|(id, _)| *id)
    }

    /// Returns the type-erased column `id`.
    pub fn column(&self, id: ColumnId) -> Option<&dyn TypeErasedColumn> {
        self.position(id).map(|i| self.columns[i].1.as_ref())
    }

    /// Returns the type-erased column `id` mutably.
    pub fn column_mut(&mut self, id: ColumnId) -> Option<&mut dyn TypeErasedColumn> {
        self.position(id).map(|i| self.columns[i].1.as_mut())
    }

    /// Returns column `id` downcast to `Column<T>`.
    pub fn typed_column<T: Send + Sync + 'static>(&self, id: ColumnId) -> Option<&Column<T>> {
        self.column(id).and_then(downcast::<T>)
    }

    /// Returns column `id` downcast to `Column<T>`, mutably.
    pub fn typed_column_mut<T: Send + Sync + 'static>(&mut self, id: ColumnId) -> Option<&mut Column<T>> {
        self.column_mut(id).and_then(downcast_mut::<T>)
    }

    /// Appends a row for `entity` with one value per column.
    ///
    /// ## Panics
    /// Panics if a value targets a column the table doesn't have, has the wrong
    /// type, or if a column is left without a value.
    pub fn insert(&mut self, entity: Entity, values: Vec<ColumnValue>) -> RowIndex {
        let row = self.entities.len();
        for (id, value) in values {
            let Some(position) = self.position(id) else {
                panic!("table of archetype {:?} has no column {id:?}", self.archetype);
            };
            if let Err(error) = self.columns[position].1.push_dyn(value) {
                panic!("failed to insert into column {id:?}: {error}");
            }
        }
        self.entities.push(entity);
        self.assert_packed();
        row
    }

    /// Drops row `row`, moving the last row into its place.
    ///
    /// Returns the entity that now occupies `row`, if one was moved.
    pub fn swap_erase(&mut self, row: RowIndex) -> Option<Entity> {
        assert!(row < self.entities.len(), "row {row} out of range for table of {} rows", self.entities.len());
        for (_, column) in &mut self.columns {
            column.swap_remove_dyn(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Moves row `row` to the end of `dst`.
    ///
    /// Columns present in both tables are moved. Columns missing from `dst` are
    /// dropped. Columns missing from this table are filled from `extra`.
    ///
    /// Returns the new row in `dst` and the entity that now occupies `row` here,
    /// if one was moved.
    ///
    /// ## Panics
    /// Panics if `dst` has a column that neither this table nor `extra` provides.
    pub fn swap_move(&mut self, row: RowIndex, dst: &mut DenseTable, extra: Vec<ColumnValue>) -> (RowIndex, Option<Entity>) {
        assert!(row < self.entities.len(), "row {row} out of range for table of {} rows", self.entities.len());
        let entity = self.entities[row];
        let new_row = dst.entities.len();

        for (id, column) in &mut self.columns {
            match dst.position(*id) {
                Some(position) => {
                    if let Err(error) = column.swap_move_dyn(row, dst.columns[position].1.as_mut()) {
                        panic!("failed to move column {id:?}: {error}");
                    }
                }
                None => column.swap_remove_dyn(row),
            }
        }

        for (id, value) in extra {
            if self.position(id).is_some() {
                continue;
            }
            let Some(position) = dst.position(id) else {
                panic!("table of archetype {:?} has no column {id:?}", dst.archetype);
            };
            if let Err(error) = dst.columns[position].1.push_dyn(value) {
                panic!("failed to insert into column {id:?}: {error}");
            }
        }

        self.entities.swap_remove(row);
        dst.entities.push(entity);
        dst.assert_packed();
        (new_row, self.entities.get(row).copied())
    }

    #[inline]
    fn position(&self, id: ColumnId) -> Option<usize> {
        self.columns.binary_search_by_key(&id, |(c, _)| *c).ok()
    }

    fn assert_packed(&self) {
        for (id, column) in &self.columns {
            assert!(
                column.len() == self.entities.len(),
                "column {id:?} has {} rows but the table has {} entities",
                column.len(),
                self.entities.len()
            );
        }
    }
}

/// Dense tables of every archetype, created lazily.

#[derive(Default)]
pub struct DenseTableRegistry {
    tables: Vec<Option<DenseTable>>,
}

impl DenseTableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Returns the table of `archetype`, creating it if needed.
    pub fn create(&mut self, archetype: ArchetypeId, graph: &ArchetypeGraph, types: &TypeRegistry) -> &mut DenseTable {
        assert!(graph.is_valid(archetype), "cannot create a table for archetype {archetype:?}");
        let index = archetype.index();
        if self.tables.len() <= index {
            self.tables.resize_with(index + 1, || None);
        }

        self.tables[index].get_or_insert_with(|| {
            let columns = graph
                .columns(archetype)
                .iter()
                .map(|&id| {
                    let Some(desc) = types.desc(id.data_type()) else {
                        panic!("column {id:?} refers to an unregistered type");
                    };
                    (id, desc.new_column())
                })
                .collect();
            debug!(archetype = archetype.0, "created dense table");
            DenseTable::new(archetype, columns)
        })
    }

    /// Returns the table of `archetype`, if it was created.
    #[inline]
    pub fn get(&self, archetype: ArchetypeId) -> Option<&DenseTable> {
        self.tables.get(archetype.index()).and_then(Option::as_ref)
    }

    /// Returns the table of `archetype` mutably, if it was created.
    #[inline]
    pub fn get_mut(&mut self, archetype: ArchetypeId) -> Option<&mut DenseTable> {
        self.tables.get_mut(archetype.index()).and_then(Option::as_mut)
    }

    /// Returns two distinct tables mutably.
    ///
    /// ## Panics
    /// Panics if `a == b` or if either table doesn't exist.
    pub fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut DenseTable, &mut DenseTable) {
        assert!(a != b, "cannot borrow the table of {a:?} twice");

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.tables.split_at_mut(high.index());
        let (Some(left), Some(right)) = (head[low.index()].as_mut(), tail[0].as_mut()) else {
            panic!("tables of {a:?} and {b:?} must exist before moving rows");
        };

        if a < b { (left, right) } else { (right, left) }
    }

    /// Iterates over every created table.
    pub fn iter(&self) -> impl Iterator<Item = &DenseTable> + '_ {
        self.tables.iter().flatten()
    }
}
