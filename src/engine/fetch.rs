//! # Query Terms
//!
//! Typed descriptions of what a query reads from each matched row.
//!
//! ## Purpose
//! A query is parameterized by a *data* type `D` (what each row yields) and a
//! *filter* type `F` (which archetypes qualify). Both are built from small
//! building blocks implemented here:
//!
//! | term               | yields            | requires column | access |
//! |--------------------|-------------------|-----------------|--------|
//! | `Entity`           | the row's entity  | no              | none   |
//! | `&T`               | `&T`              | yes             | read   |
//! | `&mut T`           | `&mut T`          | yes             | write  |
//! | `Option<&T>`       | `Option<&T>`      | no              | read   |
//! | `Option<&mut T>`   | `Option<&mut T>`  | no              | write  |
//! | `With<T>`          | `()`              | yes             | none   |
//! | `Without<T>`       | `()`              | must be absent  | none   |
//!
//! Tuples of up to eight terms combine them.
//!
//! ## Design
//! Resolution happens in three steps:
//! 1. `init` resolves the column ids once and records the access footprint.
//! 2. `fetch` binds the resolved columns of one dense table.
//! 3. `item` reads one row from the bound columns.
//!
//! ## Invariants
//! `item` hands out `&mut T` through a shared table borrow. Callers must make
//! sure that each row is yielded at most once while the items are alive, and
//! that no other system accesses the same column concurrently. The scheduler
//! guarantees the latter through [`SystemAccess`].

use std::any::type_name;
use std::marker::PhantomData;

use crate::engine::access::SystemAccess;
use crate::engine::archetype::ArchetypeGraph;
use crate::engine::dense::DenseTable;
use crate::engine::entity::Entity;
use crate::engine::registry::Data;
use crate::engine::storage::Column;
use crate::engine::types::{ArchetypeId, ColumnId, RowIndex};
use crate::engine::world::World;


/// Column constraints collected from the terms of a query.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Terms {
    /// Columns every matched archetype must contain.
    pub with: Vec<ColumnId>,

    /// Columns no matched archetype may contain.
    pub without: Vec<ColumnId>,
}

impl Terms {
    /// Sorts and deduplicates both lists.
    pub fn normalize(&mut self) {
        self.with.sort_unstable();
        self.with.dedup();
        self.without.sort_unstable();
        self.without.dedup();
    }

    /// Returns `true` if `archetype` satisfies the constraints.
    pub fn matches(&self, graph: &ArchetypeGraph, archetype: ArchetypeId) -> bool {
        graph.is_valid(archetype)
            && self.with.iter().all(|&c| graph.contains(archetype, c))
            && !self.without.iter().any(|&c| graph.contains(archetype, c))
    }
}

/// Something a query can read from each matched row.

pub trait QueryData {
    /// Resolved column ids.
    type State: Send + Sync + 'static;

    /// Columns of one table bound for reading.
    type Fetch<'w>;

    /// What one row yields.
    type Item<'w>;

    /// Resolves the term against `world` and records its access.
    ///
    /// ## Panics
    /// Panics if a referenced type isn't a registered component.
    fn init(world: &World, access: &mut SystemAccess) -> Self::State;

    /// Adds the term's column constraints to `terms`.
    fn terms(state: &Self::State, terms: &mut Terms);

    /// Binds the columns of `table`.
    ///
    /// ## Panics
    /// Panics if `table` lacks a required column.
    fn fetch<'w>(state: &Self::State, table: &'w DenseTable) -> Self::Fetch<'w>;

    /// Reads `row` from the bound columns.
    ///
    /// ## Safety
    /// `row` must be in range and no other live reference may alias a row
    /// yielded mutably.
    unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w>;
}

/// A [`QueryData`] that only hands out shared references.
///
/// Items of read-only terms may coexist freely, so iterators over them can be
/// collected or interleaved.
///
/// ## Safety
/// `item` must never yield a mutable reference.
pub unsafe trait ReadOnlyQueryData: QueryData {}

/// Something that restricts which archetypes a query visits.

pub trait QueryFilter {
    /// Resolved column ids.
    type State: Send + Sync + 'static;

    /// Resolves the filter against `world`.
    fn init(world: &World) -> Self::State;

    /// Adds the filter's column constraints to `terms`.
    fn terms(state: &Self::State, terms: &mut Terms);
}

/// Requires component `T` without reading it.
pub struct With<T>(PhantomData<fn() -> T>);

/// Excludes archetypes containing component `T`.
pub struct Without<T>(PhantomData<fn() -> T>);

/// Resolves the column of component `T`.
///
/// ## Panics
/// Panics if `T` isn't a registered component.
pub fn component_column<T: 'static>(world: &World) -> ColumnId {
    match world.types().id_of::<T>() {
        Some(id) if world.types().is_component(id) => ColumnId::of(id),
        _ => panic!("`{}` is not a registered component", type_name::<T>()),
    }
}

fn bind<'w, T: Data>(table: &'w DenseTable, column: ColumnId) -> &'w Column<T> {
    match table.typed_column::<T>(column) {
        Some(column) => column,
        None => panic!("archetype {:?} has no `{}` column", table.archetype(), type_name::<T>()),
    }
}

impl QueryData for Entity {
    type State = ();
    type Fetch<'w> = &'w [Entity];
    type Item<'w> = Entity;

    fn init(_world: &World, _access: &mut SystemAccess) {}

    fn terms(_state: &(), _terms: &mut Terms) {}

    fn fetch<'w>(_state: &(), table: &'w DenseTable) -> &'w [Entity] {
        table.entities()
    }

    unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w> {
        fetch[row]
    }
}

impl<T: Data> QueryData for &T {
    type State = ColumnId;
    type Fetch<'w> = &'w Column<T>;
    type Item<'w> = &'w T;

    fn init(world: &World, access: &mut SystemAccess) -> ColumnId {
        let column = component_column::<T>(world);
        access.read_component(column.data_type());
        column
    }

    fn terms(state: &ColumnId, terms: &mut Terms) {
        terms.with.push(*state);
    }

    fn fetch<'w>(state: &ColumnId, table: &'w DenseTable) -> &'w Column<T> {
        bind::<T>(table, *state)
    }

    unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w> {
        let column: &'w Column<T> = *fetch;
        column.get(row)
    }
}

impl<T: Data> QueryData for &mut T {
    type State = ColumnId;
    type Fetch<'w> = &'w Column<T>;
    type Item<'w> = &'w mut T;

    fn init(world: &World, access: &mut SystemAccess) -> ColumnId {
        let column = component_column::<T>(world);
        access.write_component(column.data_type());
        column
    }

    fn terms(state: &ColumnId, terms: &mut Terms) {
        terms.with.push(*state);
    }

    fn fetch<'w>(state: &ColumnId, table: &'w DenseTable) -> &'w Column<T> {
        bind::<T>(table, *state)
    }

    unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w> {
        let column: &'w Column<T> = *fetch;
        // SAFETY: forwarded to the caller.
        unsafe { column.get_unchecked_mut(row) }
    }
}

impl<T: Data> QueryData for Option<&T> {
    type State = ColumnId;
    type Fetch<'w> = Option<&'w Column<T>>;
    type Item<'w> = Option<&'w T>;

    fn init(world: &World, access: &mut SystemAccess) -> ColumnId {
        let column = component_column::<T>(world);
        access.read_component(column.data_type());
        column
    }

    fn terms(_state: &ColumnId, _terms: &mut Terms) {}

    fn fetch<'w>(state: &ColumnId, table: &'w DenseTable) -> Option<&'w Column<T>> {
        table.typed_column::<T>(*state)
    }

    unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w> {
        fetch.map(|column| column.get(row))
    }
}

impl<T: Data> QueryData for Option<&mut T> {
    type State = ColumnId;
    type Fetch<'w> = Option<&'w Column<T>>;
    type Item<'w> = Option<&'w mut T>;

    fn init(world: &World, access: &mut SystemAccess) -> ColumnId {
        let column = component_column::<T>(world);
        access.write_component(column.data_type());
        column
    }

    fn terms(_state: &ColumnId, _terms: &mut Terms) {}

    fn fetch<'w>(state: &ColumnId, table: &'w DenseTable) -> Option<&'w Column<T>> {
        table.typed_column::<T>(*state)
    }

    unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w> {
        // SAFETY: forwarded to the caller.
        fetch.map(|column| unsafe { column.get_unchecked_mut(row) })
    }
}

impl<T: Data> QueryData for With<T> {
    type State = ColumnId;
    type Fetch<'w> = ();
    type Item<'w> = ();

    fn init(world: &World, _access: &mut SystemAccess) -> ColumnId {
        component_column::<T>(world)
    }

    fn terms(state: &ColumnId, terms: &mut Terms) {
        terms.with.push(*state);
    }

    fn fetch<'w>(_state: &ColumnId, _table: &'w DenseTable) {}

    unsafe fn item<'w>(_fetch: &Self::Fetch<'w>, _row: RowIndex) -> Self::Item<'w> {}
}

impl<T: Data> QueryData for Without<T> {
    type State = ColumnId;
    type Fetch<'w> = ();
    type Item<'w> = ();

    fn init(world: &World, _access: &mut SystemAccess) -> ColumnId {
        component_column::<T>(world)
    }

    fn terms(state: &ColumnId, terms: &mut Terms) {
        terms.without.push(*state);
    }

    fn fetch<'w>(_state: &ColumnId, _table: &'w DenseTable) {}

    unsafe fn item<'w>(_fetch: &Self::Fetch<'w>, _row: RowIndex) -> Self::Item<'w> {}
}

// SAFETY: none of these terms yields a mutable reference.
unsafe impl ReadOnlyQueryData for Entity {}
unsafe impl<T: Data> ReadOnlyQueryData for &T {}
unsafe impl<T: Data> ReadOnlyQueryData for Option<&T> {}
unsafe impl<T: Data> ReadOnlyQueryData for With<T> {}
unsafe impl<T: Data> ReadOnlyQueryData for Without<T> {}

impl<T: Data> QueryFilter for With<T> {
    type State = ColumnId;

    fn init(world: &World) -> ColumnId {
        component_column::<T>(world)
    }

    fn terms(state: &ColumnId, terms: &mut Terms) {
        terms.with.push(*state);
    }
}

impl<T: Data> QueryFilter for Without<T> {
    type State = ColumnId;

    fn init(world: &World) -> ColumnId {
        component_column::<T>(world)
    }

    fn terms(state: &ColumnId, terms: &mut Terms) {
        terms.without.push(*state);
    }
}

macro_rules! impl_query_tuple {
    ($($T:ident $s:ident),*) => {
        #[allow(unused_variables, clippy::unused_unit)]
        impl<$($T: QueryData),*> QueryData for ($($T,)*) {
            type State = ($($T::State,)*);
            type Fetch<'w> = ($($T::Fetch<'w>,)*);
            type Item<'w> = ($($T::Item<'w>,)*);

            fn init(world: &World, access: &mut SystemAccess) -> Self::State {
                ($({
                    let mut own = SystemAccess::new();
                    let state = $T::init(world, &mut own);
                    access.merge(&own, world.types());
                    state
                },)*)
            }

            fn terms(state: &Self::State, terms: &mut Terms) {
                let ($($s,)*) = state;
                $($T::terms($s, terms);)*
            }

            fn fetch<'w>(state: &Self::State, table: &'w DenseTable) -> Self::Fetch<'w> {
                let ($($s,)*) = state;
                ($($T::fetch($s, table),)*)
            }

            unsafe fn item<'w>(fetch: &Self::Fetch<'w>, row: RowIndex) -> Self::Item<'w> {
                let ($($s,)*) = fetch;
                // SAFETY: forwarded to the caller.
                ($(unsafe { $T::item($s, row) },)*)
            }
        }

        // SAFETY: every element is read-only.
        unsafe impl<$($T: ReadOnlyQueryData),*> ReadOnlyQueryData for ($($T,)*) {}

        #[allow(unused_variables, clippy::unused_unit)]
        impl<$($T: QueryFilter),*> QueryFilter for ($($T,)*) {
            type State = ($($T::State,)*);

            fn init(world: &World) -> Self::State {
                ($($T::init(world),)*)
            }

            fn terms(state: &Self::State, terms: &mut Terms) {
                let ($($s,)*) = state;
                $($T::terms($s, terms);)*
            }
        }
    };
}

impl_query_tuple!();
impl_query_tuple!(A a);
impl_query_tuple!(A a, B b);
impl_query_tuple!(A a, B b, C c);
impl_query_tuple!(A a, B b, C c, D d);
impl_query_tuple!(A a, B b, C c, D d, E e);
impl_query_tuple!(A a, B b, C c, D d, E e, F f);
impl_query_tuple!(A a, B b, C c, D d, E e, F f, G g);
impl_query_tuple!(A a, B b, C c, D d, E e, F f, G g, H h);
