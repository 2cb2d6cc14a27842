//! Typed query matching and iteration.
//!
//! This module provides the two query parameters systems use to read and
//! write entity data:
//!
//! * [`Query<D, F>`] visits every entity whose archetype satisfies the terms
//!   of `D` and `F`, yielding `D::Item` per entity.
//! * [`RelationQuery<R, A, B, T>`] visits every relation of type `R` whose
//!   `from` entity satisfies `A` and whose `to` entity satisfies `B`,
//!   yielding `(A::Item, &R, B::Item)` per relation.
//!
//! ## Matching
//! Matching is cached in the query state. A query remembers how many
//! archetypes (and, for relation queries, which relation table version) it
//! has seen and only examines what appeared since. Archetypes and their tables
//! are never removed, so cached matches never go stale.
//!
//! ## Iteration order
//! Table order then row order. For relation queries the table order depends
//! on the traversal marker `T`:
//! * [`Random`]: table creation order,
//! * [`Up`]: deepest tree level first (children before parents),
//! * [`Down`]: shallowest tree level first (parents before children).
//!
//! Iteration order is not stable across structural changes. Items borrow the
//! query mutably, so they can't outlive the system run that produced them.
//!
//! ## Aliasing
//! A dense query yields each row once, so its iterator may hand out `&mut T`.
//! A relation query visits one entity once per relation it takes part in, so
//! [`RelationQuery::iter`] is only available for read-only terms. Mutable
//! relation queries go through [`RelationQuery::for_each`] and
//! [`RelationQuery::get`], whose items never outlive the call that produced
//! them.

use std::any::type_name;
use std::cmp::Reverse;
use std::marker::PhantomData;
use std::ops::Range;

use crate::engine::access::SystemAccess;
use crate::engine::commands::relation_type;
use crate::engine::entity::Entity;
use crate::engine::fetch::{QueryData, QueryFilter, ReadOnlyQueryData, Terms};
use crate::engine::registry::Data;
use crate::engine::relation::SparseRelationTable;
use crate::engine::storage::Column;
use crate::engine::systems::{SystemContext, SystemParam};
use crate::engine::types::{ArchetypeId, DataTypeId, EntityIndex, RowIndex, SparseRelationTableId};
use crate::engine::dense::DenseTable;
use crate::engine::world::World;


// ─────────────────────────────────────────────────────────────────────────────
// Single-target queries
// ─────────────────────────────────────────────────────────────────────────────

/// Panics if the footprint of query `Q` aliases one of its own columns.
fn check_access<Q: ?Sized>(own: &SystemAccess, world: &World) {
    if let Err(error) = own.validate(world.types()) {
        panic!("query `{}` has invalid access: {error}", type_name::<Q>());
    }
}

/// Cached matching state of a [`Query`].

pub struct QueryState<D: QueryData, F: QueryFilter = ()> {
    data: D::State,
    filter: F::State,
    terms: Terms,
    archetypes: Vec<ArchetypeId>,
    seen: usize,
}

impl<D: QueryData, F: QueryFilter> QueryState<D, F> {
    /// Resolves the query terms against `world`, recording their access.
    ///
    /// ## Panics
    /// Panics if a term references an unregistered component, or if two terms
    /// reach the same component and one of them writes it.
    pub fn new(world: &World, access: &mut SystemAccess) -> Self {
        let mut own = SystemAccess::new();
        let data = D::init(world, &mut own);
        check_access::<D>(&own, world);
        access.merge(&own, world.types());

        let filter = F::init(world);
        let mut terms = Terms::default();
        D::terms(&data, &mut terms);
        F::terms(&filter, &mut terms);
        terms.normalize();

        let mut state = Self { data, filter, terms, archetypes: Vec::new(), seen: 0 };
        state.refresh(world);
        state
    }

    /// Picks up archetypes created since the last refresh.
    pub fn refresh(&mut self, world: &World) {
        let graph = world.archetypes();
        if graph.len() == self.seen {
            return;
        }

        if self.seen == 0 {
            self.archetypes = graph.collect(&self.terms.with, &self.terms.without);
            self.archetypes.sort_unstable();
        } else {
            let fresh = (self.seen..graph.len()).map(|index| ArchetypeId(index as u32));
            self.archetypes.extend(fresh.filter(|&id| self.terms.matches(graph, id)));
        }
        self.seen = graph.len();
    }

    /// Returns the column constraints of the query.
    pub fn terms(&self) -> &Terms { &self.terms }

    /// Returns the matched archetypes, in ascending id order.
    pub fn archetypes(&self) -> &[ArchetypeId] { &self.archetypes }

    /// Returns `true` if `archetype` is matched.
    pub fn matches(&self, archetype: ArchetypeId) -> bool {
        self.archetypes.binary_search(&archetype).is_ok()
    }

    /// Returns the filter state.
    pub fn filter_state(&self) -> &F::State { &self.filter }

    /// Refreshes the state and opens a query over an exclusively borrowed world.
    pub fn query<'w, 's>(&'s mut self, world: &'w mut World) -> Query<'w, 's, D, F> {
        self.refresh(world);
        Query { world, state: self }
    }
}

/// System parameter iterating over the entities matching `D` and `F`.
///
/// ## Example
/// ```ignore
/// fn gravity(mut query: Query<&mut Velocity, With<Body>>) {
///     query.for_each(|velocity| velocity.y -= 9.81);
/// }
/// ```

pub struct Query<'w, 's, D: QueryData, F: QueryFilter = ()> {
    world: &'w World,
    state: &'s QueryState<D, F>,
}

impl<'w, 's, D: QueryData, F: QueryFilter> Query<'w, 's, D, F> {
    /// Iterates over every matching entity, table by table.
    pub fn iter(&mut self) -> QueryIter<'_, 's, D, F> {
        QueryIter { world: self.world, state: self.state, next_table: 0, current: None, row: 0 }
    }

    /// Calls `f` on every matching entity.
    pub fn for_each(&mut self, mut f: impl FnMut(D::Item<'_>)) {
        for item in self.iter() {
            f(item);
        }
    }

    /// Returns the item of `entity`, if it is alive and matched.
    pub fn get<'q>(&'q mut self, entity: Entity) -> Option<D::Item<'q>> {
        let world: &'q World = self.world;
        let location = world.location(entity)?;
        if !self.state.matches(location.archetype) {
            return None;
        }
        let table = world.dense_tables().get(location.archetype)?;
        let fetch = D::fetch(&self.state.data, table);
        // SAFETY: the item borrows the query mutably, so no other item of
        // this query is alive.
        Some(unsafe { D::item(&fetch, location.row) })
    }

    /// Returns `true` if `entity` is alive and matched.
    pub fn contains(&self, entity: Entity) -> bool {
        self.world.location(entity).is_some_and(|location| self.state.matches(location.archetype))
    }

    /// Returns the item of the only matching entity.
    ///
    /// Returns `None` if zero or several entities match.
    pub fn single(&mut self) -> Option<D::Item<'_>> {
        if self.len() != 1 {
            return None;
        }
        self.iter().next()
    }

    /// Returns the number of matching entities.
    pub fn len(&self) -> usize {
        self.tables().map(DenseTable::len).sum()
    }

    /// Returns `true` if no entity matches.
    pub fn is_empty(&self) -> bool {
        self.tables().all(DenseTable::is_empty)
    }

    fn tables(&self) -> impl Iterator<Item = &DenseTable> + '_ {
        let dense = self.world.dense_tables();
        self.state.archetypes.iter().filter_map(move |&archetype| dense.get(archetype))
    }
}

impl<'a, 'w, 's, D: QueryData, F: QueryFilter> IntoIterator for &'a mut Query<'w, 's, D, F> {
    type Item = D::Item<'a>;
    type IntoIter = QueryIter<'a, 's, D, F>;

    fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Iterator returned by [`Query::iter`].

pub struct QueryIter<'a, 's, D: QueryData, F: QueryFilter> {
    world: &'a World,
    state: &'s QueryState<D, F>,
    next_table: usize,
    current: Option<(&'a DenseTable, D::Fetch<'a>)>,
    row: RowIndex,
}

impl<'a, D: QueryData, F: QueryFilter> Iterator for QueryIter<'a, '_, D, F> {
    type Item = D::Item<'a>;

    fn next(&mut self) -> Option<D::Item<'a>> {
        loop {
            if let Some((table, fetch)) = &self.current {
                if self.row < table.len() {
                    let row = self.row;
                    self.row += 1;
                    // SAFETY: every row is yielded once, and the iterator
                    // borrows its query mutably.
                    return Some(unsafe { D::item(fetch, row) });
                }
                self.current = None;
            }

            let archetype = *self.state.archetypes.get(self.next_table)?;
            self.next_table += 1;
            if let Some(table) = self.world.dense_tables().get(archetype).filter(|t| !t.is_empty()) {
                self.current = Some((table, D::fetch(&self.state.data, table)));
                self.row = 0;
            }
        }
    }
}

impl<'a, D: 'static + QueryData, F: 'static + QueryFilter> SystemParam for Query<'a, '_, D, F> {
    type State = QueryState<D, F>;
    type Item<'w, 's> = Query<'w, 's, D, F>;

    fn init(world: &World, access: &mut SystemAccess) -> QueryState<D, F> {
        QueryState::new(world, access)
    }

    unsafe fn fetch<'w, 's>(state: &'s mut QueryState<D, F>, ctx: SystemContext<'w>) -> Query<'w, 's, D, F> {
        state.refresh(ctx.world);
        Query { world: ctx.world, state }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relation queries
// ─────────────────────────────────────────────────────────────────────────────

/// Order in which a relation query visits its tables.
pub trait Traversal: Send + Sync + 'static {
    /// Sorts the matched tables in place.
    fn order(tables: &mut [RelationMatch]);
}

/// Visits tables in creation order.
pub struct Random;

/// Visits the deepest tree level first.
pub struct Up;

/// Visits the shallowest tree level first.
pub struct Down;

impl Traversal for Random {
    fn order(_tables: &mut [RelationMatch]) {}
}

impl Traversal for Up {
    fn order(tables: &mut [RelationMatch]) {
        tables.sort_by_key(|m| Reverse(m.table.depth));
    }
}

impl Traversal for Down {
    fn order(tables: &mut [RelationMatch]) {
        tables.sort_by_key(|m| m.table.depth);
    }
}

/// A relation table matched by a relation query.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RelationMatch {
    /// The matched table.
    pub table: SparseRelationTableId,

    /// `true` if the query's `from` target is the table's `to` side. Only
    /// happens for symmetric relations.
    pub reversed: bool,
}

impl RelationMatch {
    fn from_archetype(&self) -> ArchetypeId {
        if self.reversed { self.table.to } else { self.table.from }
    }

    fn to_archetype(&self) -> ArchetypeId {
        if self.reversed { self.table.from } else { self.table.to }
    }
}

/// Cached matching state of a [`RelationQuery`].

pub struct RelationQueryState<R, A: QueryData, B: QueryData, T: Traversal = Random> {
    data_type: DataTypeId,
    symmetric: bool,
    from: A::State,
    to: B::State,
    from_terms: Terms,
    to_terms: Terms,
    tables: Vec<RelationMatch>,
    aliased: bool,
    seen_archetypes: usize,
    seen_version: Option<u64>,
    _marker: PhantomData<fn() -> (R, T)>,
}

impl<R: Data, A: QueryData, B: QueryData, T: Traversal> RelationQueryState<R, A, B, T> {
    /// Resolves the query terms against `world`, recording their access.
    ///
    /// `A` and `B` may both reach the same component, even mutably: a
    /// relation from an entity to itself is then skipped, so one row is never
    /// reached through both targets at once.
    ///
    /// ## Panics
    /// Panics if `R` isn't a registered relation, a term references an
    /// unregistered component, or one target aliases its own columns.
    pub fn new(world: &World, access: &mut SystemAccess) -> Self {
        let data_type = relation_type::<R>(world);
        let symmetric = world.types().relation_kind(data_type).is_some_and(|kind| kind.is_symmetric());

        let mut from_access = SystemAccess::new();
        let from = A::init(world, &mut from_access);
        let mut to_access = SystemAccess::new();
        let to = B::init(world, &mut to_access);
        let aliased = from_access.conflicts_with(&to_access);

        let mut own = SystemAccess::new();
        own.read_component(data_type);
        own.union(&from_access);
        own.union(&to_access);
        check_access::<(A, B)>(&own, world);
        access.merge(&own, world.types());

        let mut from_terms = Terms::default();
        A::terms(&from, &mut from_terms);
        from_terms.normalize();
        let mut to_terms = Terms::default();
        B::terms(&to, &mut to_terms);
        to_terms.normalize();

        let mut state = Self {
            data_type,
            symmetric,
            from,
            to,
            from_terms,
            to_terms,
            tables: Vec::new(),
            aliased,
            seen_archetypes: 0,
            seen_version: None,
            _marker: PhantomData,
        };
        state.refresh(world);
        state
    }

    /// Re-matches tables if the archetype graph or the relation tables changed.
    pub fn refresh(&mut self, world: &World) {
        let graph = world.archetypes();
        let registry = world.relation_tables();
        if graph.len() == self.seen_archetypes && Some(registry.version()) == self.seen_version {
            return;
        }

        self.tables.clear();
        for &table in registry.ids().iter().filter(|id| id.data_type == self.data_type) {
            if self.from_terms.matches(graph, table.from) && self.to_terms.matches(graph, table.to) {
                self.tables.push(RelationMatch { table, reversed: false });
            }
            if self.symmetric && self.from_terms.matches(graph, table.to) && self.to_terms.matches(graph, table.from) {
                self.tables.push(RelationMatch { table, reversed: true });
            }
        }
        T::order(&mut self.tables);

        self.seen_archetypes = graph.len();
        self.seen_version = Some(registry.version());
    }

    /// Returns the matched tables, in visiting order.
    pub fn tables(&self) -> &[RelationMatch] { &self.tables }

    /// Refreshes the state and opens a query over an exclusively borrowed world.
    pub fn query<'w, 's>(&'s mut self, world: &'w mut World) -> RelationQuery<'w, 's, R, A, B, T> {
        self.refresh(world);
        RelationQuery { world, state: self, pin_from: None, pin_to: None }
    }
}

/// System parameter iterating over relations of type `R`.
///
/// ## Example
/// ```ignore
/// fn propagate(mut query: RelationQuery<ChildOf, &mut Transform, &Transform, Down>) {
///     query.for_each(|(child, _, parent)| child.global = parent.global * child.local);
/// }
/// ```

pub struct RelationQuery<'w, 's, R, A: QueryData, B: QueryData, T: Traversal = Random> {
    world: &'w World,
    state: &'s RelationQueryState<R, A, B, T>,
    pin_from: Option<Entity>,
    pin_to: Option<Entity>,
}

type RelationItem<'a, R, A, B> = (<A as QueryData>::Item<'a>, &'a R, <B as QueryData>::Item<'a>);

impl<'w, 's, R: Data, A: QueryData, B: QueryData, T: Traversal> RelationQuery<'w, 's, R, A, B, T> {
    /// Restricts the `from` target to `entity`.
    pub fn pin_from(&mut self, entity: Entity) -> &mut Self {
        self.pin_from = Some(entity);
        self
    }

    /// Restricts the `to` target to `entity`.
    pub fn pin_to(&mut self, entity: Entity) -> &mut Self {
        self.pin_to = Some(entity);
        self
    }

    /// Lifts both restrictions.
    pub fn unpin(&mut self) -> &mut Self {
        self.pin_from = None;
        self.pin_to = None;
        self
    }

    /// Calls `f` on every matching relation.
    ///
    /// An entity taking part in several relations is visited once per
    /// relation. Each item only lives for one call of `f`.
    pub fn for_each(&mut self, mut f: impl FnMut(RelationItem<'_, R, A, B>)) {
        let (pin_from, pin_to) = (self.pin_from, self.pin_to);
        for item in self.iter_pinned(pin_from, pin_to) {
            f(item);
        }
    }

    /// Returns the relation from `from` to `to`, if both match.
    pub fn get(&mut self, from: Entity, to: Entity) -> Option<RelationItem<'_, R, A, B>> {
        self.iter_pinned(Some(from), Some(to)).next()
    }

    /// Returns `true` if no relation matches.
    pub fn is_empty(&mut self) -> bool {
        let (pin_from, pin_to) = (self.pin_from, self.pin_to);
        self.iter_pinned(pin_from, pin_to).next().is_none()
    }

    fn iter_pinned(&mut self, pin_from: Option<Entity>, pin_to: Option<Entity>) -> RelationIter<'_, 's, R, A, B, T> {
        let resolve = |pin: Option<Entity>| match pin {
            None => Ok(None),
            Some(entity) => self.world.location(entity).map(|l| Some((entity.index, l.archetype))).ok_or(()),
        };
        let pins = resolve(pin_from).and_then(|from| Ok((from, resolve(pin_to)?)));

        let (pin_from, pin_to, exhausted) = match pins {
            Ok((from, to)) => (from, to, false),
            Err(()) => (None, None, true),
        };

        RelationIter {
            world: self.world,
            state: self.state,
            pin_from,
            pin_to,
            next_table: if exhausted { self.state.tables.len() } else { 0 },
            current: None,
        }
    }
}

impl<'w, 's, R: Data, A: ReadOnlyQueryData, B: ReadOnlyQueryData, T: Traversal> RelationQuery<'w, 's, R, A, B, T> {
    /// Iterates over every matching relation.
    pub fn iter(&mut self) -> RelationIter<'_, 's, R, A, B, T> {
        let (pin_from, pin_to) = (self.pin_from, self.pin_to);
        self.iter_pinned(pin_from, pin_to)
    }
}

enum Rows {
    All(Range<RowIndex>),
    FromList(Option<RowIndex>),
    ToList(Option<RowIndex>),
    One(Option<RowIndex>),
}

impl Rows {
    fn next(&mut self, table: &SparseRelationTable) -> Option<RowIndex> {
        match self {
            Rows::All(range) => range.next(),
            Rows::FromList(cursor) => {
                let row = (*cursor)?;
                *cursor = table.next_from(row);
                Some(row)
            }
            Rows::ToList(cursor) => {
                let row = (*cursor)?;
                *cursor = table.next_to(row);
                Some(row)
            }
            Rows::One(row) => row.take(),
        }
    }
}

struct Cursor<'a, R, A: QueryData, B: QueryData> {
    table: &'a SparseRelationTable,
    values: &'a Column<R>,
    reversed: bool,
    from: A::Fetch<'a>,
    to: B::Fetch<'a>,
    rows: Rows,
}

/// Iterator returned by [`RelationQuery::iter`].

pub struct RelationIter<'a, 's, R, A: QueryData, B: QueryData, T: Traversal> {
    world: &'a World,
    state: &'s RelationQueryState<R, A, B, T>,
    pin_from: Option<(EntityIndex, ArchetypeId)>,
    pin_to: Option<(EntityIndex, ArchetypeId)>,
    next_table: usize,
    current: Option<Cursor<'a, R, A, B>>,
}

impl<'a, R: Data, A: QueryData, B: QueryData, T: Traversal> RelationIter<'a, '_, R, A, B, T> {
    fn open(&self, matched: RelationMatch) -> Option<Cursor<'a, R, A, B>> {
        if self.pin_from.is_some_and(|(_, archetype)| archetype != matched.from_archetype())
            || self.pin_to.is_some_and(|(_, archetype)| archetype != matched.to_archetype())
        {
            return None;
        }

        let table = self.world.relation_tables().get(matched.table).filter(|t| !t.is_empty())?;
        let values = table.values::<R>()?;
        let dense = self.world.dense_tables();
        let from = A::fetch(&self.state.from, dense.get(matched.from_archetype())?);
        let to = B::fetch(&self.state.to, dense.get(matched.to_archetype())?);

        let rows = match (self.pin_from, self.pin_to, matched.reversed) {
            (None, None, _) => Rows::All(0..table.len()),
            (Some((a, _)), Some((b, _)), false) => Rows::One(table.row(a, b)),
            (Some((a, _)), Some((b, _)), true) => Rows::One(table.row(b, a)),
            (Some((a, _)), None, false) | (None, Some((a, _)), true) => Rows::FromList(table.first_from(a)),
            (Some((a, _)), None, true) | (None, Some((a, _)), false) => Rows::ToList(table.first_to(a)),
        };

        Some(Cursor { table, values, reversed: matched.reversed, from, to, rows })
    }
}

impl<'a, R: Data, A: QueryData, B: QueryData, T: Traversal> Iterator for RelationIter<'a, '_, R, A, B, T> {
    type Item = RelationItem<'a, R, A, B>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cursor) = &mut self.current {
                if let Some(row) = cursor.rows.next(cursor.table) {
                    let (from, to) = cursor.table.indices(row);
                    let (a, b) = if cursor.reversed { (to, from) } else { (from, to) };
                    if a == b && (cursor.reversed || self.state.aliased) {
                        continue;
                    }
                    let (Some((_, a_location)), Some((_, b_location))) = (self.world.slot(a), self.world.slot(b)) else {
                        continue;
                    };

                    let values: &'a Column<R> = cursor.values;
                    // SAFETY: `a != b` whenever the targets alias. Items of
                    // mutable terms never coexist: `iter` requires read-only
                    // terms and `for_each` scopes each item to one call.
                    let item = unsafe {
                        (A::item(&cursor.from, a_location.row), values.get(row), B::item(&cursor.to, b_location.row))
                    };
                    return Some(item);
                }
                self.current = None;
            }

            let matched = *self.state.tables.get(self.next_table)?;
            self.next_table += 1;
            self.current = self.open(matched);
        }
    }
}

impl<'a, R, A, B, T> SystemParam for RelationQuery<'a, '_, R, A, B, T>
where
    R: Data,
    A: QueryData + 'static,
    B: QueryData + 'static,
    T: Traversal,
{
    type State = RelationQueryState<R, A, B, T>;
    type Item<'w, 's> = RelationQuery<'w, 's, R, A, B, T>;

    fn init(world: &World, access: &mut SystemAccess) -> Self::State {
        RelationQueryState::new(world, access)
    }

    unsafe fn fetch<'w, 's>(state: &'s mut Self::State, ctx: SystemContext<'w>) -> RelationQuery<'w, 's, R, A, B, T> {
        state.refresh(ctx.world);
        RelationQuery { world: ctx.world, state, pin_from: None, pin_to: None }
    }
}
