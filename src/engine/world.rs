//! The world: owner of every entity, table and resource.
//!
//! This module defines [`World`], which ties the storage layers together:
//!
//! * the [`TypeRegistry`] describing every data type,
//! * the [`EntityPool`] allocating entity handles,
//! * the [`ArchetypeGraph`] tracking column sets,
//! * dense tables for components and sparse tables for relations,
//! * resources, each behind its own `RwLock`.
//!
//! ## Access model
//!
//! Structural mutations (create, destroy, add/remove components, relate and
//! unrelate) take `&mut World` and happen only at synchronization points,
//! between batches of systems. While systems run they share a `&World`;
//! component data is reached through the query engine, which hands out
//! references according to each system's declared access. Entity reservation is
//! the only operation that mutates state through `&World`, and it goes through
//! the entity pool's lock.
//!
//! ## Relations
//!
//! Relation rows live in tables keyed by the archetypes of both endpoints, so
//! whenever an entity changes archetype every relation touching it is moved to
//! the table of its new archetype. Ephemeral relations are dropped instead. When
//! an entity is destroyed, every relation touching it is erased.

use std::any::Any;
use std::collections::HashMap;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::engine::archetype::ArchetypeGraph;
use crate::engine::dense::{ColumnValue, DenseTableRegistry};
use crate::engine::entity::{Entity, EntityLocation, EntityPool};
use crate::engine::registry::{Data, DataKind, TypeRegistry};
use crate::engine::relation::{RelationKind, SparseRelationTableRegistry};
use crate::engine::types::{ArchetypeId, ColumnId, DataTypeId, EntityIndex, SparseRelationTableId};


/// Owner of all ECS state.

pub struct World {
    types: TypeRegistry,
    entities: Mutex<EntityPool>,
    archetypes: ArchetypeGraph,
    dense: DenseTableRegistry,
    sparse: SparseRelationTableRegistry,
    resources: HashMap<DataTypeId, Box<dyn Any + Send + Sync>>,
}

impl Default for World {
    fn default() -> Self { Self::new() }
}

impl World {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self {
            types: TypeRegistry::new(),
            entities: Mutex::new(EntityPool::new()),
            archetypes: ArchetypeGraph::new(),
            dense: DenseTableRegistry::new(),
            sparse: SparseRelationTableRegistry::new(),
            resources: HashMap::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    /// Registers `T` as a component type.
    pub fn register_component<T: Data>(&mut self) -> DataTypeId {
        self.types.register::<T>(DataKind::Component)
    }

    /// Registers `T` as a relation type of the given kind.
    pub fn register_relation<T: Data>(&mut self, kind: RelationKind) -> DataTypeId {
        self.types.register::<T>(DataKind::Relation(kind))
    }

    /// Registers `T` as a resource type without inserting a value.
    pub fn register_resource<T: Data>(&mut self) -> DataTypeId {
        self.types.register::<T>(DataKind::Resource)
    }

    /// Returns the type registry.
    #[inline]
    pub fn types(&self) -> &TypeRegistry { &self.types }

    /// Returns the archetype graph.
    #[inline]
    pub fn archetypes(&self) -> &ArchetypeGraph { &self.archetypes }

    /// Returns the dense tables.
    #[inline]
    pub fn dense_tables(&self) -> &DenseTableRegistry { &self.dense }

    /// Returns the sparse relation tables.
    #[inline]
    pub fn relation_tables(&self) -> &SparseRelationTableRegistry { &self.sparse }

    /// Drops every empty relation table.
    pub fn clean_up(&mut self) -> usize {
        self.sparse.clean_up()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────

    /// Inserts or replaces the resource `T`, registering the type if needed.
    pub fn insert_resource<T: Data>(&mut self, value: T) {
        let id = match self.types.id_of::<T>() {
            Some(id) if self.types.is_resource(id) => id,
            _ => self.register_resource::<T>(),
        };
        self.resources.insert(id, Box::new(RwLock::new(value)));
    }

    /// Removes the resource `T` and returns it.
    pub fn remove_resource<T: Data>(&mut self) -> Option<T> {
        let id = self.types.id_of::<T>()?;
        let boxed = self.resources.remove(&id)?;
        boxed.downcast::<RwLock<T>>().ok().map(|lock| (*lock).into_inner())
    }

    /// Removes the resource with type id `id`. Returns `false` if absent.
    pub fn remove_resource_dyn(&mut self, id: DataTypeId) -> bool {
        self.resources.remove(&id).is_some()
    }

    /// Returns `true` if resource `T` holds a value.
    pub fn has_resource<T: Data>(&self) -> bool {
        self.resource_lock::<T>().is_some()
    }

    /// Returns the lock guarding resource `T`.
    pub fn resource_lock<T: Data>(&self) -> Option<&RwLock<T>> {
        let id = self.types.id_of::<T>()?;
        self.resources.get(&id)?.downcast_ref::<RwLock<T>>()
    }

    /// Locks resource `T` for reading.
    pub fn resource<T: Data>(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.resource_lock::<T>().map(|lock| lock.read())
    }

    /// Locks resource `T` for writing.
    pub fn resource_mut<T: Data>(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.resource_lock::<T>().map(|lock| lock.write())
    }

    /// Returns resource `T` mutably without locking.
    pub fn get_resource_mut<T: Data>(&mut self) -> Option<&mut T> {
        let id = self.types.id_of::<T>()?;
        self.resources.get_mut(&id)?.downcast_mut::<RwLock<T>>().map(|lock| lock.get_mut())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entities
    // ─────────────────────────────────────────────────────────────────────

    /// Reserves an entity handle that becomes alive once created.
    ///
    /// Safe to call while systems run.
    pub fn reserve(&self) -> Entity {
        self.entities.lock().reserve()
    }

    /// Creates an entity with no components.
    pub fn create(&mut self) -> Entity {
        let entity = self.entities.get_mut().reserve();
        self.create_reserved(entity);
        entity
    }

    /// Makes a reserved entity alive in the empty archetype.
    ///
    /// ## Panics
    /// Panics if `entity` isn't a pending reservation.
    pub fn create_reserved(&mut self, entity: Entity) {
        self.create_reserved_with(entity, Vec::new());
    }

    /// Makes a reserved entity alive with an initial set of components.
    ///
    /// The entity is placed directly in the archetype of `values`, without
    /// visiting the intermediate archetypes.
    ///
    /// ## Panics
    /// Panics if `entity` isn't a pending reservation, a column isn't a
    /// component column, or the same column appears twice.
    pub fn create_reserved_with(&mut self, entity: Entity, values: Vec<ColumnValue>) {
        assert!(self.entities.get_mut().is_reserved(entity), "entity {entity} is not a pending reservation");

        let columns: Vec<_> = values.iter().map(|(column, _)| *column).collect();
        for column in &columns {
            assert!(
                self.types.is_component(column.data_type()),
                "`{}` is not a registered component",
                self.types.name(column.data_type())
            );
        }
        let archetype = self.archetypes.archetype_of(&columns);
        assert!(
            self.archetypes.columns(archetype).len() == columns.len(),
            "entity {entity} was spawned with the same component twice"
        );

        let table = self.dense.create(archetype, &self.archetypes, &self.types);
        let row = table.insert(entity, values);
        self.entities.get_mut().create_reserved(entity, EntityLocation { archetype, row });
        debug!(%entity, archetype = archetype.0, "created entity");
    }

    /// Destroys an entity together with every relation touching it.
    ///
    /// Returns `false` if the handle is stale. Releasing a pending reservation
    /// also returns `false`.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let Some(location) = self.entities.get_mut().location(entity) else {
            self.entities.get_mut().destroy(entity);
            return false;
        };

        self.erase_relations_of(entity.index, location.archetype);

        let table = match self.dense.get_mut(location.archetype) {
            Some(table) => table,
            None => panic!("entity {entity} lives in archetype {:?} which has no table", location.archetype),
        };
        let moved = table.swap_erase(location.row);
        let pool = self.entities.get_mut();
        if let Some(moved) = moved {
            pool.set_row(moved.index, location.row);
        }
        pool.destroy(entity);
        debug!(%entity, "destroyed entity");
        true
    }

    /// Returns `true` if `entity` is alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.lock().is_alive(entity)
    }

    /// Returns `true` if `entity` is a reservation that hasn't been created yet.
    pub fn is_reserved(&self, entity: Entity) -> bool {
        self.entities.lock().is_reserved(entity)
    }

    /// Returns the location of a live entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.lock().location(entity)
    }

    /// Returns the live handle and location of the slot at `index`.
    pub fn slot(&self, index: EntityIndex) -> Option<(Entity, EntityLocation)> {
        let pool = self.entities.lock();
        let entity = pool.entity(index);
        pool.location(entity).map(|location| (entity, location))
    }

    /// Returns the archetype of `entity`, `INVALID` if it isn't alive.
    pub fn archetype(&self, entity: Entity) -> ArchetypeId {
        self.location(entity).map_or(ArchetypeId::INVALID, |l| l.archetype)
    }

    /// Returns the column set of `entity` (empty if it isn't alive).
    pub fn columns(&self, entity: Entity) -> &[ColumnId] {
        self.archetypes.columns(self.archetype(entity))
    }

    /// Returns the live handle of the slot at `index`.
    pub fn entity(&self, index: EntityIndex) -> Entity {
        self.entities.lock().entity(index)
    }

    /// Returns the number of alive entities.
    pub fn alive_count(&self) -> usize {
        self.entities.lock().alive_count()
    }

    /// Iterates over every live entity, table by table.
    pub fn iter_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.dense.iter().flat_map(|table| table.entities().iter().copied())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Components
    // ─────────────────────────────────────────────────────────────────────

    /// Adds or replaces the component `T` of `entity`.
    ///
    /// ## Panics
    /// Panics if `entity` isn't alive or `T` isn't a registered component.
    pub fn insert<T: Data>(&mut self, entity: Entity, value: T) {
        let id = self.types.expect_id::<T>();
        self.insert_dyn(entity, ColumnId::of(id), Box::new(value));
    }

    /// Adds or replaces the value of `column` on `entity`.
    ///
    /// ## Panics
    /// Panics if `entity` isn't alive, the column isn't a component column or
    /// the value has the wrong type.
    pub fn insert_dyn(&mut self, entity: Entity, column: ColumnId, value: Box<dyn Any + Send>) {
        assert!(
            self.types.is_component(column.data_type()),
            "`{}` is not a registered component",
            self.types.name(column.data_type())
        );
        let location = self.expect_location(entity);

        if self.archetypes.contains(location.archetype, column) {
            let Some(target) = self.dense.get_mut(location.archetype).and_then(|t| t.column_mut(column)) else {
                panic!("archetype {:?} lost column {column:?}", location.archetype);
            };
            if let Err(error) = target.replace_dyn(location.row, value) {
                panic!("failed to replace component: {error}");
            }
            trace!(%entity, component = self.types.name(column.data_type()), "replaced component");
            return;
        }

        let archetype = self.archetypes.with(location.archetype, column);
        self.move_entity(entity, location, archetype, vec![(column, value)]);
        trace!(%entity, component = self.types.name(column.data_type()), "added component");
    }

    /// Removes component `T` from `entity`. Returns `false` if it wasn't present.
    pub fn remove<T: Data>(&mut self, entity: Entity) -> bool {
        let Some(id) = self.types.id_of::<T>() else { return false };
        self.remove_dyn(entity, ColumnId::of(id))
    }

    /// Removes `column` from `entity`. Returns `false` if it wasn't present.
    ///
    /// ## Panics
    /// Panics if `entity` isn't alive.
    pub fn remove_dyn(&mut self, entity: Entity, column: ColumnId) -> bool {
        let location = self.expect_location(entity);
        if !self.archetypes.contains(location.archetype, column) {
            return false;
        }

        let archetype = self.archetypes.without(location.archetype, column);
        self.move_entity(entity, location, archetype, Vec::new());
        trace!(%entity, component = self.types.name(column.data_type()), "removed component");
        true
    }

    /// Returns `true` if `entity` is alive and has component `T`.
    pub fn has<T: Data>(&self, entity: Entity) -> bool {
        self.types
            .id_of::<T>()
            .is_some_and(|id| self.archetypes.contains(self.archetype(entity), ColumnId::of(id)))
    }

    /// Returns component `T` of `entity`.
    pub fn get<T: Data>(&self, entity: Entity) -> Option<&T> {
        let column = ColumnId::of(self.types.id_of::<T>()?);
        let location = self.location(entity)?;
        let table = self.dense.get(location.archetype)?;
        Some(table.typed_column::<T>(column)?.get(location.row))
    }

    /// Returns component `T` of `entity` mutably.
    pub fn get_mut<T: Data>(&mut self, entity: Entity) -> Option<&mut T> {
        let column = ColumnId::of(self.types.id_of::<T>()?);
        let location = self.entities.get_mut().location(entity)?;
        let table = self.dense.get_mut(location.archetype)?;
        Some(table.typed_column_mut::<T>(column)?.get_mut(location.row))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Relations
    // ─────────────────────────────────────────────────────────────────────

    /// Relates `from` to `to` with `value`, replacing any previous value.
    ///
    /// ## Panics
    /// Panics if either entity isn't alive or `R` isn't a registered relation.
    pub fn relate<R: Data>(&mut self, from: Entity, to: Entity, value: R) {
        let id = self.types.expect_id::<R>();
        self.relate_dyn(from, to, id, Box::new(value));
    }

    /// Type-erased [`World::relate`].
    pub fn relate_dyn(&mut self, from: Entity, to: Entity, data_type: DataTypeId, value: Box<dyn Any + Send>) {
        let kind = self.expect_relation_kind(data_type);
        let (from, to) = Self::normalize(kind, from, to);
        let from_archetype = self.expect_location(from).archetype;
        let to_archetype = self.expect_location(to).archetype;

        let mut depth = 0;
        if kind.is_tree() {
            if let Some(to_depth) = self.outgoing_depth(to.index, to_archetype, data_type) {
                depth = to_depth + 1;
            }

            if let Some((_, target)) = self.outgoing(from.index, from_archetype, data_type) {
                let target = self.entities.get_mut().entity(target);
                self.unrelate_dyn(from, target, data_type);
            }

            self.propagate_depth(from.index, data_type, depth + 1);
        }

        let id = SparseRelationTableId::new(data_type, from_archetype, to_archetype, depth);
        self.sparse.create(id, &self.types).insert(from.index, to.index, value);
        trace!(%from, %to, relation = self.types.name(data_type), depth, "added relation");
    }

    /// Removes the relation `R` from `from` to `to`. Returns `false` if absent.
    pub fn unrelate<R: Data>(&mut self, from: Entity, to: Entity) -> bool {
        let Some(id) = self.types.id_of::<R>() else { return false };
        self.unrelate_dyn(from, to, id)
    }

    /// Type-erased [`World::unrelate`].
    pub fn unrelate_dyn(&mut self, from: Entity, to: Entity, data_type: DataTypeId) -> bool {
        let kind = self.expect_relation_kind(data_type);
        let (from, to) = Self::normalize(kind, from, to);
        let (Some(from_location), Some(to_location)) = (self.location(from), self.location(to)) else {
            return false;
        };

        for depth in 0..=self.sparse.max_depth(data_type) {
            let id = SparseRelationTableId::new(data_type, from_location.archetype, to_location.archetype, depth);
            let erased = self.sparse.get_mut(id).is_some_and(|table| table.erase(from.index, to.index));
            if erased {
                trace!(%from, %to, relation = self.types.name(data_type), "removed relation");
                if kind.is_tree() {
                    self.propagate_depth(from.index, data_type, 0);
                }
                return true;
            }
        }
        false
    }

    /// Returns the entity `from` points to through tree relation `R`.
    pub fn tree_target<R: Data>(&self, from: Entity) -> Option<Entity> {
        self.tree_target_dyn(from, self.types.id_of::<R>()?)
    }

    /// Type-erased [`World::tree_target`]. Returns `None` for relations of
    /// other kinds.
    pub fn tree_target_dyn(&self, from: Entity, data_type: DataTypeId) -> Option<Entity> {
        if !self.types.relation_kind(data_type)?.is_tree() {
            return None;
        }
        let location = self.location(from)?;
        let (_, target) = self.outgoing(from.index, location.archetype, data_type)?;
        Some(self.entity(target))
    }

    /// Returns `true` if `from` is related to `to` by `R`.
    pub fn related<R: Data>(&self, from: Entity, to: Entity) -> bool {
        self.types.id_of::<R>().is_some_and(|id| self.related_dyn(from, to, id))
    }

    /// Type-erased [`World::related`].
    pub fn related_dyn(&self, from: Entity, to: Entity, data_type: DataTypeId) -> bool {
        self.find_relation(from, to, data_type).is_some()
    }

    /// Returns the value of relation `R` from `from` to `to`.
    pub fn relation<R: Data>(&self, from: Entity, to: Entity) -> Option<&R> {
        let id = self.types.id_of::<R>()?;
        let (table, row) = self.find_relation(from, to, id)?;
        Some(self.sparse.get(table)?.values::<R>()?.get(row))
    }

    /// Returns the value of relation `R` from `from` to `to`, mutably.
    pub fn relation_mut<R: Data>(&mut self, from: Entity, to: Entity) -> Option<&mut R> {
        let id = self.types.id_of::<R>()?;
        let (table, row) = self.find_relation(from, to, id)?;
        Some(self.sparse.get_mut(table)?.values_mut::<R>()?.get_mut(row))
    }

    /// Returns every `(to, value)` of relation `R` leaving `from`.
    ///
    /// For symmetric relations, every relation touching `from` is returned.
    pub fn relations_from<R: Data>(&self, from: Entity) -> Vec<(Entity, &R)> {
        self.walk_relations::<R>(from, true)
    }

    /// Returns every `(from, value)` of relation `R` arriving at `to`.
    ///
    /// For symmetric relations, every relation touching `to` is returned.
    pub fn relations_to<R: Data>(&self, to: Entity) -> Vec<(Entity, &R)> {
        self.walk_relations::<R>(to, false)
    }

    /// Removes every relation of type `data_type`. Returns how many were removed.
    pub fn clear_relation(&mut self, data_type: DataTypeId) -> usize {
        let ids: Vec<_> = self.sparse.ids().iter().copied().filter(|id| id.data_type == data_type).collect();
        let mut count = 0;
        for id in ids {
            if let Some(table) = self.sparse.get_mut(id) {
                let indices: Vec<_> = table.iter().map(|(_, from, _)| from).collect();
                for from in indices {
                    count += table.erase_from(from);
                }
            }
        }
        count
    }

    /// Removes `column` from every entity that has it. Returns how many entities changed.
    pub fn strip_column(&mut self, column: ColumnId) -> usize {
        let holders = self.holders_of(column);
        for &entity in &holders {
            self.remove_dyn(entity, column);
        }
        holders.len()
    }

    /// Destroys every entity that has `column`. Returns how many were destroyed.
    pub fn destroy_holders_of(&mut self, column: ColumnId) -> usize {
        let holders = self.holders_of(column);
        for &entity in &holders {
            self.destroy(entity);
        }
        holders.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn expect_location(&mut self, entity: Entity) -> EntityLocation {
        match self.entities.get_mut().location(entity) {
            Some(location) => location,
            None => panic!("entity {entity} is not alive"),
        }
    }

    fn expect_relation_kind(&self, data_type: DataTypeId) -> RelationKind {
        match self.types.relation_kind(data_type) {
            Some(kind) => kind,
            None => panic!("`{}` is not a registered relation", self.types.name(data_type)),
        }
    }

    fn normalize(kind: RelationKind, from: Entity, to: Entity) -> (Entity, Entity) {
        if kind.is_symmetric() && from.index > to.index { (to, from) } else { (from, to) }
    }

    fn holders_of(&self, column: ColumnId) -> Vec<Entity> {
        self.archetypes
            .collect(&[column], &[])
            .into_iter()
            .filter_map(|archetype| self.dense.get(archetype))
            .flat_map(|table| table.entities().iter().copied())
            .collect()
    }

    fn find_relation(&self, from: Entity, to: Entity, data_type: DataTypeId) -> Option<(SparseRelationTableId, usize)> {
        let kind = self.types.relation_kind(data_type)?;
        let (from, to) = Self::normalize(kind, from, to);
        let from_archetype = self.location(from)?.archetype;
        let to_archetype = self.location(to)?.archetype;

        (0..=self.sparse.max_depth(data_type)).find_map(|depth| {
            let id = SparseRelationTableId::new(data_type, from_archetype, to_archetype, depth);
            let row = self.sparse.get(id)?.row(from.index, to.index)?;
            Some((id, row))
        })
    }

    fn walk_relations<R: Data>(&self, entity: Entity, outgoing: bool) -> Vec<(Entity, &R)> {
        let Some(data_type) = self.types.id_of::<R>() else { return Vec::new() };
        let Some(kind) = self.types.relation_kind(data_type) else { return Vec::new() };
        let Some(index) = self.sparse.type_index(data_type) else { return Vec::new() };
        let archetype = self.archetype(entity);
        let pool = self.entities.lock();

        let mut found = Vec::new();
        let mut collect = |ids: &[SparseRelationTableId], as_from: bool| {
            for &id in ids {
                let Some(table) = self.sparse.get(id) else { continue };
                let Some(values) = table.values::<R>() else { continue };
                let rows: Vec<_> = if as_from { table.rows_from(entity.index).collect() } else { table.rows_to(entity.index).collect() };
                for row in rows {
                    let (from, to) = table.indices(row);
                    let other = if as_from { to } else { from };
                    found.push((pool.entity(other), values.get(row)));
                }
            }
        };

        collect(if outgoing { index.from(archetype) } else { index.to(archetype) }, outgoing);
        if kind.is_symmetric() {
            collect(if outgoing { index.to(archetype) } else { index.from(archetype) }, !outgoing);
        }
        found
    }

    /// Returns the `(table, to index)` of the first outgoing relation of `index`.
    fn outgoing(&self, index: EntityIndex, archetype: ArchetypeId, data_type: DataTypeId) -> Option<(SparseRelationTableId, EntityIndex)> {
        let type_index = self.sparse.type_index(data_type)?;
        type_index.from(archetype).iter().find_map(|&id| {
            let table = self.sparse.get(id)?;
            let row = table.first_from(index)?;
            Some((id, table.indices(row).1))
        })
    }

    fn outgoing_depth(&self, index: EntityIndex, archetype: ArchetypeId, data_type: DataTypeId) -> Option<u32> {
        self.outgoing(index, archetype, data_type).map(|(id, _)| id.depth)
    }

    /// Moves every incoming tree relation of `index` to `depth`, recursing into
    /// the subtree below it.
    fn propagate_depth(&mut self, index: EntityIndex, data_type: DataTypeId, depth: u32) {
        let archetype = self.entities.get_mut().archetype(index);
        let Some(type_index) = self.sparse.type_index(data_type) else { return };

        let tables: Vec<_> = type_index
            .to(archetype)
            .iter()
            .copied()
            .filter(|&id| id.depth != depth && self.sparse.get(id).is_some_and(|t| t.first_to(index).is_some()))
            .collect();

        for id in tables {
            let children: Vec<_> = match self.sparse.get(id) {
                Some(table) => table.rows_to(index).map(|row| table.indices(row).0).collect(),
                None => continue,
            };
            for child in children {
                self.propagate_depth(child, data_type, depth + 1);
            }
            self.sparse.move_to(id, id.with_depth(depth), index, &self.types);
        }
    }

    /// Erases every relation touching `index`, which lives in `archetype`.
    fn erase_relations_of(&mut self, index: EntityIndex, archetype: ArchetypeId) {
        let ids: Vec<_> = self
            .sparse
            .ids()
            .iter()
            .copied()
            .filter(|id| id.from == archetype || id.to == archetype)
            .collect();

        let mut orphans = Vec::new();
        for id in ids {
            let tree = self.types.relation_kind(id.data_type).is_some_and(RelationKind::is_tree);
            let Some(table) = self.sparse.get_mut(id) else { continue };
            if id.from == archetype {
                table.erase_from(index);
            }
            if id.to == archetype {
                if tree {
                    orphans.extend(table.rows_to(index).map(|row| (table.indices(row).0, id.data_type)));
                }
                table.erase_to(index);
            }
        }

        for (child, data_type) in orphans {
            self.propagate_depth(child, data_type, 0);
        }
    }

    /// Moves `entity` from its current table into the table of `archetype`.
    fn move_entity(&mut self, entity: Entity, location: EntityLocation, archetype: ArchetypeId, extra: Vec<ColumnValue>) {
        debug_assert!(location.archetype != archetype);
        self.dense.create(archetype, &self.archetypes, &self.types);
        let (src, dst) = self.dense.pair_mut(location.archetype, archetype);
        let (row, moved) = src.swap_move(location.row, dst, extra);

        let pool = self.entities.get_mut();
        if let Some(moved) = moved {
            pool.set_row(moved.index, location.row);
        }
        pool.set_location(entity.index, EntityLocation { archetype, row });

        self.move_relations(entity.index, location.archetype, archetype);
    }

    /// Re-keys every relation touching `index` after it moved from `old` to `new`.
    fn move_relations(&mut self, index: EntityIndex, old: ArchetypeId, new: ArchetypeId) {
        let from_ids: Vec<_> = self.sparse.ids().iter().copied().filter(|id| id.from == old).collect();
        for id in from_ids {
            let ephemeral = self.types.relation_kind(id.data_type).is_some_and(RelationKind::is_ephemeral);
            if ephemeral {
                if let Some(table) = self.sparse.get_mut(id) {
                    table.erase_from(index);
                }
            } else {
                let target = SparseRelationTableId { from: new, ..id };
                if self.sparse.get(id).is_some_and(|t| t.first_from(index).is_some()) {
                    self.sparse.move_from(id, target, index, &self.types);
                }
            }
        }

        let to_ids: Vec<_> = self.sparse.ids().iter().copied().filter(|id| id.to == old).collect();
        for id in to_ids {
            let ephemeral = self.types.relation_kind(id.data_type).is_some_and(RelationKind::is_ephemeral);
            if ephemeral {
                if let Some(table) = self.sparse.get_mut(id) {
                    table.erase_to(index);
                }
            } else {
                let target = SparseRelationTableId { to: new, ..id };
                if self.sparse.get(id).is_some_and(|t| t.first_to(index).is_some()) {
                    self.sparse.move_to(id, target, index, &self.types);
                }
            }
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("types", &self.types.len())
            .field("entities", &self.alive_count())
            .field("archetypes", &self.archetypes.len())
            .field("relation_tables", &self.sparse.ids().len())
            .field("resources", &self.resources.len())
            .finish()
    }
}
