//! Entity identifiers and the pool that allocates them.
//!
//! An [`Entity`] is an `(index, generation)` pair. The index addresses a slot in
//! the [`EntityPool`]; the generation is bumped every time the slot is freed, so
//! handles to a destroyed entity are detectably stale even after the index is
//! recycled.
//!
//! ## Slot states
//! * **free**: on the free list, archetype `INVALID`.
//! * **reserved**: handed out by [`EntityPool::reserve`] but not yet placed in a
//!   table, archetype `INVALID`.
//! * **alive**: placed in a dense table, archetype valid.
//!
//! Reservation exists so that systems can name entities they spawn through
//! deferred commands before the spawn is applied.

use std::fmt;

use crate::engine::types::{ArchetypeId, EntityIndex, Generation, RowIndex};


/// Handle to a logical row of the world.
///
/// Equality and hashing cover both the index and the generation.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Entity {
    /// Slot index in the entity pool.
    pub index: EntityIndex,

    /// Generation of the slot when this handle was issued.
    pub generation: Generation,
}

impl Entity {
    /// A handle that never refers to a live entity.
    pub const INVALID: Entity = Entity { index: u32::MAX, generation: u32::MAX };

    /// Builds a handle from its parts.
    #[inline]
    pub const fn new(index: EntityIndex, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Returns `true` if this is [`Entity::INVALID`].
    #[inline]
    pub fn is_invalid(self) -> bool { self == Self::INVALID }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Where an entity's components live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype of the entity, `INVALID` for free or reserved slots.
    pub archetype: ArchetypeId,

    /// Row in the archetype's dense table.
    pub row: RowIndex,
}

impl Default for EntityLocation {
    fn default() -> Self {
        Self { archetype: ArchetypeId::INVALID, row: 0 }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    generation: Generation,
    location: EntityLocation,
    reserved: bool,
}

/// Allocates and recycles entity slots.
///
/// ## Invariants
/// - A slot is on `free` iff it is neither reserved nor alive.
/// - No two alive entities share an `(index, generation)` pair.
/// - A slot's generation only ever increases (wrapping), so a stale handle
///   is never reported alive again.

#[derive(Default)]
pub struct EntityPool {
    slots: Vec<Slot>,
    free: Vec<EntityIndex>,
    alive: usize,
}

impl EntityPool {
    /// Creates an empty pool.
    pub fn new() -> Self { Self::default() }

    /// Hands out a fresh or recycled slot without making it alive.
    pub fn reserve(&mut self) -> Entity {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len();
                assert!(index < u32::MAX as usize, "entity pool exhausted");
                self.slots.push(Slot::default());
                index as EntityIndex
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.reserved = true;
        Entity::new(index, slot.generation)
    }

    /// Allocates an entity and places it at `location`.
    pub fn create(&mut self, location: EntityLocation) -> Entity {
        let entity = self.reserve();
        self.create_reserved(entity, location);
        entity
    }

    /// Makes a previously reserved entity alive at `location`.
    ///
    /// ## Panics
    /// Panics if `entity` is not a pending reservation.
    pub fn create_reserved(&mut self, entity: Entity, location: EntityLocation) {
        assert!(self.is_reserved(entity), "entity {entity} is not a pending reservation");
        assert!(location.archetype.is_valid(), "cannot place entity {entity} in the invalid archetype");
        let slot = &mut self.slots[entity.index as usize];
        slot.location = location;
        slot.reserved = false;
        self.alive += 1;
    }

    /// Returns `true` if `entity` refers to a live entity.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|slot| slot.generation == entity.generation && slot.location.archetype.is_valid())
    }

    /// Returns `true` if `entity` is reserved but not alive yet.
    pub fn is_reserved(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|slot| slot.generation == entity.generation && slot.reserved)
    }

    /// Frees the slot of `entity` and bumps its generation.
    ///
    /// Returns `false` and does nothing if the handle is stale. Pending
    /// reservations are released as well.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let was_alive = self.is_alive(entity);
        if !was_alive && !self.is_reserved(entity) {
            return false;
        }

        let slot = &mut self.slots[entity.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.location = EntityLocation::default();
        slot.reserved = false;
        self.free.push(entity.index);
        if was_alive {
            self.alive -= 1;
        }
        true
    }

    /// Returns the location of a live entity.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if self.is_alive(entity) {
            Some(self.slots[entity.index as usize].location)
        } else {
            None
        }
    }

    /// Returns the archetype of the slot at `index`, `INVALID` if out of range.
    #[inline]
    pub fn archetype(&self, index: EntityIndex) -> ArchetypeId {
        self.slots.get(index as usize).map_or(ArchetypeId::INVALID, |slot| slot.location.archetype)
    }

    /// Returns the current generation of the slot at `index`.
    ///
    /// ## Panics
    /// Panics if `index` was never allocated.
    #[inline]
    pub fn generation(&self, index: EntityIndex) -> Generation {
        self.slots[index as usize].generation
    }

    /// Returns the live handle of the slot at `index`.
    pub fn entity(&self, index: EntityIndex) -> Entity {
        Entity::new(index, self.generation(index))
    }

    /// Moves a live slot to a new location.
    pub(crate) fn set_location(&mut self, index: EntityIndex, location: EntityLocation) {
        self.slots[index as usize].location = location;
    }

    /// Updates the row of a live slot after a swap-remove in its table.
    pub(crate) fn set_row(&mut self, index: EntityIndex, row: RowIndex) {
        self.slots[index as usize].location.row = row;
    }

    /// Returns the number of alive entities.
    pub fn alive_count(&self) -> usize { self.alive }

    /// Returns the number of slots ever allocated.
    pub fn capacity(&self) -> usize { self.slots.len() }
}
