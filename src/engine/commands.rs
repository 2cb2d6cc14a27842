//! # Commands
//!
//! This module defines deferred commands used to mutate the world.
//!
//! ## Purpose
//! Commands provide an explicit, ordered representation of structural world
//! mutations such as entity creation, destruction, component addition or
//! removal and relation changes.
//!
//! Rather than mutating tables directly during system execution, systems
//! record `Command` values through the [`Commands`] parameter. They are applied
//! at the synchronization point that ends the system's stage. This enables safe
//! parallel system execution and deterministic world updates.
//!
//! ## Design
//! - Commands are plain data describing *what* change should occur, not *how*.
//! - Every system owns a [`CommandQueue`]; queues are merged in stage order.
//! - Entities spawned by a command are reserved immediately, so the handle can
//!   be used by later commands of the same system.
//!
//! ## Invariants
//! - Commands are applied in the order they were recorded, queue by queue.
//! - Commands targeting an entity that is no longer alive when they are
//!   applied are skipped.

use std::any::{type_name, Any};

use parking_lot::Mutex;

use crate::engine::access::SystemAccess;
use crate::engine::dense::ColumnValue;
use crate::engine::entity::Entity;
use crate::engine::fetch::component_column;
use crate::engine::registry::Data;
use crate::engine::systems::{SystemContext, SystemParam};
use crate::engine::types::{ColumnId, DataTypeId};
use crate::engine::world::World;


/// A deferred structural mutation.

pub enum Command {
    /// Makes a reserved entity alive with an initial set of components.
    Create {
        /// The reserved entity.
        entity: Entity,

        /// Initial component values, one per distinct column.
        components: Vec<ColumnValue>,
    },

    /// Destroys an entity and every relation touching it.
    Destroy {
        /// Entity to destroy.
        entity: Entity,
    },

    /// Adds or replaces a component.
    Add {
        /// Target entity.
        entity: Entity,

        /// Column of the component.
        column: ColumnId,

        /// Component value; must match the column's type.
        value: Box<dyn Any + Send>,
    },

    /// Removes a component.
    Remove {
        /// Target entity.
        entity: Entity,

        /// Column of the component.
        column: ColumnId,
    },

    /// Adds or replaces a relation.
    Relate {
        /// Source entity.
        from: Entity,

        /// Target entity.
        to: Entity,

        /// Relation type.
        data_type: DataTypeId,

        /// Relation value; must match the relation type.
        value: Box<dyn Any + Send>,
    },

    /// Removes a relation.
    Unrelate {
        /// Source entity.
        from: Entity,

        /// Target entity.
        to: Entity,

        /// Relation type.
        data_type: DataTypeId,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Create { entity, components } => {
                let columns: Vec<_> = components.iter().map(|(column, _)| *column).collect();
                f.debug_struct("Create").field("entity", entity).field("columns", &columns).finish()
            }
            Command::Destroy { entity } => f.debug_struct("Destroy").field("entity", entity).finish(),
            Command::Add { entity, column, .. } => f.debug_struct("Add").field("entity", entity).field("column", column).finish(),
            Command::Remove { entity, column } => f.debug_struct("Remove").field("entity", entity).field("column", column).finish(),
            Command::Relate { from, to, data_type, .. } => {
                f.debug_struct("Relate").field("from", from).field("to", to).field("data_type", data_type).finish()
            }
            Command::Unrelate { from, to, data_type } => {
                f.debug_struct("Unrelate").field("from", from).field("to", to).field("data_type", data_type).finish()
            }
        }
    }
}

/// FIFO buffer of commands recorded by one system.

#[derive(Default)]
pub struct CommandQueue {
    commands: Mutex<Vec<Command>>,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub fn new() -> Self { Self::default() }

    /// Appends a command.
    pub fn push(&self, command: Command) {
        self.commands.lock().push(command);
    }

    /// Removes and returns every queued command, in recording order.
    pub fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    /// Returns the number of queued commands.
    pub fn len(&self) -> usize { self.commands.lock().len() }

    /// Returns `true` if no command is queued.
    pub fn is_empty(&self) -> bool { self.commands.lock().is_empty() }
}

/// System parameter recording structural changes.

pub struct Commands<'w> {
    world: &'w World,
    queue: &'w CommandQueue,
}

impl<'w> Commands<'w> {
    /// Creates a recorder pushing into `queue`.
    pub fn new(world: &'w World, queue: &'w CommandQueue) -> Self {
        Self { world, queue }
    }

    /// Starts spawning an entity.
    ///
    /// The handle is reserved immediately; the entity becomes alive, with every
    /// component added through the builder, when the commands are applied.
    pub fn spawn(&mut self) -> EntityBuilder<'_> {
        EntityBuilder { world: self.world, queue: self.queue, entity: self.world.reserve(), components: Vec::new() }
    }

    /// Destroys `entity`.
    pub fn despawn(&mut self, entity: Entity) {
        self.queue.push(Command::Destroy { entity });
    }

    /// Adds or replaces component `T` of `entity`.
    ///
    /// ## Panics
    /// Panics if `T` isn't a registered component.
    pub fn add<T: Data>(&mut self, entity: Entity, value: T) {
        let column = component_column::<T>(self.world);
        self.queue.push(Command::Add { entity, column, value: Box::new(value) });
    }

    /// Removes component `T` from `entity`.
    ///
    /// ## Panics
    /// Panics if `T` isn't a registered component.
    pub fn remove<T: Data>(&mut self, entity: Entity) {
        let column = component_column::<T>(self.world);
        self.queue.push(Command::Remove { entity, column });
    }

    /// Relates `from` to `to` with `value`.
    ///
    /// ## Panics
    /// Panics if `R` isn't a registered relation.
    pub fn relate<R: Data>(&mut self, from: Entity, to: Entity, value: R) {
        let data_type = relation_type::<R>(self.world);
        self.queue.push(Command::Relate { from, to, data_type, value: Box::new(value) });
    }

    /// Removes relation `R` from `from` to `to`.
    ///
    /// ## Panics
    /// Panics if `R` isn't a registered relation.
    pub fn unrelate<R: Data>(&mut self, from: Entity, to: Entity) {
        let data_type = relation_type::<R>(self.world);
        self.queue.push(Command::Unrelate { from, to, data_type });
    }
}

/// Builder returned by [`Commands::spawn`].
///
/// The `Create` command is queued when the builder is dropped.

pub struct EntityBuilder<'a> {
    world: &'a World,
    queue: &'a CommandQueue,
    entity: Entity,
    components: Vec<ColumnValue>,
}

impl EntityBuilder<'_> {
    /// Adds component `T`, replacing an earlier value of the same type.
    ///
    /// ## Panics
    /// Panics if `T` isn't a registered component.
    pub fn with<T: Data>(mut self, value: T) -> Self {
        let column = component_column::<T>(self.world);
        self.components.retain(|(existing, _)| *existing != column);
        self.components.push((column, Box::new(value)));
        self
    }

    /// Returns the reserved handle.
    pub fn id(&self) -> Entity { self.entity }
}

impl Drop for EntityBuilder<'_> {
    fn drop(&mut self) {
        let components = std::mem::take(&mut self.components);
        self.queue.push(Command::Create { entity: self.entity, components });
    }
}

/// Resolves the id of relation type `R`.
///
/// ## Panics
/// Panics if `R` isn't a registered relation.
pub fn relation_type<R: 'static>(world: &World) -> DataTypeId {
    match world.types().id_of::<R>() {
        Some(id) if world.types().is_relation(id) => id,
        _ => panic!("`{}` is not a registered relation", type_name::<R>()),
    }
}

impl<'a> SystemParam for Commands<'a> {
    type State = ();
    type Item<'w, 's> = Commands<'w>;

    fn init(_world: &World, _access: &mut SystemAccess) {}

    unsafe fn fetch<'w, 's>(_state: &'s mut (), ctx: SystemContext<'w>) -> Commands<'w> {
        Commands::new(ctx.world, ctx.commands)
    }
}
