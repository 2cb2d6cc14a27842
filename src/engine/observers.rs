//! # Observers
//!
//! Observers are systems fired synchronously when a structural change is
//! applied to the world.
//!
//! ## Hooks
//! An observer is attached to one [`Hook`]: the addition, removal or
//! destruction of a component column, or the creation or removal of a
//! relation. While the change is applied, every observer of the matching hook
//! runs with a [`Trigger`] naming the affected entity (and, for relations, the
//! other endpoint).
//!
//! ## Timing
//! * `Add` and `Relate` observers run after the change, so they can read the
//!   new data.
//! * `Remove`, `Unrelate` and `Destroy` observers run before the change, so
//!   they can still read the data that is about to go away.
//!
//! ## Fixed point
//! Observers cannot mutate the world's structure directly. Their commands are
//! queued and applied in the next iteration of [`Observers::flush`], which
//! repeats until no command is left. The number of iterations is capped; a
//! flush that doesn't settle indicates an observer cycle and panics.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::engine::access::SystemAccess;
use crate::engine::commands::{Command, CommandQueue};
use crate::engine::entity::Entity;
use crate::engine::plugins::PluginSender;
use crate::engine::systems::{BoxedSystem, SystemContext, SystemParam};
use crate::engine::types::{ColumnId, ObserverId};
use crate::engine::world::World;


/// Structural change an observer reacts to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Hook {
    /// A component column was added to an entity.
    Add(ColumnId),

    /// A component column is about to be removed from an entity.
    Remove(ColumnId),

    /// An entity holding the column is about to be destroyed.
    Destroy(ColumnId),

    /// A relation of the column's type was created.
    Relate(ColumnId),

    /// A relation of the column's type is about to be removed.
    Unrelate(ColumnId),
}

/// The change that fired an observer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Trigger {
    entity: Entity,
    target: Option<Entity>,
}

impl Trigger {
    /// A change affecting `entity`.
    pub fn new(entity: Entity) -> Self {
        Self { entity, target: None }
    }

    /// A relation change from `entity` to `target`.
    pub fn with_target(entity: Entity, target: Entity) -> Self {
        Self { entity, target: Some(target) }
    }

    /// The affected entity (the `from` side for relations).
    pub fn entity(&self) -> Entity { self.entity }

    /// The `to` side of a relation change.
    pub fn target(&self) -> Option<Entity> { self.target }
}

impl SystemParam for Trigger {
    type State = ();
    type Item<'w, 's> = Trigger;

    fn init(_world: &World, _access: &mut SystemAccess) {}

    unsafe fn fetch<'w, 's>(_state: &'s mut (), ctx: SystemContext<'w>) -> Trigger {
        match ctx.trigger {
            Some(trigger) => trigger,
            None => panic!("`Trigger` is only available to observers"),
        }
    }
}

struct Observer {
    hook: Hook,
    system: BoxedSystem,
}

/// Registry of observers, indexed by hook.

#[derive(Default)]
pub struct Observers {
    slots: Vec<Option<Observer>>,
    by_hook: HashMap<Hook, Vec<ObserverId>>,
}

impl Observers {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Attaches `system` to `hook`.
    pub fn hook(&mut self, hook: Hook, system: BoxedSystem) -> ObserverId {
        let id = ObserverId(self.slots.len());
        debug!(observer = system.name(), ?hook, "hooked observer");
        self.slots.push(Some(Observer { hook, system }));
        self.by_hook.entry(hook).or_default().push(id);
        id
    }

    /// Detaches an observer. Returns `false` if it was already detached.
    pub fn unhook(&mut self, id: ObserverId) -> bool {
        let Some(observer) = self.slots.get_mut(id.0).and_then(Option::take) else {
            return false;
        };
        if let Some(ids) = self.by_hook.get_mut(&observer.hook) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_hook.remove(&observer.hook);
            }
        }
        debug!(observer = observer.system.name(), "unhooked observer");
        true
    }

    /// Returns the number of attached observers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` if no observer is attached.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns `true` if at least one observer is attached to `hook`.
    pub fn is_hooked(&self, hook: Hook) -> bool {
        self.by_hook.contains_key(&hook)
    }

    /// Applies `commands` to `world`, firing observers until no command is left.
    ///
    /// ## Panics
    /// Panics if the commands haven't settled after `max_iterations` rounds.
    pub fn flush(&mut self, world: &mut World, commands: Vec<Command>, plugins: &PluginSender, max_iterations: usize) {
        let queue = CommandQueue::new();
        let mut pending = commands;
        let mut iteration = 0;

        while !pending.is_empty() {
            iteration += 1;
            assert!(
                iteration <= max_iterations,
                "observer flush did not settle after {max_iterations} iterations: observers keep issuing commands"
            );
            trace!(iteration, commands = pending.len(), "applying commands");

            for command in pending.drain(..) {
                self.apply(world, command, &queue, plugins);
            }
            pending = queue.take();
        }
    }

    fn apply(&mut self, world: &mut World, command: Command, queue: &CommandQueue, plugins: &PluginSender) {
        match command {
            Command::Create { entity, components } => {
                if !world.is_reserved(entity) {
                    debug!(%entity, "skipping creation of a released reservation");
                    return;
                }
                let columns: Vec<_> = components.iter().map(|(column, _)| *column).collect();
                world.create_reserved_with(entity, components);
                for column in columns {
                    self.notify(Hook::Add(column), Trigger::new(entity), world, queue, plugins);
                }
            }

            Command::Destroy { entity } => {
                if !world.is_alive(entity) {
                    world.destroy(entity);
                    return;
                }
                for column in world.columns(entity).to_vec() {
                    self.notify(Hook::Destroy(column), Trigger::new(entity), world, queue, plugins);
                }
                world.destroy(entity);
            }

            Command::Add { entity, column, value } => {
                if !world.is_alive(entity) {
                    debug!(%entity, "skipping component addition to a dead entity");
                    return;
                }
                let added = !world.archetypes().contains(world.archetype(entity), column);
                world.insert_dyn(entity, column, value);
                if added {
                    self.notify(Hook::Add(column), Trigger::new(entity), world, queue, plugins);
                }
            }

            Command::Remove { entity, column } => {
                if !world.archetypes().contains(world.archetype(entity), column) {
                    return;
                }
                self.notify(Hook::Remove(column), Trigger::new(entity), world, queue, plugins);
                world.remove_dyn(entity, column);
            }

            Command::Relate { from, to, data_type, value } => {
                if !world.is_alive(from) || !world.is_alive(to) {
                    debug!(%from, %to, "skipping relation between dead entities");
                    return;
                }
                let column = ColumnId::of(data_type);
                if let Some(previous) = world.tree_target_dyn(from, data_type).filter(|&previous| previous != to) {
                    let trigger = Trigger::with_target(from, previous);
                    self.notify(Hook::Unrelate(column), trigger, world, queue, plugins);
                }
                let added = !world.related_dyn(from, to, data_type);
                world.relate_dyn(from, to, data_type, value);
                if added {
                    let trigger = Trigger::with_target(from, to);
                    self.notify(Hook::Relate(column), trigger, world, queue, plugins);
                }
            }

            Command::Unrelate { from, to, data_type } => {
                if !world.related_dyn(from, to, data_type) {
                    return;
                }
                let trigger = Trigger::with_target(from, to);
                self.notify(Hook::Unrelate(ColumnId::of(data_type)), trigger, world, queue, plugins);
                world.unrelate_dyn(from, to, data_type);
            }
        }
    }

    fn notify(&mut self, hook: Hook, trigger: Trigger, world: &World, queue: &CommandQueue, plugins: &PluginSender) {
        let Some(ids) = self.by_hook.get(&hook) else { return };

        for id in ids.clone() {
            let Some(observer) = self.slots.get_mut(id.0).and_then(Option::as_mut) else { continue };
            trace!(observer = observer.system.name(), ?hook, entity = %trigger.entity(), "running observer");
            let ctx = SystemContext { world, commands: queue, plugins, trigger: Some(trigger) };
            // SAFETY: observers run one at a time while the flush holds the
            // world exclusively.
            unsafe { observer.system.run(ctx) };
        }
    }
}
