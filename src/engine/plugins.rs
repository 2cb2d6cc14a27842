//! # Plugins
//!
//! A plugin is a function that registers types, resources, systems, tags and
//! observers on an application. Plugins are the unit of installation and
//! removal: everything registered while a plugin is installing is recorded in
//! its [`PluginRecord`], so that uninstalling the plugin can undo it.
//!
//! ## Runtime requests
//! Systems can't change the plugin graph while the schedule runs. They send
//! [`PluginRequest`]s through the [`Plugins`] parameter instead; the requests
//! travel over a channel owned by the application and are applied at the
//! start of the next update, before any system runs.
//!
//! ## Dependencies
//! A plugin may depend on another plugin. A plugin with dependents can't be
//! uninstalled; sub-plugins installed from inside a plugin are uninstalled
//! together with it.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::engine::access::SystemAccess;
use crate::engine::cubos::Cubos;
use crate::engine::planner::TagId;
use crate::engine::systems::{SystemContext, SystemParam};
use crate::engine::types::{DataTypeId, ObserverId, SystemId};
use crate::engine::world::World;


/// A plugin installs its registrations on the application.
pub type Plugin = fn(&mut Cubos);

/// Identity of a plugin function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PluginId(usize);

impl PluginId {
    /// Returns the identity of `plugin`.
    pub fn of(plugin: Plugin) -> Self {
        Self(plugin as usize)
    }
}

/// A change of the plugin graph requested while systems run.
#[derive(Clone, Copy, Debug)]
pub enum PluginRequest {
    /// Install the plugin.
    Add(Plugin),

    /// Uninstall the plugin, stripping its types from every entity.
    Remove(Plugin),

    /// Uninstall the plugin and destroy every entity holding one of its
    /// component types.
    Destroy(Plugin),
}

/// Sending end of the plugin request channel.
pub type PluginSender = Sender<PluginRequest>;

/// System parameter requesting plugin graph changes.

pub struct Plugins<'w> {
    sender: &'w PluginSender,
}

impl<'w> Plugins<'w> {
    /// Creates a requester sending through `sender`.
    pub fn new(sender: &'w PluginSender) -> Self {
        Self { sender }
    }

    /// Requests the installation of `plugin`.
    pub fn add(&mut self, plugin: Plugin) {
        self.send(PluginRequest::Add(plugin));
    }

    /// Requests the removal of `plugin`.
    pub fn remove(&mut self, plugin: Plugin) {
        self.send(PluginRequest::Remove(plugin));
    }

    /// Requests the removal of `plugin` and the destruction of its entities.
    pub fn destroy(&mut self, plugin: Plugin) {
        self.send(PluginRequest::Destroy(plugin));
    }

    fn send(&self, request: PluginRequest) {
        if self.sender.send(request).is_err() {
            warn!(?request, "plugin request dropped: the application is gone");
        }
    }
}

impl<'a> SystemParam for Plugins<'a> {
    type State = ();
    type Item<'w, 's> = Plugins<'w>;

    fn init(_world: &World, _access: &mut SystemAccess) {}

    unsafe fn fetch<'w, 's>(_state: &'s mut (), ctx: SystemContext<'w>) -> Plugins<'w> {
        Plugins::new(ctx.plugins)
    }
}

/// Everything a plugin registered.

#[derive(Clone, Debug, Default)]
pub struct PluginRecord {
    /// Main systems.
    pub systems: Vec<SystemId>,

    /// Startup systems.
    pub startup_systems: Vec<SystemId>,

    /// Observers.
    pub observers: Vec<ObserverId>,

    /// Main tags.
    pub tags: Vec<TagId>,

    /// Startup tags.
    pub startup_tags: Vec<TagId>,

    /// Component types.
    pub components: Vec<DataTypeId>,

    /// Relation types.
    pub relations: Vec<DataTypeId>,

    /// Resource types.
    pub resources: Vec<DataTypeId>,

    /// Plugins this one depends on.
    pub depends_on: Vec<PluginId>,

    /// Plugins installed from inside this one.
    pub subplugins: Vec<PluginId>,

    /// Number of installed plugins depending on this one.
    pub dependents: usize,
}

/// Bookkeeping of installed plugins.

pub struct PluginRegistry {
    records: HashMap<PluginId, PluginRecord>,
    order: Vec<PluginId>,
    injections: HashMap<PluginId, Plugin>,
    installing: Vec<PluginId>,
    sender: PluginSender,
    receiver: Receiver<PluginRequest>,
}

impl Default for PluginRegistry {
    fn default() -> Self { Self::new() }
}

impl PluginRegistry {
    /// Creates an empty registry with a fresh request channel.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            injections: HashMap::new(),
            installing: Vec::new(),
            sender,
            receiver,
        }
    }

    /// Returns the sending end of the request channel.
    pub fn sender(&self) -> &PluginSender { &self.sender }

    /// Drains every pending request, in sending order.
    pub fn drain_requests(&self) -> Vec<PluginRequest> {
        self.receiver.try_iter().collect()
    }

    /// Replaces `target` by `replacement` in later installations.
    pub fn inject(&mut self, target: Plugin, replacement: Plugin) {
        self.injections.insert(PluginId::of(target), replacement);
    }

    /// Returns the plugin installed in place of `plugin`.
    pub fn resolve(&self, plugin: Plugin) -> Plugin {
        self.injections.get(&PluginId::of(plugin)).copied().unwrap_or(plugin)
    }

    /// Returns `true` if `id` is installed or installing.
    pub fn is_installed(&self, id: PluginId) -> bool {
        self.records.contains_key(&id)
    }

    /// Returns the record of `id`.
    pub fn record(&self, id: PluginId) -> Option<&PluginRecord> {
        self.records.get(&id)
    }

    /// Returns the installed plugins, in installation order.
    pub fn installed(&self) -> &[PluginId] { &self.order }

    /// Returns the plugin currently installing.
    pub fn current(&self) -> Option<PluginId> {
        self.installing.last().copied()
    }

    /// Returns the record of the plugin currently installing.
    pub fn current_mut(&mut self) -> Option<&mut PluginRecord> {
        let id = self.current()?;
        self.records.get_mut(&id)
    }

    /// Starts recording the registrations of `id`.
    pub fn begin(&mut self, id: PluginId) {
        if let Some(parent) = self.current_mut() {
            parent.subplugins.push(id);
        }
        self.records.insert(id, PluginRecord::default());
        self.order.push(id);
        self.installing.push(id);
    }

    /// Stops recording the registrations of the current plugin.
    pub fn end(&mut self) {
        self.installing.pop();
    }

    /// Records that the current plugin depends on `dependency`.
    pub fn add_dependency(&mut self, dependency: PluginId) {
        let Some(current) = self.current() else { return };
        if current == dependency {
            return;
        }
        if let Some(record) = self.records.get_mut(&current) {
            if record.depends_on.contains(&dependency) {
                return;
            }
            record.depends_on.push(dependency);
        }
        if let Some(record) = self.records.get_mut(&dependency) {
            record.dependents += 1;
        }
    }

    /// Removes the record of `id`, releasing its dependencies.
    pub fn remove(&mut self, id: PluginId) -> Option<PluginRecord> {
        let record = self.records.remove(&id)?;
        self.order.retain(|other| *other != id);
        for dependency in &record.depends_on {
            if let Some(dependency) = self.records.get_mut(dependency) {
                dependency.dependents = dependency.dependents.saturating_sub(1);
            }
        }
        for record in self.records.values_mut() {
            record.subplugins.retain(|other| *other != id);
        }
        Some(record)
    }
}
