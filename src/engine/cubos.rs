//! # Application
//!
//! [`Cubos`] owns the world and drives it: plugins register types, resources,
//! systems and observers on it, [`Cubos::start`] runs the startup systems, and
//! every [`Cubos::update`] runs the main schedule once.
//!
//! ## Lifecycle
//! 1. Construction inserts the [`DeltaTime`], [`ShouldQuit`] and [`Arguments`]
//!    resources.
//! 2. Plugins and systems are registered through the builders.
//! 3. `start` builds the main schedule and runs the startup schedule once.
//! 4. Each `update` applies pending plugin requests, rebuilds the schedules if
//!    anything changed (running newly added startup systems), refreshes
//!    `DeltaTime` and runs the main schedule.
//! 5. `run` loops over `update` until `ShouldQuit` is set.
//!
//! ```
//! use cubos_ecs::prelude::*;
//!
//! struct Counter(u32);
//!
//! fn count(mut counter: ResMut<Counter>, mut quit: ResMut<ShouldQuit>) {
//!     counter.0 += 1;
//!     quit.0 = counter.0 == 3;
//! }
//!
//! let mut cubos = Cubos::with_settings(Settings::default().with_parallel(false));
//! cubos.resource(Counter(0));
//! cubos.system("count").call(count);
//! cubos.run().unwrap();
//!
//! assert_eq!(cubos.world().resource::<Counter>().unwrap().0, 3);
//! ```

use std::env;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::engine::commands::relation_type;
use crate::engine::config::Settings;
use crate::engine::error::{CubosError, CubosResult};
use crate::engine::fetch::component_column;
use crate::engine::observers::{Hook, Observers};
use crate::engine::planner::{Constraints, Planner, Tag, TagId};
use crate::engine::plugins::{Plugin, PluginId, PluginRegistry, PluginRequest};
use crate::engine::registry::Data;
use crate::engine::relation::RelationKind;
use crate::engine::resources::{Arguments, DeltaTime, ShouldQuit};
use crate::engine::scheduler::{Runner, Schedule};
use crate::engine::systems::{BoxedSystem, IntoSystem};
use crate::engine::types::{ColumnId, ObserverId, SystemId};
use crate::engine::world::World;


/// The application: world, schedules, observers and plugins.

pub struct Cubos {
    world: World,
    main: Planner,
    startup: Planner,
    schedule: Schedule,
    observers: Observers,
    plugins: PluginRegistry,
    runner: Runner,
    settings: Settings,
    started: bool,
    dirty: bool,
    last_update: Instant,
}

impl Default for Cubos {
    fn default() -> Self { Self::new() }
}

impl Cubos {
    /// Creates an application configured from the environment.
    pub fn new() -> Self {
        Self::with_settings(Settings::from_env())
    }

    /// Creates an application with explicit settings.
    pub fn with_settings(settings: Settings) -> Self {
        let mut world = World::new();
        world.insert_resource(DeltaTime::default());
        world.insert_resource(ShouldQuit(false));
        world.insert_resource(Arguments(env::args().collect()));

        Self {
            world,
            main: Planner::new(),
            startup: Planner::new(),
            schedule: Schedule::default(),
            observers: Observers::new(),
            plugins: PluginRegistry::new(),
            runner: Runner::new(&settings),
            settings,
            started: false,
            dirty: true,
            last_update: Instant::now(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    /// Returns the world.
    pub fn world(&self) -> &World { &self.world }

    /// Returns the world mutably.
    pub fn world_mut(&mut self) -> &mut World { &mut self.world }

    /// Returns the settings the application was built with.
    pub fn settings(&self) -> &Settings { &self.settings }

    /// Returns `true` once [`Cubos::start`] succeeded.
    pub fn is_started(&self) -> bool { self.started }

    /// Returns the main schedule as of the last build.
    pub fn schedule(&self) -> &Schedule { &self.schedule }

    /// Returns the names of the systems of each main stage.
    pub fn stage_names(&self) -> Vec<Vec<String>> {
        self.schedule.stages().iter()
            .map(|stage| {
                stage.systems.iter()
                    .filter_map(|&id| self.main.system_name(id))
                    .map(str::to_owned)
                    .collect()
            })
            .collect()
    }

    /// Returns the observers.
    pub fn observers(&self) -> &Observers { &self.observers }

    /// Returns `true` if `plugin` (or the plugin injected in its place) is installed.
    pub fn is_installed(&self, plugin: Plugin) -> bool {
        self.plugins.is_installed(PluginId::of(self.plugins.resolve(plugin)))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plugins
    // ─────────────────────────────────────────────────────────────────────

    /// Installs a plugin. Installing an installed plugin does nothing.
    pub fn plugin(&mut self, plugin: Plugin) -> &mut Self {
        self.install(plugin);
        self
    }

    /// Installs a plugin if needed and records that the installing plugin
    /// depends on it.
    pub fn depends(&mut self, plugin: Plugin) -> &mut Self {
        let id = self.install(plugin);
        self.plugins.add_dependency(id);
        self
    }

    /// Installs `replacement` wherever `target` is requested.
    ///
    /// ## Panics
    /// Panics if `target` is already installed.
    pub fn inject(&mut self, target: Plugin, replacement: Plugin) -> &mut Self {
        assert!(
            !self.plugins.is_installed(PluginId::of(target)),
            "cannot inject a replacement for a plugin that is already installed"
        );
        self.plugins.inject(target, replacement);
        self
    }

    /// Uninstalls a plugin, stripping its types from every entity.
    ///
    /// Returns `false` if the plugin isn't installed or other plugins depend
    /// on it.
    pub fn remove_plugin(&mut self, plugin: Plugin) -> bool {
        let id = PluginId::of(self.plugins.resolve(plugin));
        self.uninstall(id, false)
    }

    /// Uninstalls a plugin and destroys every entity holding one of its
    /// component types.
    pub fn destroy_plugin(&mut self, plugin: Plugin) -> bool {
        let id = PluginId::of(self.plugins.resolve(plugin));
        self.uninstall(id, true)
    }

    fn install(&mut self, plugin: Plugin) -> PluginId {
        let plugin = self.plugins.resolve(plugin);
        let id = PluginId::of(plugin);
        if self.plugins.is_installed(id) {
            debug!(plugin = ?id, "plugin already installed");
            return id;
        }

        self.plugins.begin(id);
        plugin(self);
        self.plugins.end();
        self.dirty = true;
        debug!(plugin = ?id, "installed plugin");
        id
    }

    fn uninstall(&mut self, id: PluginId, destroy: bool) -> bool {
        match self.plugins.record(id) {
            None => {
                warn!(plugin = ?id, "cannot uninstall a plugin that isn't installed");
                return false;
            }
            Some(record) if record.dependents > 0 => {
                error!(plugin = ?id, dependents = record.dependents, "cannot uninstall a plugin other plugins depend on");
                return false;
            }
            Some(_) => {}
        }
        let Some(record) = self.plugins.remove(id) else { return false };

        for system in &record.systems {
            self.main.remove_system(*system);
        }
        for system in &record.startup_systems {
            self.startup.remove_system(*system);
        }
        for tag in &record.tags {
            self.main.remove_tag(*tag);
        }
        for tag in &record.startup_tags {
            self.startup.remove_tag(*tag);
        }
        for observer in &record.observers {
            self.observers.unhook(*observer);
        }
        if destroy {
            for component in &record.components {
                self.world.destroy_holders_of(ColumnId::of(*component));
            }
        }
        for component in &record.components {
            self.world.strip_column(ColumnId::of(*component));
        }
        for relation in &record.relations {
            self.world.clear_relation(*relation);
        }
        for resource in &record.resources {
            self.world.remove_resource_dyn(*resource);
        }
        self.dirty = true;
        debug!(plugin = ?id, destroy, "uninstalled plugin");

        for sub in record.subplugins.iter().rev() {
            let removable = self.plugins.record(*sub).is_some_and(|sub| sub.dependents == 0);
            if removable {
                self.uninstall(*sub, destroy);
            }
        }
        true
    }

    fn apply_plugin_requests(&mut self) {
        for request in self.plugins.drain_requests() {
            match request {
                PluginRequest::Add(plugin) => {
                    let id = self.install(plugin);
                    info!(plugin = ?id, "installed plugin at runtime");
                }
                PluginRequest::Remove(plugin) => {
                    self.remove_plugin(plugin);
                }
                PluginRequest::Destroy(plugin) => {
                    self.destroy_plugin(plugin);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a component type.
    pub fn component<T: Data>(&mut self) -> &mut Self {
        let id = self.world.register_component::<T>();
        if let Some(record) = self.plugins.current_mut() {
            record.components.push(id);
        }
        self
    }

    /// Registers a relation type.
    pub fn relation<T: Data>(&mut self, kind: RelationKind) -> &mut Self {
        let id = self.world.register_relation::<T>(kind);
        if let Some(record) = self.plugins.current_mut() {
            record.relations.push(id);
        }
        self
    }

    /// Inserts a resource, registering its type if needed.
    pub fn resource<T: Data>(&mut self, value: T) -> &mut Self {
        self.world.insert_resource(value);
        if let (Some(id), Some(record)) = (self.world.types().id_of::<T>(), self.plugins.current_mut()) {
            record.resources.push(id);
        }
        self
    }

    /// Registers a resource type without a value; systems reading it panic
    /// until a value is inserted.
    pub fn uninit_resource<T: Data>(&mut self) -> &mut Self {
        let id = self.world.register_resource::<T>();
        if let Some(record) = self.plugins.current_mut() {
            record.resources.push(id);
        }
        self
    }

    /// Configures a tag of the main schedule.
    pub fn tag(&mut self, tag: &'static Tag) -> TagBuilder<'_> {
        let id = self.ensure_tag(false, tag);
        TagBuilder { cubos: self, startup: false, id, name: tag.name() }
    }

    /// Configures a tag of the startup schedule.
    pub fn startup_tag(&mut self, tag: &'static Tag) -> TagBuilder<'_> {
        let id = self.ensure_tag(true, tag);
        TagBuilder { cubos: self, startup: true, id, name: tag.name() }
    }

    /// Starts the registration of a main system.
    pub fn system(&mut self, name: impl Into<String>) -> SystemBuilder<'_> {
        SystemBuilder::new(self, name.into(), false)
    }

    /// Starts the registration of a startup system.
    pub fn startup_system(&mut self, name: impl Into<String>) -> SystemBuilder<'_> {
        SystemBuilder::new(self, name.into(), true)
    }

    /// Starts the registration of an observer.
    pub fn observer(&mut self, name: impl Into<String>) -> ObserverBuilder<'_> {
        ObserverBuilder { cubos: self, name: name.into(), hook: None }
    }

    /// Detaches an observer. Returns `false` if it was already detached.
    pub fn unhook(&mut self, observer: ObserverId) -> bool {
        self.observers.unhook(observer)
    }

    fn planner_mut(&mut self, startup: bool) -> &mut Planner {
        if startup { &mut self.startup } else { &mut self.main }
    }

    fn ensure_tag(&mut self, startup: bool, tag: &'static Tag) -> TagId {
        let planner = self.planner_mut(startup);
        if planner.has_tag(tag.id()) {
            return tag.id();
        }
        let id = planner.add_tag(tag);
        if let Some(record) = self.plugins.current_mut() {
            if startup { record.startup_tags.push(id) } else { record.tags.push(id) }
        }
        self.dirty = true;
        id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Builds the main schedule and runs the startup systems.
    ///
    /// ## Errors
    /// [`CubosError::AlreadyStarted`] on a second call, or a schedule error if
    /// the ordering constraints are cyclic.
    pub fn start(&mut self) -> CubosResult<()> {
        if self.started {
            return Err(CubosError::AlreadyStarted);
        }
        info!(
            systems = self.main.len(),
            startup_systems = self.startup.len(),
            plugins = self.plugins.installed().len(),
            "starting application"
        );
        self.refresh()?;
        self.started = true;
        self.last_update = Instant::now();
        Ok(())
    }

    /// Runs one tick. Returns `Ok(false)` once [`ShouldQuit`] is set.
    ///
    /// ## Errors
    /// [`CubosError::NotStarted`] before [`Cubos::start`], or a schedule error
    /// if newly installed plugins made the ordering constraints cyclic.
    pub fn update(&mut self) -> CubosResult<bool> {
        if !self.started {
            return Err(CubosError::NotStarted);
        }
        self.apply_plugin_requests();
        self.refresh()?;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update);
        self.last_update = now;
        if let Some(delta) = self.world.get_resource_mut::<DeltaTime>() {
            delta.value = elapsed.as_secs_f32();
        }

        self.runner.run(&self.schedule, &mut self.main, &mut self.world, &mut self.observers, self.plugins.sender());

        let quit = self.world.resource::<ShouldQuit>().is_some_and(|quit| quit.0);
        Ok(!quit)
    }

    /// Starts the application if needed and updates it until [`ShouldQuit`]
    /// is set.
    pub fn run(&mut self) -> CubosResult<()> {
        if !self.started {
            self.start()?;
        }
        while self.update()? {}
        Ok(())
    }

    fn refresh(&mut self) -> CubosResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.schedule = self.main.build()?;

        if !self.startup.is_empty() {
            let startup = self.startup.build()?;
            self.runner.run(&startup, &mut self.startup, &mut self.world, &mut self.observers, self.plugins.sender());
            self.startup.clear_systems();
        }
        self.dirty = false;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

/// Configures a tag.

pub struct TagBuilder<'a> {
    cubos: &'a mut Cubos,
    startup: bool,
    id: TagId,
    name: &'static str,
}

impl<'a> TagBuilder<'a> {
    /// Makes every member of this tag a member of `parent`.
    pub fn tagged(self, parent: &'static Tag) -> Self {
        let parent = self.cubos.ensure_tag(self.startup, parent);
        self.edit(|constraints| constraints.tags.push(parent))
    }

    /// Runs the members of this tag before the members of `other`.
    pub fn before(self, other: &'static Tag) -> Self {
        let other = self.cubos.ensure_tag(self.startup, other);
        self.edit(|constraints| constraints.before.push(other))
    }

    /// Runs the members of this tag after the members of `other`.
    pub fn after(self, other: &'static Tag) -> Self {
        let other = self.cubos.ensure_tag(self.startup, other);
        self.edit(|constraints| constraints.after.push(other))
    }

    /// Skips the members of this tag in ticks where `condition` returns `false`.
    pub fn run_if<M, C: IntoSystem<bool, M>>(self, condition: C) -> Self {
        let system = condition.into_system(format!("{} condition", self.name), &self.cubos.world);
        let planner = self.cubos.planner_mut(self.startup);
        let condition = planner.add_condition(system);
        self.edit(|constraints| constraints.conditions.push(condition))
    }

    fn edit(self, f: impl FnOnce(&mut Constraints)) -> Self {
        if let Some(constraints) = self.cubos.planner_mut(self.startup).tag_constraints_mut(self.id) {
            f(constraints);
        }
        self.cubos.dirty = true;
        self
    }
}

/// Registers a system.

pub struct SystemBuilder<'a> {
    cubos: &'a mut Cubos,
    name: String,
    startup: bool,
    constraints: Constraints,
    conditions: Vec<BoxedSystem<bool>>,
}

impl<'a> SystemBuilder<'a> {
    fn new(cubos: &'a mut Cubos, name: String, startup: bool) -> Self {
        Self { cubos, name, startup, constraints: Constraints::default(), conditions: Vec::new() }
    }

    /// Adds the system to `tag`.
    pub fn tagged(mut self, tag: &'static Tag) -> Self {
        let tag = self.cubos.ensure_tag(self.startup, tag);
        self.constraints.tags.push(tag);
        self
    }

    /// Runs the system before the members of `tag`.
    pub fn before(mut self, tag: &'static Tag) -> Self {
        let tag = self.cubos.ensure_tag(self.startup, tag);
        self.constraints.before.push(tag);
        self
    }

    /// Runs the system after the members of `tag`.
    pub fn after(mut self, tag: &'static Tag) -> Self {
        let tag = self.cubos.ensure_tag(self.startup, tag);
        self.constraints.after.push(tag);
        self
    }

    /// Skips the system in ticks where `condition` returns `false`.
    pub fn run_if<M, C: IntoSystem<bool, M>>(mut self, condition: C) -> Self {
        let name = format!("{} condition", self.name);
        self.conditions.push(condition.into_system(name, &self.cubos.world));
        self
    }

    /// Registers `f` as the system's body.
    ///
    /// ## Panics
    /// Panics if the parameters of `f` declare an invalid access footprint.
    pub fn call<M, F: IntoSystem<(), M>>(self, f: F) -> SystemId {
        let Self { cubos, name, startup, mut constraints, conditions } = self;
        let system = f.into_system(name, &cubos.world);

        let planner = cubos.planner_mut(startup);
        for condition in conditions {
            constraints.conditions.push(planner.add_condition(condition));
        }
        let id = planner.add_system(system, constraints);

        if let Some(record) = cubos.plugins.current_mut() {
            if startup { record.startup_systems.push(id) } else { record.systems.push(id) }
        }
        cubos.dirty = true;
        id
    }
}

/// Registers an observer.

pub struct ObserverBuilder<'a> {
    cubos: &'a mut Cubos,
    name: String,
    hook: Option<Hook>,
}

impl<'a> ObserverBuilder<'a> {
    /// Fires after component `T` is added to an entity.
    pub fn on_add<T: Data>(self) -> Self {
        let column = component_column::<T>(&self.cubos.world);
        self.with_hook(Hook::Add(column))
    }

    /// Fires before component `T` is removed from an entity.
    pub fn on_remove<T: Data>(self) -> Self {
        let column = component_column::<T>(&self.cubos.world);
        self.with_hook(Hook::Remove(column))
    }

    /// Fires before an entity holding component `T` is destroyed.
    pub fn on_destroy<T: Data>(self) -> Self {
        let column = component_column::<T>(&self.cubos.world);
        self.with_hook(Hook::Destroy(column))
    }

    /// Fires after a relation of type `R` is created.
    pub fn on_relate<R: Data>(self) -> Self {
        let column = ColumnId::of(relation_type::<R>(&self.cubos.world));
        self.with_hook(Hook::Relate(column))
    }

    /// Fires before a relation of type `R` is removed.
    pub fn on_unrelate<R: Data>(self) -> Self {
        let column = ColumnId::of(relation_type::<R>(&self.cubos.world));
        self.with_hook(Hook::Unrelate(column))
    }

    fn with_hook(mut self, hook: Hook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Registers `f` as the observer's body.
    ///
    /// ## Panics
    /// Panics if no hook was chosen, or if the parameters of `f` declare an
    /// invalid access footprint.
    pub fn call<M, F: IntoSystem<(), M>>(self, f: F) -> ObserverId {
        let Some(hook) = self.hook else {
            panic!("observer `{}` has no hook", self.name);
        };
        let system = f.into_system(self.name, &self.cubos.world);
        let id = self.cubos.observers.hook(hook, system);
        if let Some(record) = self.cubos.plugins.current_mut() {
            record.observers.push(id);
        }
        id
    }
}
