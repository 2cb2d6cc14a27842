//! ECS System Abstractions
//!
//! This module defines the *system execution model* used by the engine.
//!
//! A **system** is a unit of logic that operates over the world. Systems:
//! - declare what they read and write through the types of their parameters,
//! - are scheduled based on access conflicts,
//! - may be executed sequentially or in parallel,
//! - never mutate the world's structure directly; they queue commands instead.
//!
//! ## Parameters
//!
//! Any function whose parameters all implement [`SystemParam`] is a system:
//!
//! ```ignore
//! fn integrate(dt: Res<DeltaTime>, mut query: Query<(&mut Position, &Velocity)>) {
//!     for (position, velocity) in &mut query {
//!         position.x += velocity.x * dt.scaled();
//!     }
//! }
//! ```
//!
//! Each parameter contributes to the system's [`SystemAccess`] when the system
//! is registered. Conflicting parameters inside one system (for example a
//! resource both read and written) are a programming error and panic at
//! registration.
//!
//! ## System Trait
//!
//! The [`System`] trait defines the minimal interface required for execution:
//!
//! - [`System::name`] identifies the system in logs and errors.
//! - [`System::access`] exposes the footprint used for scheduling.
//! - [`System::run`] executes the system logic.
//!
//! All systems must be `Send + Sync` to allow execution on worker threads.
//!
//! ## Function-backed Systems
//!
//! [`FunctionSystem`] adapts a plain function to [`System`]. Parameter state
//! (resolved type ids, cached query matches) lives in the function system and
//! survives across runs.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::any::type_name;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::engine::access::SystemAccess;
use crate::engine::commands::CommandQueue;
use crate::engine::observers::Trigger;
use crate::engine::plugins::PluginSender;
use crate::engine::registry::Data;
use crate::engine::types::DataTypeId;
use crate::engine::world::World;


/// Everything a running system may reach.
///
/// ## Notes
/// Every system gets its own command queue, so queues are never contended
/// within a stage.

#[derive(Clone, Copy)]
pub struct SystemContext<'w> {
    /// The world, shared by every system of the stage.
    pub world: &'w World,

    /// Queue receiving the system's structural commands.
    pub commands: &'w CommandQueue,

    /// Channel receiving plugin requests.
    pub plugins: &'w PluginSender,

    /// The change that triggered an observer, `None` for regular systems.
    pub trigger: Option<Trigger>,
}

/// A value that can be injected into a system.
///
/// ## Design
/// `State` is created once, when the system is registered, and is handed
/// back on every run. `Item` is the same parameter type with the lifetimes
/// of one run.

pub trait SystemParam: Sized {
    /// Data kept across runs.
    type State: Send + Sync + 'static;

    /// The parameter as seen by one run.
    type Item<'w, 's>: SystemParam<State = Self::State>;

    /// Creates the parameter state and records its access.
    ///
    /// ## Panics
    /// Panics if a referenced type isn't registered with the right kind.
    fn init(world: &World, access: &mut SystemAccess) -> Self::State;

    /// Builds the parameter for one run.
    ///
    /// ## Safety
    /// The caller must guarantee that no system whose access conflicts with
    /// the one recorded by `init` runs concurrently.
    unsafe fn fetch<'w, 's>(state: &'s mut Self::State, ctx: SystemContext<'w>) -> Self::Item<'w, 's>;
}

/// The run-time item of parameter `P`.
pub type SystemParamItem<'w, 's, P> = <P as SystemParam>::Item<'w, 's>;

/// A schedulable unit of logic.

pub trait System<Out = ()>: Send + Sync {
    /// Returns the name of the system.
    fn name(&self) -> &str;

    /// Returns the access footprint of the system.
    fn access(&self) -> &SystemAccess;

    /// Runs the system once.
    ///
    /// ## Safety
    /// The caller must guarantee that no system whose access conflicts with
    /// [`System::access`] runs concurrently, and that the world isn't
    /// structurally modified while the system runs.
    unsafe fn run(&mut self, ctx: SystemContext<'_>) -> Out;
}

/// Boxed system returning `Out`.
pub type BoxedSystem<Out = ()> = Box<dyn System<Out>>;

// ─────────────────────────────────────────────────────────────────────────────
// Resources
// ─────────────────────────────────────────────────────────────────────────────

/// Shared access to resource `T`.

pub struct Res<'w, T: Data> {
    guard: RwLockReadGuard<'w, T>,
}

impl<T: Data> Deref for Res<'_, T> {
    type Target = T;

    fn deref(&self) -> &T { &self.guard }
}

/// Exclusive access to resource `T`.

pub struct ResMut<'w, T: Data> {
    guard: RwLockWriteGuard<'w, T>,
}

impl<T: Data> Deref for ResMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T { &self.guard }
}

impl<T: Data> DerefMut for ResMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T { &mut self.guard }
}

fn resource_id<T: Data>(world: &World) -> DataTypeId {
    match world.types().id_of::<T>() {
        Some(id) if world.types().is_resource(id) => id,
        _ => panic!("`{}` is not a registered resource", type_name::<T>()),
    }
}

impl<'a, T: Data> SystemParam for Res<'a, T> {
    type State = DataTypeId;
    type Item<'w, 's> = Res<'w, T>;

    fn init(world: &World, access: &mut SystemAccess) -> DataTypeId {
        let id = resource_id::<T>(world);
        access.read_resource(id);
        id
    }

    unsafe fn fetch<'w, 's>(_state: &'s mut DataTypeId, ctx: SystemContext<'w>) -> Res<'w, T> {
        match ctx.world.resource::<T>() {
            Some(guard) => Res { guard },
            None => panic!("resource `{}` has no value", type_name::<T>()),
        }
    }
}

impl<'a, T: Data> SystemParam for ResMut<'a, T> {
    type State = DataTypeId;
    type Item<'w, 's> = ResMut<'w, T>;

    fn init(world: &World, access: &mut SystemAccess) -> DataTypeId {
        let id = resource_id::<T>(world);
        access.write_resource(id);
        id
    }

    unsafe fn fetch<'w, 's>(_state: &'s mut DataTypeId, ctx: SystemContext<'w>) -> ResMut<'w, T> {
        match ctx.world.resource_mut::<T>() {
            Some(guard) => ResMut { guard },
            None => panic!("resource `{}` has no value", type_name::<T>()),
        }
    }
}

impl<'a> SystemParam for &'a World {
    type State = ();
    type Item<'w, 's> = &'w World;

    fn init(_world: &World, access: &mut SystemAccess) {
        access.use_world();
    }

    unsafe fn fetch<'w, 's>(_state: &'s mut (), ctx: SystemContext<'w>) -> &'w World {
        ctx.world
    }
}

macro_rules! impl_system_param_tuple {
    ($($P:ident $p:ident),*) => {
        #[allow(unused_variables, clippy::unused_unit)]
        impl<$($P: SystemParam),*> SystemParam for ($($P,)*) {
            type State = ($($P::State,)*);
            type Item<'w, 's> = ($($P::Item<'w, 's>,)*);

            fn init(world: &World, access: &mut SystemAccess) -> Self::State {
                ($({
                    let mut own = SystemAccess::new();
                    let state = $P::init(world, &mut own);
                    access.merge(&own, world.types());
                    state
                },)*)
            }

            unsafe fn fetch<'w, 's>(state: &'s mut Self::State, ctx: SystemContext<'w>) -> Self::Item<'w, 's> {
                let ($($p,)*) = state;
                // SAFETY: forwarded to the caller.
                ($(unsafe { $P::fetch($p, ctx) },)*)
            }
        }
    };
}

impl_system_param_tuple!();
impl_system_param_tuple!(A a);
impl_system_param_tuple!(A a, B b);
impl_system_param_tuple!(A a, B b, C c);
impl_system_param_tuple!(A a, B b, C c, D d);
impl_system_param_tuple!(A a, B b, C c, D d, E e);
impl_system_param_tuple!(A a, B b, C c, D d, E e, F f);
impl_system_param_tuple!(A a, B b, C c, D d, E e, F f, G g);
impl_system_param_tuple!(A a, B b, C c, D d, E e, F f, G g, H h);

// ─────────────────────────────────────────────────────────────────────────────
// Function systems
// ─────────────────────────────────────────────────────────────────────────────

/// A function usable as a system.
///
/// `Marker` only disambiguates the blanket implementations for functions of
/// different arities.

pub trait SystemFunction<Marker>: Send + Sync + 'static {
    /// Parameters of the function, as a tuple.
    type Param: SystemParam;

    /// Return type of the function.
    type Out;

    /// Calls the function.
    fn call(&mut self, params: SystemParamItem<'_, '_, Self::Param>) -> Self::Out;
}

macro_rules! impl_system_function {
    ($($P:ident $p:ident),*) => {
        #[allow(non_snake_case, unused_variables, clippy::too_many_arguments)]
        impl<Out, Func, $($P: SystemParam),*> SystemFunction<fn($($P,)*) -> Out> for Func
        where
            Func: Send + Sync + 'static,
            for<'a> &'a mut Func: FnMut($($P),*) -> Out + FnMut($(SystemParamItem<$P>),*) -> Out,
            Out: 'static,
        {
            type Param = ($($P,)*);
            type Out = Out;

            fn call(&mut self, params: SystemParamItem<'_, '_, ($($P,)*)>) -> Out {
                fn call_inner<Out, $($P),*>(mut f: impl FnMut($($P),*) -> Out, $($p: $P),*) -> Out {
                    f($($p),*)
                }
                let ($($p,)*) = params;
                call_inner(self, $($p),*)
            }
        }
    };
}

impl_system_function!();
impl_system_function!(A a);
impl_system_function!(A a, B b);
impl_system_function!(A a, B b, C c);
impl_system_function!(A a, B b, C c, D d);
impl_system_function!(A a, B b, C c, D d, E e);
impl_system_function!(A a, B b, C c, D d, E e, F f);
impl_system_function!(A a, B b, C c, D d, E e, F f, G g);
impl_system_function!(A a, B b, C c, D d, E e, F f, G g, H h);

/// A [`System`] backed by a function.
///
/// It stores:
/// - the function itself,
/// - the state of its parameters,
/// - the access footprint derived from the parameter types,
/// - a human-readable name.

pub struct FunctionSystem<Marker, F: SystemFunction<Marker>> {
    func: F,
    state: <F::Param as SystemParam>::State,
    access: SystemAccess,
    name: String,
    _marker: PhantomData<fn() -> Marker>,
}

impl<Marker, F: SystemFunction<Marker>> FunctionSystem<Marker, F> {
    /// Wraps `func`, initializing its parameters against `world`.
    ///
    /// ## Panics
    /// Panics if the parameters declare an invalid access footprint.
    pub fn new(name: impl Into<String>, func: F, world: &World) -> Self {
        let name = name.into();
        let mut access = SystemAccess::new();
        let state = <F::Param as SystemParam>::init(world, &mut access);
        if let Err(error) = access.validate(world.types()) {
            panic!("system `{name}` has invalid access: {error}");
        }
        Self { func, state, access, name, _marker: PhantomData }
    }
}

impl<Marker, F> System<F::Out> for FunctionSystem<Marker, F>
where
    Marker: 'static,
    F: SystemFunction<Marker>,
{
    fn name(&self) -> &str { &self.name }

    fn access(&self) -> &SystemAccess { &self.access }

    unsafe fn run(&mut self, ctx: SystemContext<'_>) -> F::Out {
        // SAFETY: forwarded to the caller.
        let params = unsafe { <F::Param as SystemParam>::fetch(&mut self.state, ctx) };
        self.func.call(params)
    }
}

/// Conversion into a boxed [`System`].

pub trait IntoSystem<Out, Marker>: Sized {
    /// Builds the system, initializing its parameters against `world`.
    ///
    /// ## Panics
    /// Panics if the parameters declare an invalid access footprint.
    fn into_system(self, name: impl Into<String>, world: &World) -> BoxedSystem<Out>;
}

impl<Marker, F> IntoSystem<F::Out, Marker> for F
where
    Marker: 'static,
    F: SystemFunction<Marker>,
{
    fn into_system(self, name: impl Into<String>, world: &World) -> BoxedSystem<F::Out> {
        Box::new(FunctionSystem::new(name, self, world))
    }
}
