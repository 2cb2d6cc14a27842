//! # Cubos ECS
//!
//! Parallel Entity-Component-System core with first-class relations.
//!
//! ## Design Goals
//! - Archetype-based dense storage for components
//! - Sparse tables for relations between entities, including symmetric,
//!   tree and ephemeral relations
//! - Access-checked systems packed into parallel stages
//! - Deferred structural changes, applied between stages through observers
//! - Plugins as the unit of installation and removal
//!
//! ## Quick start
//! ```
//! use cubos_ecs::prelude::*;
//!
//! struct Position(f32);
//! struct Velocity(f32);
//!
//! fn spawn(mut commands: Commands) {
//!     commands.spawn().with(Position(0.0)).with(Velocity(2.0));
//! }
//!
//! fn integrate(mut query: Query<(&mut Position, &Velocity)>) {
//!     for (position, velocity) in &mut query {
//!         position.0 += velocity.0;
//!     }
//! }
//!
//! let mut cubos = Cubos::with_settings(Settings::default().with_parallel(false));
//! cubos.component::<Position>().component::<Velocity>();
//! cubos.startup_system("spawn").call(spawn);
//! cubos.system("integrate").call(integrate);
//!
//! cubos.start().unwrap();
//! cubos.update().unwrap();
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Storage

pub use engine::world::World;

pub use engine::entity::{
    Entity,
    EntityLocation,
    EntityPool,
};

pub use engine::archetype::ArchetypeGraph;
pub use engine::registry::{Data, DataKind, TypeRegistry};
pub use engine::relation::RelationKind;

// Queries and systems

pub use engine::fetch::{QueryData, QueryFilter, ReadOnlyQueryData, With, Without};

pub use engine::query::{
    Query,
    QueryState,
    RelationQuery,
    RelationQueryState,
    Random,
    Up,
    Down,
};

pub use engine::access::SystemAccess;

pub use engine::systems::{
    System,
    SystemParam,
    IntoSystem,
    Res,
    ResMut,
};

pub use engine::commands::{Command, Commands};
pub use engine::observers::{Hook, Trigger};

// Application

pub use engine::planner::{Planner, Tag, TagId};
pub use engine::scheduler::{Schedule, Stage};
pub use engine::plugins::{Plugin, Plugins};
pub use engine::config::Settings;
pub use engine::resources::{Arguments, DeltaTime, ShouldQuit};
pub use engine::cubos::Cubos;

pub use engine::error::{
    AccessError,
    ScheduleError,
    StorageError,
    CubosError,
    CubosResult,
};

pub use engine::types::{
    ArchetypeId,
    ColumnId,
    DataTypeId,
    ObserverId,
    SystemId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use cubos_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Cubos,
        World,
        Entity,
        RelationKind,
        Query,
        RelationQuery,
        Up,
        Down,
        With,
        Without,
        Res,
        ResMut,
        Commands,
        Plugins,
        Trigger,
        Tag,
        Settings,
        DeltaTime,
        ShouldQuit,
        Arguments,
    };
}
