//! Error types for scheduling, access analysis and type-erased storage.
//!
//! Only conditions the caller can act on are modelled here. Broken invariants
//! (out-of-range rows, dead entity handles in structural operations, observer
//! flush overflow) are not errors: they panic at the point of detection, since
//! continuing would operate on corrupted tables.
//!
//! ## Taxonomy
//! * [`AccessError`]: a system declared an access footprint that can never be
//!   scheduled safely.
//! * [`ScheduleError`]: the tag/system ordering graph cannot be turned into an
//!   execution plan.
//! * [`StorageError`]: a type-erased value was routed to a column of another type.
//! * [`CubosError`]: aggregate error returned by the application driver.
//!
//! ## Display vs. Debug
//! `Display` output is short and meant for logs. `Debug` keeps the full
//! structure for diagnostics.

use thiserror::Error;

/// Returned when a system's declared access is self-contradictory.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The same resource is declared both read and written.
    #[error("resource `{resource}` is both read and written")]
    ResourceReadAndWritten {
        /// Name of the offending resource type.
        resource: String,
    },

    /// A component is reachable mutably through one parameter and also
    /// through another parameter of the same system.
    #[error("component `{component}` is aliased by a mutable fetch")]
    ComponentAliased {
        /// Name of the offending component type.
        component: String,
    },

    /// Direct world access combined with any other declared access.
    #[error("direct world access cannot be combined with other access")]
    WorldWithOtherAccess,
}

/// Returned when the execution plan of a schedule cannot be built.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The `before`/`after` constraints form a cycle.
    ///
    /// `cycle` lists the systems on the cycle in execution order, with the
    /// first system repeated at the end.
    #[error("ordering constraints form a cycle: {}", cycle.join(" -> "))]
    Cycle {
        /// Names of the systems forming the cycle.
        cycle: Vec<String>,
    },
}

/// Returned when a type-erased value doesn't match the element type of a column.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The boxed value's type differs from the column's element type.
    #[error("type mismatch: column stores `{expected}`, got a value of another type")]
    TypeMismatch {
        /// Element type name of the column.
        expected: &'static str,
    },

    /// Two columns of different element types were used in a move.
    #[error("cannot move between columns of `{from}` and `{to}`")]
    ColumnMismatch {
        /// Element type name of the source column.
        from: &'static str,

        /// Element type name of the destination column.
        to: &'static str,
    },
}

/// Aggregate error surfaced by [`Cubos`](crate::engine::cubos::Cubos).

#[derive(Debug, Error)]
pub enum CubosError {
    /// A schedule could not be built.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// `update` was called before `start`.
    #[error("the application has not been started")]
    NotStarted,

    /// `start` was called twice.
    #[error("the application has already been started")]
    AlreadyStarted,
}

/// Convenience alias for application-level results.
pub type CubosResult<T> = Result<T, CubosError>;
