//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! The modules are layered bottom-up:
//! - identifiers, errors and the type registry
//! - storage: columns, dense tables, sparse relation tables
//! - the entity pool, the archetype graph and the world tying them together
//! - queries, system parameters, commands and observers
//! - planning, scheduling, plugins and the application driver
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod registry;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod dense;
pub mod relation;
pub mod world;
pub mod access;
pub mod fetch;
pub mod query;
pub mod systems;
pub mod commands;
pub mod observers;
pub mod planner;
pub mod scheduler;
pub mod plugins;
pub mod config;
pub mod resources;
pub mod cubos;
