use std::collections::HashSet;

use cubos_ecs::engine::entity::{EntityLocation, EntityPool};
use cubos_ecs::engine::archetype::ArchetypeGraph;
use cubos_ecs::{ArchetypeId, ColumnId, DataTypeId, Entity, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, PartialEq)]
struct Name(String);

fn world() -> World {
    let mut world = World::new();
    world.register_component::<Position>();
    world.register_component::<Velocity>();
    world.register_component::<Name>();
    world
}

fn here() -> EntityLocation {
    EntityLocation { archetype: ArchetypeId::EMPTY, row: 0 }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity pool
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn recycled_slots_never_revive_stale_handles() {
    let mut pool = EntityPool::new();
    let mut alive: Vec<Entity> = Vec::new();
    let mut dead: Vec<Entity> = Vec::new();

    for round in 0..200u32 {
        if round % 3 == 2 && !alive.is_empty() {
            let victim = alive.remove((round as usize * 7) % alive.len());
            assert!(pool.destroy(victim));
            dead.push(victim);
        } else {
            alive.push(pool.create(here()));
        }

        let unique: HashSet<_> = alive.iter().copied().collect();
        assert_eq!(unique.len(), alive.len(), "two live entities share a handle");
        assert!(dead.iter().all(|&entity| !pool.is_alive(entity)));
        assert!(alive.iter().all(|&entity| pool.is_alive(entity)));
    }
    assert_eq!(pool.alive_count(), alive.len());
}

#[test]
fn destroyed_index_is_recycled_with_new_generation() {
    let mut pool = EntityPool::new();
    let first = pool.create(here());
    assert!(pool.destroy(first));
    assert!(!pool.destroy(first), "stale handles can't be destroyed twice");

    let second = pool.create(here());
    assert_eq!(second.index, first.index);
    assert_ne!(second.generation, first.generation);
    assert!(!pool.is_alive(first));
    assert!(pool.is_alive(second));
}

#[test]
fn reservations_are_not_alive_until_created() {
    let mut world = world();
    let entity = world.reserve();
    assert!(world.is_reserved(entity));
    assert!(!world.is_alive(entity));
    assert_eq!(world.archetype(entity), ArchetypeId::INVALID);

    world.create_reserved(entity);
    assert!(world.is_alive(entity));
    assert!(!world.is_reserved(entity));
    assert_eq!(world.archetype(entity), ArchetypeId::EMPTY);
}

#[test]
fn destroying_a_reservation_releases_it() {
    let mut world = world();
    let entity = world.reserve();
    assert!(!world.destroy(entity));
    assert!(!world.is_reserved(entity));
    assert_eq!(world.alive_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Archetype graph
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn archetype_identity_ignores_column_order() {
    let mut graph = ArchetypeGraph::new();
    let a = ColumnId::of(DataTypeId(0));
    let b = ColumnId::of(DataTypeId(1));
    let c = ColumnId::make(DataTypeId(1), 3);

    let abc = graph.archetype_of(&[a, b, c]);
    assert_eq!(graph.archetype_of(&[c, a, b]), abc);
    assert_eq!(graph.archetype_of(&[b, c, a, a]), abc);

    let step = graph.with(ArchetypeId::EMPTY, c);
    let step = graph.with(step, a);
    assert_eq!(graph.with(step, b), abc);
    assert_eq!(graph.columns(abc), &[a, b, c]);
}

#[test]
fn with_then_without_round_trips() {
    let mut graph = ArchetypeGraph::new();
    let a = ColumnId::of(DataTypeId(0));
    let b = ColumnId::of(DataTypeId(1));

    let start = graph.archetype_of(&[a]);
    let extended = graph.with(start, b);
    assert_ne!(extended, start);
    assert_eq!(graph.without(extended, b), start);
    assert_eq!(graph.with(start, a), start, "adding a present column is a no-op");
    assert_eq!(graph.without(start, b), start, "removing a missing column is a no-op");
}

#[test]
fn sentinels_short_circuit() {
    let mut graph = ArchetypeGraph::new();
    let a = ColumnId::of(DataTypeId(0));

    assert_eq!(graph.with(ArchetypeId::INVALID, a), ArchetypeId::INVALID);
    assert_eq!(graph.with(ArchetypeId::EMPTY, ColumnId::INVALID), ArchetypeId::INVALID);
    assert!(!graph.contains(ArchetypeId::INVALID, a));
    assert!(graph.columns(ArchetypeId::INVALID).is_empty());
    assert!(graph.collect(&[ColumnId::INVALID], &[]).is_empty());
}

#[test]
fn collect_returns_supersets() {
    let mut graph = ArchetypeGraph::new();
    let a = ColumnId::of(DataTypeId(0));
    let b = ColumnId::of(DataTypeId(1));
    let c = ColumnId::of(DataTypeId(2));

    let just_a = graph.archetype_of(&[a]);
    let ab = graph.archetype_of(&[a, b]);
    let abc = graph.archetype_of(&[a, b, c]);
    let bc = graph.archetype_of(&[b, c]);

    assert_eq!(graph.collect(&[a], &[]), vec![just_a, ab, abc]);
    assert_eq!(graph.collect(&[b], &[c]), vec![ab]);
    assert_eq!(graph.collect(&[], &[a]), vec![ArchetypeId::EMPTY, bc]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Components
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn add_then_remove_restores_archetype() {
    let mut world = world();
    let entity = world.create();
    world.insert(entity, Position { x: 1.0, y: 2.0 });
    let before = world.archetype(entity);

    world.insert(entity, Velocity { x: 0.5, y: 0.0 });
    assert_ne!(world.archetype(entity), before);
    assert!(world.remove::<Velocity>(entity));
    assert_eq!(world.archetype(entity), before);
    assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1.0, y: 2.0 }));
    assert!(!world.remove::<Velocity>(entity));
}

#[test]
fn insert_replaces_existing_value() {
    let mut world = world();
    let entity = world.create();
    world.insert(entity, Name("first".into()));
    let archetype = world.archetype(entity);

    world.insert(entity, Name("second".into()));
    assert_eq!(world.archetype(entity), archetype);
    assert_eq!(world.get::<Name>(entity), Some(&Name("second".into())));
}

#[test]
fn moving_entities_keeps_neighbours_intact() {
    let mut world = world();
    let entities: Vec<_> = (0..5)
        .map(|i| {
            let entity = world.create();
            world.insert(entity, Position { x: i as f32, y: 0.0 });
            entity
        })
        .collect();

    world.insert(entities[1], Velocity { x: 1.0, y: 1.0 });
    assert!(world.destroy(entities[3]));

    for (i, &entity) in entities.iter().enumerate() {
        if i == 3 {
            assert!(!world.is_alive(entity));
            assert_eq!(world.get::<Position>(entity), None);
        } else {
            assert_eq!(world.get::<Position>(entity).map(|p| p.x), Some(i as f32));
        }
    }
    assert!(world.has::<Velocity>(entities[1]));
    assert!(!world.has::<Velocity>(entities[0]));
    assert_eq!(world.alive_count(), 4);
}

#[test]
fn get_mut_writes_through() {
    let mut world = world();
    let entity = world.create();
    world.insert(entity, Position { x: 0.0, y: 0.0 });
    if let Some(position) = world.get_mut::<Position>(entity) {
        position.x = 4.0;
    }
    assert_eq!(world.get::<Position>(entity).map(|p| p.x), Some(4.0));
}

#[test]
#[should_panic(expected = "is not alive")]
fn inserting_on_a_dead_entity_panics() {
    let mut world = world();
    let entity = world.create();
    world.destroy(entity);
    world.insert(entity, Position { x: 0.0, y: 0.0 });
}

#[test]
#[should_panic(expected = "is not registered")]
fn inserting_an_unregistered_component_panics() {
    struct Unknown;
    let mut world = world();
    let entity = world.create();
    world.insert(entity, Unknown);
}

#[test]
fn resources_round_trip() {
    struct Gravity(f32);

    let mut world = World::new();
    assert!(!world.has_resource::<Gravity>());
    world.insert_resource(Gravity(9.8));
    assert_eq!(world.resource::<Gravity>().map(|g| g.0), Some(9.8));

    if let Some(mut gravity) = world.resource_mut::<Gravity>() {
        gravity.0 = 1.6;
    }
    assert_eq!(world.remove_resource::<Gravity>().map(|g| g.0), Some(1.6));
    assert!(!world.has_resource::<Gravity>());
}
