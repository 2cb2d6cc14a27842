use cubos_ecs::prelude::*;
use cubos_ecs::{QueryData, QueryFilter, QueryState, Random, RelationQueryState, SystemAccess};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frozen;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Likes(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Friends;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChildOf;

fn world() -> World {
    let mut world = World::new();
    world.register_component::<Position>();
    world.register_component::<Velocity>();
    world.register_component::<Frozen>();
    world.register_relation::<Likes>(RelationKind::Normal);
    world.register_relation::<Friends>(RelationKind::Symmetric);
    world.register_relation::<ChildOf>(RelationKind::Tree);
    world
}

fn state<D: QueryData, F: QueryFilter>(world: &World) -> QueryState<D, F> {
    QueryState::new(world, &mut SystemAccess::new())
}

fn spawn(world: &mut World, position: Option<f32>, velocity: Option<f32>) -> Entity {
    let entity = world.create();
    if let Some(x) = position {
        world.insert(entity, Position(x));
    }
    if let Some(v) = velocity {
        world.insert(entity, Velocity(v));
    }
    entity
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-target queries
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn terms_select_matching_archetypes() {
    let mut world = world();
    let still = spawn(&mut world, Some(1.0), None);
    let moving = spawn(&mut world, Some(2.0), Some(0.5));
    let ghost = spawn(&mut world, None, Some(3.0));

    let mut positions = state::<(Entity, &Position), ()>(&world);
    let mut query = positions.query(&mut world);
    let mut seen: Vec<_> = query.iter().map(|(entity, _)| entity).collect();
    seen.sort();
    assert_eq!(seen, vec![still, moving]);

    let mut without = state::<Entity, Without<Velocity>>(&world);
    let mut query = without.query(&mut world);
    let mut seen: Vec<_> = query.iter().collect();
    seen.sort();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], still);

    let mut with = state::<Entity, (With<Velocity>, Without<Position>)>(&world);
    let mut query = with.query(&mut world);
    assert_eq!(query.single(), Some(ghost));
}

#[test]
fn optional_terms_do_not_restrict_matching() {
    let mut world = world();
    let still = spawn(&mut world, Some(1.0), None);
    let moving = spawn(&mut world, Some(2.0), Some(0.5));

    let mut optional = state::<(Entity, Option<&Velocity>), With<Position>>(&world);
    let mut query = optional.query(&mut world);
    assert_eq!(query.len(), 2);
    for (entity, velocity) in query.iter() {
        if entity == still {
            assert_eq!(velocity, None);
        } else {
            assert_eq!(entity, moving);
            assert_eq!(velocity, Some(&Velocity(0.5)));
        }
    }
}

#[test]
fn mutable_terms_write_through() {
    let mut world = world();
    let entities: Vec<_> = (0..10).map(|i| spawn(&mut world, Some(i as f32), Some(1.0))).collect();
    spawn(&mut world, Some(100.0), None);

    let mut integrate = state::<(&mut Position, &Velocity), ()>(&world);
    let mut query = integrate.query(&mut world);
    query.for_each(|(position, velocity)| position.0 += velocity.0);

    for (i, &entity) in entities.iter().enumerate() {
        assert_eq!(world.get::<Position>(entity), Some(&Position(i as f32 + 1.0)));
    }
}

#[test]
fn get_and_contains_respect_terms() {
    let mut world = world();
    let still = spawn(&mut world, Some(1.0), None);
    let moving = spawn(&mut world, Some(2.0), Some(0.5));
    let dead = spawn(&mut world, Some(3.0), Some(0.5));
    world.destroy(dead);

    let mut movers = state::<&mut Position, With<Velocity>>(&world);
    let mut query = movers.query(&mut world);
    assert!(query.contains(moving));
    assert!(!query.contains(still));
    assert!(!query.contains(dead));
    assert!(query.get(still).is_none());
    assert!(query.get(dead).is_none());

    if let Some(position) = query.get(moving) {
        position.0 = 42.0;
    }
    assert_eq!(world.get::<Position>(moving), Some(&Position(42.0)));
}

#[test]
fn single_requires_exactly_one_match() {
    let mut world = world();
    let mut frozen = state::<Entity, With<Frozen>>(&world);
    assert!(frozen.query(&mut world).single().is_none());

    let a = world.create();
    world.insert(a, Frozen);
    assert_eq!(frozen.query(&mut world).single(), Some(a));

    let b = world.create();
    world.insert(b, Frozen);
    assert!(frozen.query(&mut world).single().is_none());
}

#[test]
fn cached_state_picks_up_new_archetypes() {
    let mut world = world();
    let mut positions = state::<&Position, ()>(&world);
    assert!(positions.query(&mut world).is_empty());

    spawn(&mut world, Some(1.0), None);
    let late = spawn(&mut world, Some(2.0), None);
    world.insert(late, Frozen);
    spawn(&mut world, Some(3.0), Some(1.0));

    let mut query = positions.query(&mut world);
    assert_eq!(query.len(), 3);
    let mut xs: Vec<f32> = query.iter().map(|p| p.0).collect();
    xs.sort_by(f32::total_cmp);
    assert_eq!(xs, vec![1.0, 2.0, 3.0]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Relation queries
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn relation_query_filters_both_ends() {
    let mut world = world();
    let a = spawn(&mut world, Some(1.0), None);
    let b = spawn(&mut world, Some(2.0), Some(1.0));
    let c = spawn(&mut world, None, None);

    world.relate(a, b, Likes(1));
    world.relate(b, a, Likes(2));
    world.relate(a, c, Likes(3));

    let mut state = RelationQueryState::<Likes, &Position, &Velocity>::new(&world, &mut SystemAccess::new());
    let mut query = state.query(&mut world);
    let items: Vec<_> = query.iter().map(|(from, likes, to)| (from.0, likes.0, to.0)).collect();
    assert_eq!(items, vec![(1.0, 1, 1.0)]);
}

#[test]
fn pinned_relation_queries() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    let c = world.create();
    world.relate(a, b, Likes(1));
    world.relate(a, c, Likes(2));
    world.relate(c, b, Likes(3));

    let mut state = RelationQueryState::<Likes, Entity, Entity, Random>::new(&world, &mut SystemAccess::new());
    let mut query = state.query(&mut world);

    let mut from_a: Vec<_> = query.pin_from(a).iter().map(|(_, likes, to)| (likes.0, to)).collect();
    from_a.sort_by_key(|(likes, _)| *likes);
    assert_eq!(from_a, vec![(1, b), (2, c)]);

    let mut to_b: Vec<_> = query.unpin().pin_to(b).iter().map(|(from, likes, _)| (from, likes.0)).collect();
    to_b.sort_by_key(|(_, likes)| *likes);
    assert_eq!(to_b, vec![(a, 1), (c, 3)]);

    query.unpin();
    assert_eq!(query.get(c, b).map(|(_, likes, _)| likes.0), Some(3));
    assert!(query.get(b, c).is_none());
    assert!(!query.is_empty());
}

#[test]
fn pinning_a_dead_entity_yields_nothing() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    let dead = world.create();
    world.relate(a, b, Likes(1));
    world.destroy(dead);

    let mut state = RelationQueryState::<Likes, Entity, Entity>::new(&world, &mut SystemAccess::new());
    let mut query = state.query(&mut world);
    assert_eq!(query.pin_from(dead).iter().count(), 0);
}

#[test]
fn symmetric_relations_are_seen_from_both_sides() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    world.relate(b, a, Friends);

    let mut state = RelationQueryState::<Friends, Entity, Entity>::new(&world, &mut SystemAccess::new());
    let mut query = state.query(&mut world);
    let mut pairs: Vec<_> = query.iter().map(|(from, _, to)| (from, to)).collect();
    pairs.sort();
    assert_eq!(pairs, vec![(a, b), (b, a)]);

    assert!(query.get(a, b).is_some());
    assert!(query.get(b, a).is_some());
    assert_eq!(query.pin_from(b).iter().map(|(_, _, to)| to).collect::<Vec<_>>(), vec![a]);
}

#[test]
fn symmetric_terms_pick_the_matching_orientation() {
    let mut world = world();
    let a = spawn(&mut world, Some(1.0), None);
    let b = spawn(&mut world, None, Some(2.0));
    world.relate(b, a, Friends);
    world.relate(a, b, Friends);

    let mut state = RelationQueryState::<Friends, &Position, &Velocity>::new(&world, &mut SystemAccess::new());
    let mut query = state.query(&mut world);
    let items: Vec<_> = query.iter().map(|(p, _, v)| (p.0, v.0)).collect();
    assert_eq!(items, vec![(1.0, 2.0)]);
}

#[test]
fn tree_traversals_order_by_depth() {
    let mut world = world();
    let root = world.create();
    let a = world.create();
    let b = world.create();
    let c = world.create();
    world.relate(a, root, ChildOf);
    world.relate(b, a, ChildOf);
    world.relate(c, b, ChildOf);

    let mut down = RelationQueryState::<ChildOf, Entity, Entity, Down>::new(&world, &mut SystemAccess::new());
    let order: Vec<_> = down.query(&mut world).iter().map(|(child, _, _)| child).collect();
    assert_eq!(order, vec![a, b, c], "parents before children");

    let mut up = RelationQueryState::<ChildOf, Entity, Entity, Up>::new(&world, &mut SystemAccess::new());
    let order: Vec<_> = up.query(&mut world).iter().map(|(child, _, _)| child).collect();
    assert_eq!(order, vec![c, b, a], "children before parents");

    let depths: Vec<_> = up.tables().iter().map(|m| m.table.depth).collect();
    assert_eq!(depths, vec![2, 1, 0]);
}

#[test]
fn relation_state_notices_new_tables() {
    let mut world = world();
    let a = world.create();
    let b = world.create();

    let mut state = RelationQueryState::<Likes, Entity, Entity>::new(&world, &mut SystemAccess::new());
    assert!(state.query(&mut world).is_empty());

    world.relate(a, b, Likes(9));
    world.insert(b, Frozen);
    world.relate(b, a, Likes(4));

    let mut query = state.query(&mut world);
    let mut values: Vec<_> = query.iter().map(|(_, likes, _)| likes.0).collect();
    values.sort();
    assert_eq!(values, vec![4, 9]);
}

#[test]
fn shared_endpoints_are_written_once_per_relation() {
    let mut world = world();
    let a = spawn(&mut world, Some(1.0), None);
    let b = spawn(&mut world, Some(2.0), None);
    let hub = spawn(&mut world, Some(10.0), None);
    world.relate(a, hub, Likes(1));
    world.relate(b, hub, Likes(2));

    let mut state = RelationQueryState::<Likes, &Position, &mut Position>::new(&world, &mut SystemAccess::new());
    let mut visits = 0;
    state.query(&mut world).for_each(|(from, _, to)| {
        to.0 += from.0;
        visits += 1;
    });

    assert_eq!(visits, 2);
    assert_eq!(world.get::<Position>(hub), Some(&Position(13.0)));
}

#[test]
fn tree_propagation_writes_children_from_parents() {
    let mut world = world();
    let root = spawn(&mut world, Some(1.0), None);
    let a = spawn(&mut world, Some(1.0), None);
    let b = spawn(&mut world, Some(1.0), None);
    world.relate(a, root, ChildOf);
    world.relate(b, a, ChildOf);

    let mut state = RelationQueryState::<ChildOf, &mut Position, &Position, Down>::new(&world, &mut SystemAccess::new());
    state.query(&mut world).for_each(|(child, _, parent)| child.0 += parent.0);

    assert_eq!(world.get::<Position>(a), Some(&Position(2.0)));
    assert_eq!(world.get::<Position>(b), Some(&Position(3.0)));
}

#[test]
fn aliasing_targets_skip_self_relations() {
    let mut world = world();
    let a = spawn(&mut world, Some(1.0), None);
    let b = spawn(&mut world, Some(5.0), None);
    world.relate(a, a, Likes(1));
    world.relate(a, b, Likes(2));

    let mut state = RelationQueryState::<Likes, &mut Position, &Position>::new(&world, &mut SystemAccess::new());
    let mut query = state.query(&mut world);
    let mut seen = Vec::new();
    query.for_each(|(_, likes, _)| seen.push(likes.0));
    assert_eq!(seen, vec![2]);
    assert!(query.get(a, a).is_none());
    assert!(query.get(a, b).is_some());

    let mut readers = RelationQueryState::<Likes, &Position, &Position>::new(&world, &mut SystemAccess::new());
    assert_eq!(readers.query(&mut world).iter().count(), 2, "read-only targets keep self relations");
}

#[test]
#[should_panic(expected = "has invalid access")]
fn aliased_terms_in_one_query_panic() {
    let world = world();
    state::<(&mut Position, &mut Position), ()>(&world);
}

#[test]
#[should_panic(expected = "has invalid access")]
fn aliased_terms_in_one_relation_target_panic() {
    let world = world();
    RelationQueryState::<Likes, (&mut Position, &Position), Entity>::new(&world, &mut SystemAccess::new());
}
