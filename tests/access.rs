use cubos_ecs::engine::access::compatible;
use cubos_ecs::prelude::*;
use cubos_ecs::{AccessError, DataTypeId, IntoSystem, System, SystemAccess, TypeRegistry};

struct Score(u32);
struct Gravity(f32);
struct Position(f32);
struct Velocity(f32);

fn world() -> World {
    let mut world = World::new();
    world.insert_resource(Score(0));
    world.insert_resource(Gravity(9.8));
    world.register_component::<Position>();
    world.register_component::<Velocity>();
    world
}

fn access_of<M, F: IntoSystem<(), M>>(world: &World, f: F) -> SystemAccess {
    f.into_system("probe", world).access().clone()
}

#[test]
fn disjoint_writers_are_compatible() {
    let mut a = SystemAccess::new();
    a.write_resource(DataTypeId(0)).read_component(DataTypeId(2));
    let mut b = SystemAccess::new();
    b.write_resource(DataTypeId(1)).read_component(DataTypeId(2));

    assert!(compatible(&a, &b));
    assert!(a.compatible(&b) && b.compatible(&a));

    b.read_resource(DataTypeId(0));
    assert!(!compatible(&a, &b), "a read of a written resource conflicts");
    assert!(!compatible(&b, &a), "the rule is symmetric");
}

#[test]
fn overlapping_component_writes_conflict() {
    let mut a = SystemAccess::new();
    a.write_component(DataTypeId(3));
    let mut b = SystemAccess::new();
    b.read_component(DataTypeId(3));

    assert!(a.conflicts_with(&b));
    assert!(b.conflicts_with(&a));

    let mut c = SystemAccess::new();
    c.read_component(DataTypeId(3));
    assert!(b.compatible(&c), "shared reads never conflict");
}

#[test]
fn world_access_conflicts_with_everything() {
    let mut a = SystemAccess::new();
    a.use_world();
    let b = SystemAccess::new();
    assert!(!compatible(&a, &b));
    assert!(!compatible(&b, &a));
}

#[test]
fn invalid_sentinel_is_never_recorded() {
    let mut access = SystemAccess::new();
    access.write_resource(DataTypeId::INVALID).write_component(DataTypeId::INVALID);
    assert!(access.is_empty());
}

#[test]
fn validation_rules() {
    let types = TypeRegistry::new();

    let mut read_write = SystemAccess::new();
    read_write.read_resource(DataTypeId(0)).write_resource(DataTypeId(0));
    assert!(matches!(read_write.validate(&types), Err(AccessError::ResourceReadAndWritten { .. })));

    let mut world_and_more = SystemAccess::new();
    world_and_more.use_world().read_component(DataTypeId(1));
    assert_eq!(world_and_more.validate(&types), Err(AccessError::WorldWithOtherAccess));

    let mut fine = SystemAccess::new();
    fine.read_resource(DataTypeId(0)).write_resource(DataTypeId(1));
    assert_eq!(fine.validate(&types), Ok(()));
}

#[test]
fn parameters_derive_access() {
    let world = world();
    let score = world.types().expect_id::<Score>();
    let gravity = world.types().expect_id::<Gravity>();
    let position = world.types().expect_id::<Position>();
    let velocity = world.types().expect_id::<Velocity>();

    fn integrate(_gravity: Res<Gravity>, _score: ResMut<Score>, _query: Query<(&mut Position, &Velocity)>) {}
    let access = access_of(&world, integrate);

    assert!(access.read_resources.contains(&gravity));
    assert!(access.written_resources.contains(&score));
    assert!(access.written_components.contains(&position));
    assert!(access.read_components.contains(&velocity));
    assert!(!access.uses_world);
}

#[test]
fn filters_add_no_access() {
    let world = world();
    fn filtered(_query: Query<Entity, (With<Position>, Without<Velocity>)>) {}
    assert!(access_of(&world, filtered).is_empty());
}

#[test]
fn world_parameter_sets_uses_world() {
    let world = world();
    fn inspect(_world: &World) {}
    let access = access_of(&world, inspect);
    assert!(access.uses_world);
}

#[test]
fn systems_with_shared_reads_are_compatible() {
    let world = world();
    fn reader_a(_score: Res<Score>, _query: Query<&Position>) {}
    fn reader_b(_score: Res<Score>, _query: Query<(&Position, Option<&Velocity>)>) {}
    fn writer(_score: ResMut<Score>) {}

    let a = access_of(&world, reader_a);
    let b = access_of(&world, reader_b);
    let w = access_of(&world, writer);
    assert!(a.compatible(&b));
    assert!(a.conflicts_with(&w));
    assert!(b.conflicts_with(&w));
}

#[test]
#[should_panic(expected = "has invalid access")]
fn reading_and_writing_a_resource_panics_at_registration() {
    let world = world();
    fn broken(_read: Res<Score>, _write: ResMut<Score>) {}
    access_of(&world, broken);
}

#[test]
#[should_panic(expected = "has invalid access")]
fn aliasing_a_component_panics_at_registration() {
    let world = world();
    fn broken(_a: Query<&mut Position>, _b: Query<&Position>) {}
    access_of(&world, broken);
}

#[test]
#[should_panic(expected = "has invalid access")]
fn aliasing_inside_one_query_panics_at_registration() {
    let world = world();
    fn broken(_query: Query<(&mut Position, &Position)>) {}
    access_of(&world, broken);
}

#[test]
#[should_panic(expected = "has invalid access")]
fn world_with_other_access_panics_at_registration() {
    let world = world();
    fn broken(_world: &World, _score: Res<Score>) {}
    access_of(&world, broken);
}
