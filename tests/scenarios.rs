//! End-to-end behaviour of the engine.

use cubos_ecs::prelude::*;
use cubos_ecs::{QueryState, SystemAccess};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Acceleration(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChildOf;

struct Score(u32);

#[derive(Default)]
struct Observed(Vec<u32>);

struct Noise(u64);

/// Installs a test subscriber filtered by `RUST_LOG`. Later calls are no-ops.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

#[test]
fn query_writes_are_visible_to_later_queries() {
    init_logging();
    let mut world = World::new();
    world.register_component::<Position>();
    let entity = world.create();
    world.insert(entity, Position { x: 0.0, y: 0.0 });

    let mut writer = QueryState::<&mut Position>::new(&world, &mut SystemAccess::new());
    writer.query(&mut world).for_each(|position| *position = Position { x: 1.0, y: 1.0 });

    let mut reader = QueryState::<(Entity, &Position)>::new(&world, &mut SystemAccess::new());
    let mut query = reader.query(&mut world);
    let seen: Vec<_> = query.iter().map(|(entity, position)| (entity, *position)).collect();
    assert_eq!(seen, vec![(entity, Position { x: 1.0, y: 1.0 })]);
}

#[test]
fn destroying_a_parent_removes_the_relation() {
    init_logging();
    let mut world = World::new();
    world.register_relation::<ChildOf>(RelationKind::Tree);
    let parent = world.create();
    let child = world.create();

    world.relate(child, parent, ChildOf);
    assert!(world.related::<ChildOf>(child, parent));

    world.destroy(parent);
    assert!(!world.related::<ChildOf>(child, parent));
    assert!(world.is_alive(child));
}

static SCORING: Tag = Tag::new("scoring");

fn score(mut score: ResMut<Score>) {
    score.0 += 1;
}

fn observe(score: Res<Score>, mut observed: ResMut<Observed>) {
    observed.0.push(score.0);
}

fn churn(mut noise: ResMut<Noise>) {
    noise.0 = noise.0.wrapping_mul(6364136223846793005).wrapping_add(1);
}

#[test]
fn readers_ordered_after_writers_see_the_current_tick() {
    init_logging();
    let mut cubos = Cubos::with_settings(Settings::default().with_worker_threads(4));
    cubos.resource(Score(0)).resource(Observed::default()).resource(Noise(1));
    cubos.system("observe").after(&SCORING).call(observe);
    cubos.system("score").tagged(&SCORING).call(score);
    cubos.system("churn").call(churn);
    cubos.start().unwrap();

    for _ in 0..50 {
        cubos.update().unwrap();
    }

    let observed = cubos.world().resource::<Observed>().unwrap();
    assert_eq!(observed.0, (1..=50).collect::<Vec<_>>());
}

fn accelerate(trigger: Trigger, mut commands: Commands) {
    commands.add(trigger.entity(), Acceleration(0.5));
}

fn spawn_moving(mut commands: Commands) {
    commands.spawn().with(Velocity(2.0));
}

#[test]
fn observers_complete_spawned_entities() {
    init_logging();
    let mut cubos = Cubos::with_settings(Settings::default().with_parallel(false));
    cubos.component::<Velocity>().component::<Acceleration>();
    cubos.observer("accelerate").on_add::<Velocity>().call(accelerate);
    cubos.startup_system("spawn").call(spawn_moving);
    cubos.start().unwrap();

    let world = cubos.world();
    let entities: Vec<_> = world.iter_entities().collect();
    assert_eq!(entities.len(), 1);
    assert_eq!(world.get::<Velocity>(entities[0]), Some(&Velocity(2.0)));
    assert_eq!(world.get::<Acceleration>(entities[0]), Some(&Acceleration(0.5)));
}
