use cubos_ecs::prelude::*;

#[derive(Default)]
struct Log(Vec<String>);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Armor;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ping;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Likes;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChildOf;

struct Target(Entity);
struct Pair(Entity, Entity);

struct Family {
    child: Entity,
    old: Entity,
    new: Entity,
}

fn app() -> Cubos {
    let mut cubos = Cubos::with_settings(Settings::default().with_parallel(false));
    cubos
        .component::<Health>()
        .component::<Armor>()
        .component::<Ping>()
        .relation::<Likes>(RelationKind::Normal)
        .resource(Log::default());
    cubos
}

fn spawn_healthy(mut commands: Commands) {
    commands.spawn().with(Health(10));
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook timing
// ─────────────────────────────────────────────────────────────────────────────

fn log_added(trigger: Trigger, mut query: Query<&Health>, mut log: ResMut<Log>) {
    let health = query.get(trigger.entity()).map(|health| health.0);
    log.0.push(format!("added {health:?}"));
}

#[test]
fn add_observers_see_the_new_value() {
    let mut cubos = app();
    cubos.observer("log added").on_add::<Health>().call(log_added);
    cubos.startup_system("spawn").call(spawn_healthy);
    cubos.start().unwrap();

    assert_eq!(cubos.world().resource::<Log>().unwrap().0, ["added Some(10)"]);
}

fn heal(target: Res<Target>, mut commands: Commands) {
    commands.add(target.0, Health(20));
}

#[test]
fn replacing_a_component_does_not_fire_add() {
    let mut cubos = app();
    let entity = cubos.world_mut().create();
    cubos.world_mut().insert(entity, Health(1));
    cubos.resource(Target(entity));
    cubos.observer("log added").on_add::<Health>().call(log_added);
    cubos.system("heal").call(heal);

    cubos.start().unwrap();
    cubos.update().unwrap();
    cubos.update().unwrap();

    assert!(cubos.world().resource::<Log>().unwrap().0.is_empty());
    assert_eq!(cubos.world().get::<Health>(entity), Some(&Health(20)));
}

fn log_removed(trigger: Trigger, mut query: Query<&Health>, mut log: ResMut<Log>) {
    let still_there = query.get(trigger.entity()).is_some();
    log.0.push(format!("removed, still there: {still_there}"));
}

fn strip_health(target: Res<Target>, mut commands: Commands) {
    commands.remove::<Health>(target.0);
}

#[test]
fn remove_observers_run_before_the_removal() {
    let mut cubos = app();
    let entity = cubos.world_mut().create();
    cubos.world_mut().insert(entity, Health(3));
    cubos.resource(Target(entity));
    cubos.observer("log removed").on_remove::<Health>().call(log_removed);
    cubos.system("strip").call(strip_health);

    cubos.start().unwrap();
    cubos.update().unwrap();
    cubos.update().unwrap();

    assert_eq!(cubos.world().resource::<Log>().unwrap().0, ["removed, still there: true"]);
    assert!(!cubos.world().has::<Health>(entity));
}

fn log_destroyed(trigger: Trigger, query: Query<Entity, With<Armor>>, mut log: ResMut<Log>) {
    log.0.push(format!("destroyed, armored: {}", query.contains(trigger.entity())));
}

fn despawn_target(target: Res<Target>, mut commands: Commands) {
    commands.despawn(target.0);
}

#[test]
fn destroy_observers_run_while_the_entity_is_alive() {
    let mut cubos = app();
    let entity = cubos.world_mut().create();
    cubos.world_mut().insert(entity, Health(3));
    cubos.world_mut().insert(entity, Armor);
    cubos.resource(Target(entity));
    cubos.observer("log destroyed").on_destroy::<Health>().call(log_destroyed);
    cubos.system("despawn").call(despawn_target);

    cubos.start().unwrap();
    cubos.update().unwrap();

    assert_eq!(cubos.world().resource::<Log>().unwrap().0, ["destroyed, armored: true"]);
    assert!(!cubos.world().is_alive(entity));
}

fn log_relation(trigger: Trigger, pair: Res<Pair>, mut log: ResMut<Log>) {
    let from = if trigger.entity() == pair.0 { "first" } else { "?" };
    let to = if trigger.target() == Some(pair.1) { "second" } else { "?" };
    log.0.push(format!("{from} -> {to}"));
}

fn relate_pair(pair: Res<Pair>, mut commands: Commands) {
    commands.relate(pair.0, pair.1, Likes);
}

fn unrelate_pair(pair: Res<Pair>, mut commands: Commands) {
    commands.unrelate::<Likes>(pair.0, pair.1);
}

#[test]
fn relation_observers_name_both_endpoints() {
    let mut cubos = app();
    let first = cubos.world_mut().create();
    let second = cubos.world_mut().create();
    cubos.resource(Pair(first, second));
    cubos.observer("on relate").on_relate::<Likes>().call(log_relation);
    cubos.observer("on unrelate").on_unrelate::<Likes>().call(log_relation);
    cubos.startup_system("relate").call(relate_pair);
    cubos.system("unrelate").call(unrelate_pair);

    cubos.start().unwrap();
    assert!(cubos.world().related::<Likes>(first, second));
    cubos.update().unwrap();
    cubos.update().unwrap();

    assert!(!cubos.world().related::<Likes>(first, second));
    assert_eq!(cubos.world().resource::<Log>().unwrap().0, ["first -> second", "first -> second"]);
}

#[test]
fn unhooked_observers_stop_firing() {
    let mut cubos = app();
    let observer = cubos.observer("log added").on_add::<Health>().call(log_added);
    assert!(cubos.unhook(observer));
    assert!(!cubos.unhook(observer), "already detached");
    cubos.startup_system("spawn").call(spawn_healthy);
    cubos.start().unwrap();

    assert_eq!(cubos.world().alive_count(), 1);
    assert!(cubos.world().resource::<Log>().unwrap().0.is_empty());
}

fn adopt(family: Res<Family>, mut commands: Commands) {
    commands.relate(family.child, family.old, ChildOf);
}

fn move_out(family: Res<Family>, mut commands: Commands) {
    commands.relate(family.child, family.new, ChildOf);
}

fn log_orphaned(trigger: Trigger, family: Res<Family>, mut parents: RelationQuery<ChildOf, Entity, Entity>, mut log: ResMut<Log>) {
    let from_old = trigger.target() == Some(family.old);
    let still_related = parents.get(trigger.entity(), family.old).is_some();
    log.0.push(format!("left old: {from_old}, still related: {still_related}"));
}

#[test]
fn reparenting_a_tree_relation_fires_unrelate_first() {
    let mut cubos = app();
    cubos.relation::<ChildOf>(RelationKind::Tree);
    let child = cubos.world_mut().create();
    let old = cubos.world_mut().create();
    let new = cubos.world_mut().create();
    cubos.resource(Family { child, old, new });
    cubos.observer("orphaned").on_unrelate::<ChildOf>().call(log_orphaned);
    cubos.startup_system("adopt").call(adopt);
    cubos.system("move out").call(move_out);

    cubos.start().unwrap();
    cubos.update().unwrap();
    cubos.update().unwrap();

    assert!(cubos.world().related::<ChildOf>(child, new));
    assert!(!cubos.world().related::<ChildOf>(child, old));
    assert_eq!(cubos.world().resource::<Log>().unwrap().0, ["left old: true, still related: true"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixed point
// ─────────────────────────────────────────────────────────────────────────────

fn armor_up(trigger: Trigger, mut commands: Commands) {
    commands.add(trigger.entity(), Armor);
}

fn log_armor(_trigger: Trigger, mut log: ResMut<Log>) {
    log.0.push("armored".to_owned());
}

#[test]
fn observer_commands_are_applied_in_the_same_flush() {
    let mut cubos = app();
    cubos.observer("armor up").on_add::<Health>().call(armor_up);
    cubos.observer("log armor").on_add::<Armor>().call(log_armor);
    cubos.startup_system("spawn").call(spawn_healthy);
    cubos.start().unwrap();

    let world = cubos.world();
    let entity = world.iter_entities().next().unwrap();
    assert!(world.has::<Health>(entity));
    assert!(world.has::<Armor>(entity));
    assert_eq!(world.resource::<Log>().unwrap().0, ["armored"]);
}

fn unping(trigger: Trigger, mut commands: Commands) {
    commands.remove::<Ping>(trigger.entity());
}

fn reping(trigger: Trigger, mut commands: Commands) {
    commands.add(trigger.entity(), Ping);
}

fn spawn_ping(mut commands: Commands) {
    commands.spawn().with(Ping);
}

#[test]
#[should_panic(expected = "observer flush did not settle after 8 iterations")]
fn observer_cycles_hit_the_iteration_cap() {
    let mut cubos = Cubos::with_settings(Settings::default().with_parallel(false).with_max_observer_iterations(8));
    cubos.component::<Ping>();
    cubos.observer("unping").on_add::<Ping>().call(unping);
    cubos.observer("reping").on_remove::<Ping>().call(reping);
    cubos.startup_system("spawn").call(spawn_ping);
    let _ = cubos.start();
}

// ─────────────────────────────────────────────────────────────────────────────
// Misuse
// ─────────────────────────────────────────────────────────────────────────────

fn despawn_then_heal(target: Res<Target>, mut commands: Commands) {
    commands.despawn(target.0);
    commands.add(target.0, Health(99));
    commands.relate(target.0, target.0, Likes);
}

#[test]
fn commands_on_destroyed_entities_are_skipped() {
    let mut cubos = app();
    let entity = cubos.world_mut().create();
    cubos.resource(Target(entity));
    cubos.observer("log added").on_add::<Health>().call(log_added);
    cubos.system("despawn then heal").call(despawn_then_heal);

    cubos.start().unwrap();
    cubos.update().unwrap();

    assert!(!cubos.world().is_alive(entity));
    assert_eq!(cubos.world().alive_count(), 0);
    assert!(cubos.world().resource::<Log>().unwrap().0.is_empty());
}

fn noop() {}

#[test]
#[should_panic(expected = "has no hook")]
fn observers_need_a_hook() {
    let mut cubos = app();
    cubos.observer("lost").call(noop);
}

fn wants_trigger(_trigger: Trigger) {}

#[test]
#[should_panic(expected = "`Trigger` is only available to observers")]
fn trigger_outside_an_observer_panics() {
    let mut cubos = app();
    cubos.system("confused").call(wants_trigger);
    cubos.start().unwrap();
    let _ = cubos.update();
}
