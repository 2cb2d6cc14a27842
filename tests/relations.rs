use cubos_ecs::{ColumnId, Entity, RelationKind, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Likes(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChildOf;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Friends;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Collides;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Marker;

fn world() -> World {
    let mut world = World::new();
    world.register_component::<Marker>();
    world.register_relation::<Likes>(RelationKind::Normal);
    world.register_relation::<ChildOf>(RelationKind::Tree);
    world.register_relation::<Friends>(RelationKind::Symmetric);
    world.register_relation::<Collides>(RelationKind::Ephemeral);
    world
}

/// Depth of the table holding the `ChildOf` row `from -> to`.
fn depth_of(world: &World, from: Entity, to: Entity) -> Option<u32> {
    let data_type = world.types().id_of::<ChildOf>()?;
    world.relation_tables().ids().iter().copied()
        .filter(|id| id.data_type == data_type)
        .find(|&id| world.relation_tables().get(id).is_some_and(|t| t.contains(from.index, to.index)))
        .map(|id| id.depth)
}

#[test]
fn relate_and_unrelate() {
    let mut world = world();
    let a = world.create();
    let b = world.create();

    world.relate(a, b, Likes(3));
    assert!(world.related::<Likes>(a, b));
    assert!(!world.related::<Likes>(b, a), "normal relations are directed");
    assert_eq!(world.relation::<Likes>(a, b), Some(&Likes(3)));

    world.relate(a, b, Likes(5));
    assert_eq!(world.relation::<Likes>(a, b), Some(&Likes(5)), "relating again replaces the value");

    if let Some(likes) = world.relation_mut::<Likes>(a, b) {
        likes.0 += 1;
    }
    assert_eq!(world.relation::<Likes>(a, b), Some(&Likes(6)));

    assert!(world.unrelate::<Likes>(a, b));
    assert!(!world.related::<Likes>(a, b));
    assert!(!world.unrelate::<Likes>(a, b));
}

#[test]
fn destroy_cascades_both_directions() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    let c = world.create();

    world.relate(a, b, Likes(1));
    world.relate(b, c, Likes(2));
    world.relate(c, a, Likes(3));

    assert!(world.destroy(b));
    assert!(!world.related::<Likes>(a, b));
    assert!(!world.related::<Likes>(b, c));
    assert!(world.related::<Likes>(c, a));

    let recycled = world.create();
    assert_eq!(recycled.index, b.index);
    assert!(!world.related::<Likes>(a, recycled), "recycled slots inherit no relations");
}

#[test]
fn relations_follow_archetype_changes() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    world.relate(a, b, Likes(7));

    world.insert(a, Marker);
    world.insert(b, Marker);
    assert_eq!(world.relation::<Likes>(a, b), Some(&Likes(7)));

    world.remove::<Marker>(a);
    assert_eq!(world.relation::<Likes>(a, b), Some(&Likes(7)));
    assert_eq!(world.relations_from::<Likes>(a), vec![(b, &Likes(7))]);
    assert_eq!(world.relations_to::<Likes>(b), vec![(a, &Likes(7))]);
}

#[test]
fn ephemeral_relations_drop_on_archetype_change() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    let c = world.create();
    world.relate(a, b, Collides);
    world.relate(c, a, Collides);

    world.insert(a, Marker);
    assert!(!world.related::<Collides>(a, b));
    assert!(!world.related::<Collides>(c, a));

    world.relate(b, c, Collides);
    world.insert(a, Marker);
    assert!(world.related::<Collides>(b, c), "replacing a value keeps the archetype");
}

#[test]
fn symmetric_relations_ignore_direction() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    let c = world.create();

    world.relate(b, a, Friends);
    assert!(world.related::<Friends>(a, b));
    assert!(world.related::<Friends>(b, a));

    world.relate(a, c, Friends);
    let mut friends_of_a: Vec<_> = world.relations_from::<Friends>(a).into_iter().map(|(e, _)| e).collect();
    friends_of_a.sort();
    assert_eq!(friends_of_a, vec![b, c]);

    assert!(world.unrelate::<Friends>(a, b));
    assert!(!world.related::<Friends>(b, a));
    assert!(world.related::<Friends>(c, a));
}

#[test]
fn tree_relations_allow_one_parent() {
    let mut world = world();
    let first = world.create();
    let second = world.create();
    let child = world.create();

    world.relate(child, first, ChildOf);
    world.relate(child, second, ChildOf);
    assert!(!world.related::<ChildOf>(child, first));
    assert!(world.related::<ChildOf>(child, second));
    assert_eq!(world.relations_from::<ChildOf>(child).len(), 1);
}

#[test]
fn tree_depth_tracks_ancestors() {
    let mut world = world();
    let root = world.create();
    let a = world.create();
    let b = world.create();
    let c = world.create();

    world.relate(b, a, ChildOf);
    world.relate(c, b, ChildOf);
    assert_eq!(depth_of(&world, b, a), Some(0));
    assert_eq!(depth_of(&world, c, b), Some(1));

    world.relate(a, root, ChildOf);
    assert_eq!(depth_of(&world, a, root), Some(0));
    assert_eq!(depth_of(&world, b, a), Some(1));
    assert_eq!(depth_of(&world, c, b), Some(2));

    world.unrelate::<ChildOf>(a, root);
    assert_eq!(depth_of(&world, b, a), Some(0));
    assert_eq!(depth_of(&world, c, b), Some(1));
}

#[test]
fn destroying_a_tree_parent_resets_children() {
    let mut world = world();
    let root = world.create();
    let a = world.create();
    let b = world.create();

    world.relate(a, root, ChildOf);
    world.relate(b, a, ChildOf);
    assert_eq!(depth_of(&world, b, a), Some(1));

    world.destroy(root);
    assert!(!world.related::<ChildOf>(a, root));
    assert_eq!(depth_of(&world, b, a), Some(0));
}

#[test]
fn tree_depth_survives_archetype_changes() {
    let mut world = world();
    let root = world.create();
    let a = world.create();
    let b = world.create();
    world.relate(a, root, ChildOf);
    world.relate(b, a, ChildOf);

    world.insert(a, Marker);
    assert!(world.related::<ChildOf>(b, a));
    assert_eq!(depth_of(&world, b, a), Some(1));
    assert_eq!(depth_of(&world, a, root), Some(0));
}

#[test]
fn bulk_operations() {
    let mut world = world();
    let entities: Vec<_> = (0..4).map(|_| world.create()).collect();
    for pair in entities.windows(2) {
        world.relate(pair[0], pair[1], Likes(0));
    }
    world.insert(entities[0], Marker);
    world.insert(entities[2], Marker);

    assert_eq!(world.clear_relation(world.types().expect_id::<Likes>()), 3);
    assert!(entities.windows(2).all(|pair| !world.related::<Likes>(pair[0], pair[1])));

    let marker = ColumnId::of(world.types().expect_id::<Marker>());
    assert_eq!(world.strip_column(marker), 2);
    assert!(!world.has::<Marker>(entities[0]));

    world.insert(entities[3], Marker);
    assert_eq!(world.destroy_holders_of(marker), 1);
    assert!(!world.is_alive(entities[3]));
    assert_eq!(world.alive_count(), 3);
}

#[test]
fn clean_up_drops_empty_tables() {
    let mut world = world();
    let a = world.create();
    let b = world.create();
    world.relate(a, b, Likes(1));
    world.unrelate::<Likes>(a, b);

    assert!(world.clean_up() >= 1);
    assert!(world.relation_tables().ids().is_empty());
}
