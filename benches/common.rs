#![allow(dead_code)]

use cubos_ecs::prelude::*;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}

#[derive(Clone, Copy)]
pub struct Trades;

pub fn make_world() -> World {
    let mut world = World::new();
    world.register_component::<Position>();
    world.register_component::<Wealth>();
    world.register_component::<Productivity>();
    world.register_relation::<Trades>(RelationKind::Normal);
    world
}

/// Spawns `agent_count` agents holding every component. One agent in four
/// trades with the next one.
pub fn populate(world: &mut World, agent_count: usize) -> Vec<Entity> {
    let agents: Vec<Entity> = (0..agent_count)
        .map(|i| {
            let agent = world.create();
            world.insert(agent, Position { x: i as f32, y: 0.0 });
            world.insert(agent, Wealth { value: 100.0 });
            world.insert(agent, Productivity { rate: 1.0 });
            agent
        })
        .collect();

    for pair in agents.chunks_exact(2).step_by(2) {
        world.relate(pair[0], pair[1], Trades);
    }
    agents
}
