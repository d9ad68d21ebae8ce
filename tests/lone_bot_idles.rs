#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use ship_arena_server::config::SimSettings;
use ship_arena_server::game::{SessionStats, World};

#[test]
fn bot_with_nothing_to_chase_does_not_thrust() {
    let mut world = World::new(
        SimSettings::default(),
        ChaCha8Rng::seed_from_u64(9),
        Arc::new(SessionStats::new()),
    );
    let bot = world.spawn_bot();
    let start = world.actor(bot).unwrap().ship.pos;

    for _ in 0..60 {
        world.step(1.0 / 60.0).unwrap();
    }

    let ship = &world.actor(bot).unwrap().ship;
    assert_eq!(ship.thrust, 0.0);
    assert!(ship.pos.distance(start) < 1e-3);
}
