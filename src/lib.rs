//! Ship Arena Server - authoritative simulation for a multiplayer asteroid arena
//!
//! Humans, scripted bots and learning agents share one continuous world.
//! The game session task owns the world; WebSocket handlers feed it
//! commands and the client hub carries its messages back out.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
