//! WebSocket transport

pub mod handler;
pub mod hub;
pub mod protocol;

pub use hub::{ClientHub, ClientLink};
