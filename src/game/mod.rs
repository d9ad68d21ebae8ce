//! Game simulation modules

pub mod actor;
pub mod agent;
pub mod clock;
pub mod combat;
pub mod entity;
pub mod ids;
pub mod physics;
pub mod session;
pub mod snapshot;
pub mod telemetry;
pub mod timers;
pub mod world;

pub use ids::{ActorId, ObjectId, ObserverId};
pub use session::{Command, GameSession, SessionConfig, SessionHandle, Transport};
pub use telemetry::{SessionStats, Telemetry};
pub use world::World;
