//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ArenaSettings, PopulationSettings, SettingsPatch};
use crate::game::actor::ActorKind;
use crate::game::entity::AsteroidShape;
use crate::game::ids::{ActorId, ObjectId};
use crate::game::physics::Vec2;
use crate::game::telemetry::{SessionExport, TelemetrySummary};

/// Which page a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Game,
    Stats,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First message on every connection
    PageInit { page: PageKind },

    LoginAttempt { nickname: String },

    ChatMessage { text: String },

    /// Steering input; `fire` requests a shot if the weapon is ready
    PlayerUpdate {
        target_heading: f32,
        thrust: f32,
        #[serde(default)]
        fire: bool,
    },

    QuitAttempt,

    RespawnAttempt,

    /// Stats page: change population counts
    ApplySettings { settings: SettingsPatch },

    /// Stats page: drop all sessions and rebuild the world
    ResetStats,

    /// Stats page: request the full session export
    GetSessions,
}

/// Settings a client needs before rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub arena: ArenaSettings,
    pub tick_rate: u32,
    pub sync_rate: u32,
    /// Minimum milliseconds between chat messages
    pub chat_spam_ms: u64,
    pub min_nickname_len: usize,
    pub max_nickname_len: usize,
    pub population: PopulationSettings,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once after a game page connects
    SettingsInit { settings: ClientSettings },

    LoginResponse { success: bool, message: String },

    SystemMessage { message: String },

    ChatMessage { sender: String, message: String },

    /// Private notice to a human that just died
    UpdateDeath { killer: String, killer_id: ActorId },

    /// Per-recipient state broadcast
    UpdatePlayer {
        user: HostData,
        others: Vec<DroneData>,
        objects: Vec<ObjectData>,
    },

    /// Stats page: current population settings
    StatsSettings { settings: PopulationSettings },

    /// Stats page: periodic summary
    StatsUpdate { summary: TelemetrySummary },

    /// Stats page: full session export
    Sessions { sessions: HashMap<Uuid, SessionExport> },
}

/// The recipient's own ship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostData {
    pub pos: Vec2,
    pub vel: Vec2,
    pub heading: f32,
    pub health: i32,
    /// Present only when it changed since the previous broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_ready: Option<bool>,
}

/// Another active ship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneData {
    pub id: ActorId,
    pub kind: ActorKind,
    pub pos: Vec2,
    pub vel: Vec2,
    pub heading: f32,
    pub target_heading: f32,
    pub thrust: f32,
    pub health: i32,
}

/// Public state of a world object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectData {
    Generic {
        id: ObjectId,
        pos: Vec2,
        vel: Vec2,
    },
    Projectile {
        id: ObjectId,
        pos: Vec2,
        vel: Vec2,
    },
    Asteroid {
        id: ObjectId,
        pos: Vec2,
        vel: Vec2,
        heading: f32,
        shape: AsteroidShape,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_update_fire_defaults_to_false() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"player_update","target_heading":1.5,"thrust":0.5}"#).unwrap();
        match msg {
            ClientMsg::PlayerUpdate { fire, thrust, .. } => {
                assert!(!fire);
                assert_eq!(thrust, 0.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn apply_settings_accepts_legacy_field_names() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"apply_settings","settings":{"nets":3,"fireRate":0.5}}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::ApplySettings { settings } => {
                assert_eq!(settings.agents, Some(3));
                assert_eq!(settings.fire_rate, Some(0.5));
                assert_eq!(settings.bots, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unchanged_fire_ready_is_omitted() {
        let host = HostData {
            pos: Vec2::ZERO,
            vel: Vec2::ZERO,
            heading: 0.0,
            health: 4,
            fire_ready: None,
        };
        let json = serde_json::to_value(&host).unwrap();
        assert!(json.get("fire_ready").is_none());
    }
}
