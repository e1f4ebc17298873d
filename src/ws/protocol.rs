//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::terrain::HeightGrid;

/// World-space vector as reported by clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Broadside a projectile was fired from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoatSide {
    Left,
    Right,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Create a new lobby with the sender as host
    CreateLobbyRequest {
        #[serde(default)]
        host_nickname: Option<String>,
    },

    /// Join an existing lobby by code
    JoinLobbyRequest {
        lobby_id: String,
        #[serde(default)]
        nickname: Option<String>,
    },

    /// Host-only: start the match
    StartGame {
        lobby_id: String,
        /// Optional host-authoritative terrain override, forwarded as-is
        #[serde(default)]
        terrain_data: Option<serde_json::Value>,
    },

    /// Re-attach a reconnected client to its player record
    ConfirmGameStart {
        lobby_id: String,
        #[serde(default)]
        was_host: bool,
    },

    /// Leave the current lobby
    LeaveLobbyRequest,

    /// Own boat position, relayed to the other members
    #[serde(alias = "newBoatPosition")]
    PlayerUpdate { position: Vec3, rotation: Vec3 },

    /// A cannon was fired, relayed to the other members
    ProjectileFired {
        position: Vec3,
        rotation: Vec3,
        side_of_boat: BoatSide,
        timestamp: f64,
    },

    /// The sender's projectile hit another boat
    ProjectileHit {
        attacker_player_id: Uuid,
        target_player_id: Uuid,
        damage: f32,
        hit_position: Vec3,
        timestamp: f64,
    },

    /// Heal the sender's own boat
    PlayerHeal { heal_amount: f32 },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Sent once after connection; carries the connection's player id
    Welcome { player_id: Uuid, server_time: u64 },

    /// Reply to the creator of a lobby
    LobbyCreated {
        lobby_id: String,
        players: Vec<PlayerInfo>,
        heightmap: Arc<HeightGrid>,
        heightmap_overlay: Arc<HeightGrid>,
    },

    /// Reply to a joining (or re-attached) client
    LobbyJoined {
        lobby_id: String,
        players: Vec<PlayerInfo>,
        heightmap: Arc<HeightGrid>,
        heightmap_overlay: Arc<HeightGrid>,
        game_started: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        terrain_data: Option<serde_json::Value>,
    },

    /// Roster changed
    LobbyUpdated { players: Vec<PlayerInfo> },

    /// Match started; gameplay unlocked
    GameStarted {
        #[serde(skip_serializing_if = "Option::is_none")]
        terrain_data: Option<serde_json::Value>,
    },

    /// Sent only to a newly promoted host
    BecameHost,

    /// Another member's boat moved
    EnemyBoatPosition {
        player_id: Uuid,
        position: Vec3,
        rotation: Vec3,
    },

    /// Another member fired
    EnemyProjectileFired {
        owner_id: Uuid,
        position: Vec3,
        rotation: Vec3,
        side_of_boat: BoatSide,
        timestamp: f64,
    },

    /// Accepted hit
    PlayerHit {
        attacker_id: Uuid,
        target_id: Uuid,
        damage: f32,
        health: f32,
        hit_position: Vec3,
        timestamp: f64,
    },

    /// A player's health reached zero
    PlayerKilled { player_id: Uuid, killer_id: Uuid },

    /// One or no players left alive
    GameOver {
        winner_id: Option<Uuid>,
        winner_name: Option<String>,
    },

    /// Accepted heal
    PlayerHealed {
        player_id: Uuid,
        heal_amount: f32,
        health: f32,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player entry in lobby rosters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
}
