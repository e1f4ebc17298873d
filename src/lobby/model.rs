//! Lobby and player state

use uuid::Uuid;

use crate::terrain::Heightmap;
use crate::ws::protocol::PlayerInfo;

use super::code::LobbyCode;
use super::outcome::{Outcome, Rejection};

/// Connection identifier; doubles as the player id
pub type ConnId = Uuid;

pub const MAX_HEALTH: f32 = 100.0;

/// Player state in a lobby (authoritative)
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: ConnId,
    pub name: String,
    pub is_host: bool,
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
}

impl Player {
    pub fn new(id: ConnId, name: String, is_host: bool) -> Self {
        Self {
            id,
            name,
            is_host,
            health: MAX_HEALTH,
            max_health: MAX_HEALTH,
            alive: true,
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            is_host: self.is_host,
            health: self.health,
            max_health: self.max_health,
            alive: self.alive,
        }
    }
}

/// Lobby phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyPhase {
    /// Accepting players, match not started
    Open,
    /// Match running; terrain locked
    Started,
}

/// A player removed from a lobby, and who took over as host
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub player: Player,
    pub new_host: Option<ConnId>,
}

/// One game session: members, shared terrain and match flags
#[derive(Debug)]
pub struct Lobby {
    id: LobbyCode,
    host_id: ConnId,
    /// Join order is preserved; host migration relies on it
    players: Vec<Player>,
    heightmap: Heightmap,
    game_started: bool,
    terrain_data: Option<serde_json::Value>,
    match_over: bool,
}

impl Lobby {
    pub fn new(id: LobbyCode, host_id: ConnId, host_name: String, heightmap: Heightmap) -> Self {
        Self {
            id,
            host_id,
            players: vec![Player::new(host_id, host_name, true)],
            heightmap,
            game_started: false,
            terrain_data: None,
            match_over: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host_id(&self) -> ConnId {
        self.host_id
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player_ids(&self) -> Vec<ConnId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn heightmap(&self) -> &Heightmap {
        &self.heightmap
    }

    pub fn is_started(&self) -> bool {
        self.game_started
    }

    pub fn is_match_over(&self) -> bool {
        self.match_over
    }

    pub fn terrain_data(&self) -> Option<&serde_json::Value> {
        self.terrain_data.as_ref()
    }

    pub fn phase(&self) -> LobbyPhase {
        if self.game_started {
            LobbyPhase::Started
        } else {
            LobbyPhase::Open
        }
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn player(&self, id: ConnId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: ConnId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    pub fn roster(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }

    /// Add a non-host member; returns false if the id is already present
    pub(crate) fn add_player(&mut self, id: ConnId, name: String) -> bool {
        if self.contains(id) {
            return false;
        }
        self.players.push(Player::new(id, name, false));
        true
    }

    /// Remove a member, promoting the earliest remaining joiner if the host left
    pub(crate) fn remove_player(&mut self, id: ConnId) -> Option<Removal> {
        let index = self.players.iter().position(|p| p.id == id)?;
        let player = self.players.remove(index);

        let mut new_host = None;
        if player.is_host {
            if let Some(next) = self.players.first_mut() {
                next.is_host = true;
                self.host_id = next.id;
                new_host = Some(next.id);
            }
        }

        Some(Removal { player, new_host })
    }

    /// Host-only, one-way transition to `Started`
    pub(crate) fn start(
        &mut self,
        caller: ConnId,
        terrain_data: Option<serde_json::Value>,
    ) -> Outcome<()> {
        if caller != self.host_id {
            return Outcome::IgnoredUnauthorized;
        }
        if self.game_started {
            return Outcome::Rejected(Rejection::GameAlreadyStarted);
        }

        self.game_started = true;
        self.terrain_data = terrain_data;
        Outcome::Applied(())
    }

    /// Move an orphaned player record onto a new connection id.
    ///
    /// Candidates are records whose connection `is_stale`; the earliest one
    /// with the claimed host role wins. Returns the replaced id.
    pub(crate) fn rebind(
        &mut self,
        new_id: ConnId,
        was_host: bool,
        is_stale: impl Fn(ConnId) -> bool,
    ) -> Outcome<ConnId> {
        if self.contains(new_id) {
            return Outcome::Applied(new_id);
        }

        let Some(player) = self
            .players
            .iter_mut()
            .find(|p| p.is_host == was_host && is_stale(p.id))
        else {
            return Outcome::Rejected(Rejection::NoRebindCandidate);
        };

        let previous = player.id;
        player.id = new_id;
        if player.is_host {
            self.host_id = new_id;
        }
        Outcome::Applied(previous)
    }

    /// Mark the match finished; true only the first time
    pub(crate) fn latch_match_over(&mut self) -> bool {
        !std::mem::replace(&mut self.match_over, true)
    }
}
