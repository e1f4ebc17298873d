//! Registry of live lobbies and their membership transitions

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::terrain::noise::LCG_MODULUS;
use crate::terrain::{Heightmap, TerrainSettings};
use crate::util::time::Timer;

use super::code::{generate_code, normalize_code, LobbyCode};
use super::model::{ConnId, Lobby, Player};
use super::outcome::{Outcome, Rejection};

/// Result of removing a player from a lobby
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub player: Player,
    /// Set when the host left and another member was promoted
    pub new_host: Option<ConnId>,
    /// The lobby became empty and was deleted
    pub lobby_closed: bool,
}

/// Owns every live lobby. Not shared: the session gateway holds it and
/// processes one event at a time.
pub struct LobbyRegistry {
    lobbies: HashMap<LobbyCode, Lobby>,
    terrain: TerrainSettings,
    rng: ChaCha8Rng,
}

impl LobbyRegistry {
    pub fn new(terrain: TerrainSettings) -> Self {
        Self {
            lobbies: HashMap::new(),
            terrain,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Registry with reproducible lobby codes and terrain seeds
    pub fn with_seed(terrain: TerrainSettings, seed: u64) -> Self {
        Self {
            lobbies: HashMap::new(),
            terrain,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    pub fn total_players(&self) -> usize {
        self.lobbies.values().map(|l| l.players().len()).sum()
    }

    pub fn get(&self, code: &str) -> Option<&Lobby> {
        self.lobbies.get(&normalize_code(code))
    }

    pub(crate) fn get_mut(&mut self, code: &str) -> Option<&mut Lobby> {
        self.lobbies.get_mut(&normalize_code(code))
    }

    /// Create a lobby hosted by `host_id`, generating its terrain once
    pub fn create(&mut self, host_id: ConnId, host_name: String) -> &Lobby {
        let code = loop {
            let candidate = generate_code(&mut self.rng);
            if !self.lobbies.contains_key(&candidate) {
                break candidate;
            }
            debug!(code = %candidate, "Lobby code collision, retrying");
        };

        let seed = self.rng.gen_range(1..LCG_MODULUS);
        let timer = Timer::new();
        let heightmap = Heightmap::generate(seed, &self.terrain);

        info!(
            lobby_id = %code,
            host_id = %host_id,
            seed,
            size = heightmap.size(),
            elapsed_ms = timer.elapsed_ms(),
            "Lobby created"
        );

        let lobby = Lobby::new(code.clone(), host_id, host_name, heightmap);
        self.lobbies.entry(code).or_insert(lobby)
    }

    /// Add a player. Allowed after the match started so late joiners get
    /// the same terrain; joining twice is a no-op.
    pub fn join(&mut self, code: &str, conn_id: ConnId, name: String) -> Outcome<&Lobby> {
        let Some(lobby) = self.lobbies.get_mut(&normalize_code(code)) else {
            return Outcome::Rejected(Rejection::LobbyNotFound);
        };

        if lobby.add_player(conn_id, name) {
            info!(
                lobby_id = %lobby.id(),
                conn_id = %conn_id,
                player_count = lobby.players().len(),
                started = lobby.is_started(),
                "Player joined lobby"
            );
        } else {
            debug!(lobby_id = %lobby.id(), conn_id = %conn_id, "Player already in lobby");
        }

        Outcome::Applied(&*lobby)
    }

    /// Host-only start of the match
    pub fn start(
        &mut self,
        code: &str,
        caller: ConnId,
        terrain_data: Option<serde_json::Value>,
    ) -> Outcome<&Lobby> {
        let Some(lobby) = self.lobbies.get_mut(&normalize_code(code)) else {
            return Outcome::Rejected(Rejection::LobbyNotFound);
        };

        let outcome = lobby.start(caller, terrain_data);
        if outcome.is_applied() {
            info!(lobby_id = %lobby.id(), players = lobby.players().len(), "Game started");
        }

        let lobby: &Lobby = lobby;
        outcome.map(|()| lobby)
    }

    /// Remove a player; deletes the lobby once empty
    pub fn leave(&mut self, code: &str, conn_id: ConnId) -> Outcome<Departure> {
        let code = normalize_code(code);
        let Some(lobby) = self.lobbies.get_mut(&code) else {
            return Outcome::Rejected(Rejection::LobbyNotFound);
        };
        let Some(removal) = lobby.remove_player(conn_id) else {
            return Outcome::Rejected(Rejection::PlayerNotFound);
        };

        if let Some(new_host) = removal.new_host {
            info!(lobby_id = %code, new_host = %new_host, "Host migrated");
        }

        let lobby_closed = lobby.is_empty();
        if lobby_closed {
            self.lobbies.remove(&code);
            info!(lobby_id = %code, "Lobby closed");
        } else {
            info!(lobby_id = %code, conn_id = %conn_id, "Player left lobby");
        }

        Outcome::Applied(Departure {
            player: removal.player,
            new_host: removal.new_host,
            lobby_closed,
        })
    }

    /// Re-attach a reconnected client to an orphaned player record.
    /// Yields the id the record was bound to before.
    pub fn rebind(
        &mut self,
        code: &str,
        conn_id: ConnId,
        was_host: bool,
        is_stale: impl Fn(ConnId) -> bool,
    ) -> Outcome<(ConnId, &Lobby)> {
        let Some(lobby) = self.lobbies.get_mut(&normalize_code(code)) else {
            return Outcome::Rejected(Rejection::LobbyNotFound);
        };

        let outcome = lobby.rebind(conn_id, was_host, is_stale);
        if let Outcome::Applied(previous) = &outcome {
            if *previous != conn_id {
                info!(
                    lobby_id = %lobby.id(),
                    previous = %previous,
                    conn_id = %conn_id,
                    was_host,
                    "Player record rebound to new connection"
                );
            }
        }

        let lobby: &Lobby = lobby;
        outcome.map(|previous| (previous, lobby))
    }
}
