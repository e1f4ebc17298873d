//! Session gateway - routes client events to lobby and combat logic
//!
//! All lobby state lives in one task. Each event is handled to completion
//! before the next is read, so lobby mutations need no locks. Outbound
//! messages are pushed to per-connection channels with `try_send`: delivery
//! is at-most-once and a slow client never stalls other lobbies.
//!
//! A player who drops out of a running match keeps their record for a grace
//! period so a reconnecting client can claim it with `confirmGameStart`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::{CombatArbiter, HitEvent};
use crate::lobby::{normalize_code, ConnId, Lobby, LobbyCode, LobbyRegistry, Outcome, Rejection};
use crate::ws::protocol::{BoatSide, ClientMsg, ServerMsg, Vec3};

/// Inbound event queue size
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Per-connection outbound queue size
pub const OUTBOX_CAPACITY: usize = 256;

/// How long a disconnected player's record waits for a reconnect
pub const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_secs(30);

const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_NICKNAME_LEN: usize = 24;

/// Outbound channel of a single connection
pub type Outbox = mpsc::Sender<ServerMsg>;

/// Input to the gateway task
#[derive(Debug)]
pub enum GatewayEvent {
    Connected { conn_id: ConnId, outbox: Outbox },
    Message { conn_id: ConnId, msg: ClientMsg },
    Disconnected { conn_id: ConnId },
}

/// Counters readable outside the gateway task
#[derive(Debug, Default)]
pub struct GatewayStats {
    lobbies: AtomicUsize,
    connections: AtomicUsize,
    players: AtomicUsize,
}

impl GatewayStats {
    pub fn active_lobbies(&self) -> usize {
        self.lobbies.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn players_in_lobbies(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Session gateway is not running")]
pub struct GatewayClosed;

/// Cloneable sender side of the gateway
#[derive(Clone)]
pub struct GatewayHandle {
    events_tx: mpsc::Sender<GatewayEvent>,
    stats: Arc<GatewayStats>,
}

impl GatewayHandle {
    pub async fn connect(&self, conn_id: ConnId, outbox: Outbox) -> Result<(), GatewayClosed> {
        self.send(GatewayEvent::Connected { conn_id, outbox }).await
    }

    pub async fn dispatch(&self, conn_id: ConnId, msg: ClientMsg) -> Result<(), GatewayClosed> {
        self.send(GatewayEvent::Message { conn_id, msg }).await
    }

    pub async fn disconnect(&self, conn_id: ConnId) -> Result<(), GatewayClosed> {
        self.send(GatewayEvent::Disconnected { conn_id }).await
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    async fn send(&self, event: GatewayEvent) -> Result<(), GatewayClosed> {
        self.events_tx.send(event).await.map_err(|_| GatewayClosed)
    }
}

struct Connection {
    outbox: Outbox,
    lobby: Option<LobbyCode>,
}

/// Player record left behind by a dropped connection
struct Orphan {
    lobby: LobbyCode,
    expires_at: Instant,
}

/// Owns the lobby registry and the connection table
pub struct SessionGateway {
    registry: LobbyRegistry,
    connections: HashMap<ConnId, Connection>,
    orphans: HashMap<ConnId, Orphan>,
    reconnect_grace: Duration,
    events_rx: mpsc::Receiver<GatewayEvent>,
    stats: Arc<GatewayStats>,
}

impl SessionGateway {
    /// A zero `reconnect_grace` removes disconnected players immediately
    pub fn new(registry: LobbyRegistry, reconnect_grace: Duration) -> (Self, GatewayHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stats = Arc::new(GatewayStats::default());

        let handle = GatewayHandle {
            events_tx,
            stats: stats.clone(),
        };

        let gateway = Self {
            registry,
            connections: HashMap::new(),
            orphans: HashMap::new(),
            reconnect_grace,
            events_rx,
            stats,
        };

        (gateway, handle)
    }

    /// Process events until every handle is dropped
    pub async fn run(mut self) {
        info!("Session gateway started");

        let mut sweep = interval(ORPHAN_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = sweep.tick() => {
                    self.expire_orphans(Instant::now());
                    self.refresh_stats();
                }
            }
        }

        info!("Session gateway stopped");
    }

    pub fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Connected { conn_id, outbox } => self.on_connect(conn_id, outbox),
            GatewayEvent::Message { conn_id, msg } => self.on_message(conn_id, msg),
            GatewayEvent::Disconnected { conn_id } => self.on_disconnect(conn_id),
        }
        self.refresh_stats();
    }

    fn on_connect(&mut self, conn_id: ConnId, outbox: Outbox) {
        let previous = self
            .connections
            .insert(conn_id, Connection { outbox, lobby: None });
        if previous.is_some() {
            warn!(conn_id = %conn_id, "Connection id registered twice, replacing");
        }
        info!(conn_id = %conn_id, connections = self.connections.len(), "Client connected");
    }

    fn on_disconnect(&mut self, conn_id: ConnId) {
        if !self.orphan_if_playing(conn_id, Instant::now()) {
            self.leave_current(conn_id);
        }
        if self.connections.remove(&conn_id).is_some() {
            info!(conn_id = %conn_id, connections = self.connections.len(), "Client disconnected");
        }
    }

    fn on_message(&mut self, conn_id: ConnId, msg: ClientMsg) {
        if !self.connections.contains_key(&conn_id) {
            warn!(conn_id = %conn_id, "Message from unregistered connection");
            return;
        }

        match msg {
            ClientMsg::CreateLobbyRequest { host_nickname } => {
                self.create_lobby(conn_id, host_nickname.as_deref());
            }
            ClientMsg::JoinLobbyRequest { lobby_id, nickname } => {
                self.join_lobby(conn_id, &lobby_id, nickname.as_deref());
            }
            ClientMsg::StartGame {
                lobby_id,
                terrain_data,
            } => {
                self.start_game(conn_id, &lobby_id, terrain_data);
            }
            ClientMsg::ConfirmGameStart { lobby_id, was_host } => {
                self.confirm_game_start(conn_id, &lobby_id, was_host);
            }
            ClientMsg::LeaveLobbyRequest => {
                self.leave_current(conn_id);
            }
            ClientMsg::PlayerUpdate { position, rotation } => {
                self.relay_to_others(
                    conn_id,
                    ServerMsg::EnemyBoatPosition {
                        player_id: conn_id,
                        position,
                        rotation,
                    },
                );
            }
            ClientMsg::ProjectileFired {
                position,
                rotation,
                side_of_boat,
                timestamp,
            } => {
                self.relay_projectile(conn_id, position, rotation, side_of_boat, timestamp);
            }
            ClientMsg::ProjectileHit {
                attacker_player_id,
                target_player_id,
                damage,
                hit_position,
                timestamp,
            } => {
                let event = HitEvent {
                    attacker_id: attacker_player_id,
                    target_id: target_player_id,
                    damage,
                    hit_position,
                    timestamp,
                };
                self.projectile_hit(conn_id, &event);
            }
            ClientMsg::PlayerHeal { heal_amount } => {
                self.player_heal(conn_id, heal_amount);
            }
            ClientMsg::Ping { t } => {
                self.send_to(conn_id, ServerMsg::Pong { t });
            }
        }
    }

    fn create_lobby(&mut self, conn_id: ConnId, nickname: Option<&str>) {
        self.leave_current(conn_id);

        let lobby = self.registry.create(conn_id, display_name(nickname, conn_id));
        let code = lobby.id().to_string();
        let reply = ServerMsg::LobbyCreated {
            lobby_id: code.clone(),
            players: lobby.roster(),
            heightmap: lobby.heightmap().base().clone(),
            heightmap_overlay: lobby.heightmap().overlay().clone(),
        };

        self.set_lobby(conn_id, Some(code));
        self.send_to(conn_id, reply);
    }

    fn join_lobby(&mut self, conn_id: ConnId, lobby_id: &str, nickname: Option<&str>) {
        let code = normalize_code(lobby_id);

        // Switching lobbies: leave the old one only if the new one exists
        if self.current_lobby(conn_id).as_deref() != Some(code.as_str())
            && self.registry.get(&code).is_some()
        {
            self.leave_current(conn_id);
        }

        let outcome = self
            .registry
            .join(&code, conn_id, display_name(nickname, conn_id))
            .map(|lobby| (lobby_joined(lobby), lobby.roster(), lobby.player_ids()));

        match outcome {
            Outcome::Applied((joined, roster, members)) => {
                self.set_lobby(conn_id, Some(code));
                self.send_to(conn_id, joined);
                self.broadcast(&members, ServerMsg::LobbyUpdated { players: roster }, None);
            }
            other => self.report_unapplied(conn_id, "join", other),
        }
    }

    fn start_game(
        &mut self,
        conn_id: ConnId,
        lobby_id: &str,
        terrain_data: Option<serde_json::Value>,
    ) {
        let outcome = self
            .registry
            .start(lobby_id, conn_id, terrain_data)
            .map(|lobby| (lobby.player_ids(), lobby.terrain_data().cloned()));

        match outcome {
            Outcome::Applied((members, terrain_data)) => {
                self.broadcast(&members, ServerMsg::GameStarted { terrain_data }, None);
            }
            other => self.report_unapplied(conn_id, "start", other),
        }
    }

    fn confirm_game_start(&mut self, conn_id: ConnId, lobby_id: &str, was_host: bool) {
        let code = normalize_code(lobby_id);

        if let Some(lobby) = self.registry.get(&code) {
            if lobby.contains(conn_id) {
                let state = lobby_joined(lobby);
                self.send_to(conn_id, state);
                return;
            }
        }

        let orphans = &self.orphans;
        let is_orphan = |id: ConnId| orphans.get(&id).is_some_and(|o| o.lobby == code);
        let outcome = self
            .registry
            .rebind(&code, conn_id, was_host, is_orphan)
            .map(|(previous, lobby)| {
                (previous, lobby_joined(lobby), lobby.roster(), lobby.player_ids())
            });

        match outcome {
            Outcome::Applied((previous, joined, roster, members)) => {
                self.orphans.remove(&previous);
                if self.current_lobby(conn_id).is_some() {
                    self.leave_current(conn_id);
                }
                self.set_lobby(conn_id, Some(code));
                self.send_to(conn_id, joined);
                self.broadcast(&members, ServerMsg::LobbyUpdated { players: roster }, None);
            }
            other => self.report_unapplied(conn_id, "confirm_game_start", other),
        }
    }

    /// Keep the record of a player dropping out of a running match.
    /// Returns false when the player should simply leave.
    fn orphan_if_playing(&mut self, conn_id: ConnId, now: Instant) -> bool {
        if self.reconnect_grace.is_zero() {
            return false;
        }
        let Some(code) = self.current_lobby(conn_id) else {
            return false;
        };
        if !self.registry.get(&code).is_some_and(|l| l.is_started()) {
            return false;
        }

        info!(
            conn_id = %conn_id,
            lobby_id = %code,
            grace_secs = self.reconnect_grace.as_secs(),
            "Player dropped mid-match, holding record for reconnect"
        );
        self.orphans.insert(
            conn_id,
            Orphan {
                lobby: code,
                expires_at: now + self.reconnect_grace,
            },
        );
        true
    }

    /// Remove every orphaned record whose grace period ended by `now`
    pub fn expire_orphans(&mut self, now: Instant) {
        let expired: Vec<(ConnId, LobbyCode)> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.expires_at <= now)
            .map(|(id, orphan)| (*id, orphan.lobby.clone()))
            .collect();

        for (conn_id, code) in expired {
            self.orphans.remove(&conn_id);
            info!(conn_id = %conn_id, lobby_id = %code, "Reconnect window closed");
            self.remove_from_lobby(conn_id, &code);
        }
    }

    /// Remove the connection from whatever lobby it is in
    fn leave_current(&mut self, conn_id: ConnId) {
        let Some(code) = self
            .connections
            .get_mut(&conn_id)
            .and_then(|c| c.lobby.take())
        else {
            return;
        };
        self.remove_from_lobby(conn_id, &code);
    }

    fn remove_from_lobby(&mut self, conn_id: ConnId, code: &str) {
        let departure = match self.registry.leave(code, conn_id) {
            Outcome::Applied(departure) => departure,
            other => {
                self.report_unapplied(conn_id, "leave", other);
                return;
            }
        };

        if departure.lobby_closed {
            return;
        }

        if let Some(new_host) = departure.new_host {
            self.send_to(new_host, ServerMsg::BecameHost);
        }

        let Some(lobby) = self.registry.get_mut(code) else {
            return;
        };
        let game_over = if lobby.is_started() {
            CombatArbiter::check_match_over(lobby)
        } else {
            None
        };
        let roster = lobby.roster();
        let members = lobby.player_ids();

        self.broadcast(&members, ServerMsg::LobbyUpdated { players: roster }, None);
        if let Some(game_over) = game_over {
            self.broadcast(
                &members,
                ServerMsg::GameOver {
                    winner_id: game_over.winner_id,
                    winner_name: game_over.winner_name,
                },
                None,
            );
        }
    }

    fn relay_projectile(
        &mut self,
        conn_id: ConnId,
        position: Vec3,
        rotation: Vec3,
        side_of_boat: BoatSide,
        timestamp: f64,
    ) {
        self.relay_to_others(
            conn_id,
            ServerMsg::EnemyProjectileFired {
                owner_id: conn_id,
                position,
                rotation,
                side_of_boat,
                timestamp,
            },
        );
    }

    fn projectile_hit(&mut self, conn_id: ConnId, event: &HitEvent) {
        let Some(code) = self.current_lobby(conn_id) else {
            self.report_unapplied(conn_id, "hit", Outcome::<()>::Rejected(Rejection::NotInLobby));
            return;
        };

        let report = match CombatArbiter::apply_hit(&mut self.registry, &code, conn_id, event) {
            Outcome::Applied(report) => report,
            other => {
                self.report_unapplied(conn_id, "hit", other);
                return;
            }
        };

        let members = self.members_of(&code);
        self.broadcast(
            &members,
            ServerMsg::PlayerHit {
                attacker_id: report.attacker_id,
                target_id: report.target_id,
                damage: report.damage,
                health: report.health,
                hit_position: event.hit_position,
                timestamp: event.timestamp,
            },
            None,
        );

        if report.killed {
            self.broadcast(
                &members,
                ServerMsg::PlayerKilled {
                    player_id: report.target_id,
                    killer_id: report.attacker_id,
                },
                None,
            );
        }

        if let Some(game_over) = report.game_over {
            self.broadcast(
                &members,
                ServerMsg::GameOver {
                    winner_id: game_over.winner_id,
                    winner_name: game_over.winner_name,
                },
                None,
            );
        }
    }

    fn player_heal(&mut self, conn_id: ConnId, amount: f32) {
        let Some(code) = self.current_lobby(conn_id) else {
            self.report_unapplied(conn_id, "heal", Outcome::<()>::Rejected(Rejection::NotInLobby));
            return;
        };

        match CombatArbiter::apply_heal(&mut self.registry, &code, conn_id, amount) {
            Outcome::Applied(report) => {
                let members = self.members_of(&code);
                self.broadcast(
                    &members,
                    ServerMsg::PlayerHealed {
                        player_id: report.player_id,
                        heal_amount: report.amount,
                        health: report.health,
                    },
                    None,
                );
            }
            other => self.report_unapplied(conn_id, "heal", other),
        }
    }

    /// Fan a message out to the sender's lobby, excluding the sender
    fn relay_to_others(&self, conn_id: ConnId, msg: ServerMsg) {
        let Some(code) = self.current_lobby(conn_id) else {
            debug!(conn_id = %conn_id, "Relay from connection outside a lobby ignored");
            return;
        };
        let members = self.members_of(&code);
        self.broadcast(&members, msg, Some(conn_id));
    }

    /// Log (and for structural errors, tell the caller) why nothing happened
    fn report_unapplied<T>(&self, conn_id: ConnId, action: &'static str, outcome: Outcome<T>) {
        match outcome {
            Outcome::Applied(_) => {}
            Outcome::IgnoredUnauthorized => {
                debug!(conn_id = %conn_id, action, "Unauthorized request ignored");
            }
            Outcome::Rejected(reason) if reason.is_user_visible() => {
                debug!(conn_id = %conn_id, action, reason = %reason, "Request rejected");
                self.send_to(
                    conn_id,
                    ServerMsg::Error {
                        code: reason.code().to_string(),
                        message: reason.to_string(),
                    },
                );
            }
            Outcome::Rejected(reason) => {
                debug!(conn_id = %conn_id, action, reason = %reason, "Request dropped");
            }
        }
    }

    fn current_lobby(&self, conn_id: ConnId) -> Option<LobbyCode> {
        self.connections.get(&conn_id).and_then(|c| c.lobby.clone())
    }

    fn set_lobby(&mut self, conn_id: ConnId, code: Option<LobbyCode>) {
        if let Some(connection) = self.connections.get_mut(&conn_id) {
            connection.lobby = code;
        }
    }

    fn members_of(&self, code: &str) -> Vec<ConnId> {
        self.registry
            .get(code)
            .map(Lobby::player_ids)
            .unwrap_or_default()
    }

    fn broadcast(&self, members: &[ConnId], msg: ServerMsg, except: Option<ConnId>) {
        for &member in members {
            if Some(member) != except {
                self.send_to(member, msg.clone());
            }
        }
    }

    fn send_to(&self, conn_id: ConnId, msg: ServerMsg) {
        let Some(connection) = self.connections.get(&conn_id) else {
            debug!(conn_id = %conn_id, "No live connection for outbound message");
            return;
        };

        match connection.outbox.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %conn_id, "Outbox full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %conn_id, "Outbox closed");
            }
        }
    }

    fn refresh_stats(&self) {
        self.stats
            .lobbies
            .store(self.registry.len(), Ordering::Relaxed);
        self.stats
            .connections
            .store(self.connections.len(), Ordering::Relaxed);
        self.stats
            .players
            .store(self.registry.total_players(), Ordering::Relaxed);
    }
}

fn lobby_joined(lobby: &Lobby) -> ServerMsg {
    ServerMsg::LobbyJoined {
        lobby_id: lobby.id().to_string(),
        players: lobby.roster(),
        heightmap: lobby.heightmap().base().clone(),
        heightmap_overlay: lobby.heightmap().overlay().clone(),
        game_started: lobby.is_started(),
        terrain_data: lobby.terrain_data().cloned(),
    }
}

/// Trimmed, length-capped nickname, or a default derived from the id
fn display_name(nickname: Option<&str>, conn_id: ConnId) -> String {
    match nickname.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.chars().take(MAX_NICKNAME_LEN).collect(),
        None => format!("Player_{}", &conn_id.to_string()[..4]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::TerrainSettings;
    use serde_json::{json, Value};
    use uuid::Uuid;

    struct Client {
        id: ConnId,
        rx: mpsc::Receiver<ServerMsg>,
    }

    impl Client {
        /// Everything queued for this client, as wire JSON
        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(serde_json::to_value(&msg).expect("serialize server msg"));
            }
            out
        }
    }

    fn kinds(msgs: &[Value]) -> Vec<&str> {
        msgs.iter().filter_map(|m| m["type"].as_str()).collect()
    }

    fn gateway() -> SessionGateway {
        let registry = LobbyRegistry::with_seed(
            TerrainSettings {
                size: 8,
                world_size: 80.0,
                ..Default::default()
            },
            23,
        );
        SessionGateway::new(registry, DEFAULT_RECONNECT_GRACE).0
    }

    fn connect(gw: &mut SessionGateway) -> Client {
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = Uuid::new_v4();
        gw.handle_event(GatewayEvent::Connected { conn_id: id, outbox });
        Client { id, rx }
    }

    fn send(gw: &mut SessionGateway, client: &Client, msg: Value) {
        let msg: ClientMsg = serde_json::from_value(msg).expect("valid client msg");
        gw.handle_event(GatewayEvent::Message {
            conn_id: client.id,
            msg,
        });
    }

    fn disconnect(gw: &mut SessionGateway, client: &Client) {
        gw.handle_event(GatewayEvent::Disconnected { conn_id: client.id });
    }

    /// Host creates a lobby and the rest join; all queues drained
    fn lobby_of(gw: &mut SessionGateway, count: usize) -> (String, Vec<Client>) {
        let mut clients: Vec<Client> = (0..count).map(|_| connect(gw)).collect();
        send(gw, &clients[0], json!({ "type": "createLobbyRequest", "hostNickname": "Host" }));
        let created = clients[0].drain();
        let code = created[0]["lobbyId"].as_str().expect("lobby id").to_string();

        for (i, client) in clients.iter().enumerate().skip(1) {
            send(
                gw,
                client,
                json!({ "type": "joinLobbyRequest", "lobbyId": code, "nickname": format!("P{i}") }),
            );
        }
        for client in clients.iter_mut() {
            client.drain();
        }
        (code, clients)
    }

    /// Like `lobby_of`, with the match already started
    fn match_of(gw: &mut SessionGateway, count: usize) -> (String, Vec<Client>) {
        let (code, mut clients) = lobby_of(gw, count);
        send(gw, &clients[0], json!({ "type": "startGame", "lobbyId": code }));
        for client in clients.iter_mut() {
            client.drain();
        }
        (code, clients)
    }

    fn hit(gw: &mut SessionGateway, sender: &Client, attacker: ConnId, target: ConnId, damage: f32) {
        send(
            gw,
            sender,
            json!({
                "type": "projectileHit",
                "attackerPlayerId": attacker,
                "targetPlayerId": target,
                "damage": damage,
                "hitPosition": { "x": 1.0, "y": 0.0, "z": 2.0 },
                "timestamp": 123.0
            }),
        );
    }

    #[test]
    fn create_replies_with_both_terrain_layers() {
        let mut gw = gateway();
        let mut host = connect(&mut gw);
        send(&mut gw, &host, json!({ "type": "createLobbyRequest" }));

        let msgs = host.drain();
        assert_eq!(kinds(&msgs), vec!["lobbyCreated"]);
        let created = &msgs[0];
        assert_eq!(created["lobbyId"].as_str().map(str::len), Some(6));
        assert_eq!(created["players"].as_array().map(Vec::len), Some(1));
        assert_eq!(created["players"][0]["isHost"], json!(true));
        assert_eq!(created["heightmap"].as_array().map(Vec::len), Some(8));
        assert_eq!(created["heightmapOverlay"][0].as_array().map(Vec::len), Some(8));
        assert_eq!(gw.stats.active_lobbies(), 1);
    }

    #[test]
    fn joining_unknown_lobby_errors_only_to_caller() {
        let mut gw = gateway();
        let (_, mut clients) = lobby_of(&mut gw, 1);
        let mut stranger = connect(&mut gw);

        send(&mut gw, &stranger, json!({ "type": "joinLobbyRequest", "lobbyId": "NOPE42" }));

        let msgs = stranger.drain();
        assert_eq!(kinds(&msgs), vec!["error"]);
        assert_eq!(msgs[0]["code"], json!("lobby_not_found"));
        assert!(clients[0].drain().is_empty());
    }

    #[test]
    fn join_shares_terrain_and_refreshes_roster() {
        let mut gw = gateway();
        let mut host = connect(&mut gw);
        let mut guest = connect(&mut gw);

        send(&mut gw, &host, json!({ "type": "createLobbyRequest" }));
        let created = host.drain().remove(0);
        let code = created["lobbyId"].as_str().expect("code").to_lowercase();

        send(&mut gw, &guest, json!({ "type": "joinLobbyRequest", "lobbyId": code, "nickname": "  Nemo  " }));

        let guest_msgs = guest.drain();
        assert_eq!(kinds(&guest_msgs), vec!["lobbyJoined", "lobbyUpdated"]);
        let joined = &guest_msgs[0];
        assert_eq!(joined["gameStarted"], json!(false));
        assert_eq!(joined["heightmap"], created["heightmap"]);
        assert_eq!(joined["heightmapOverlay"], created["heightmapOverlay"]);
        assert_eq!(joined["players"][1]["name"], json!("Nemo"));

        let host_msgs = host.drain();
        assert_eq!(kinds(&host_msgs), vec!["lobbyUpdated"]);
        assert_eq!(host_msgs[0]["players"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn host_disconnect_promotes_next_joiner_with_one_notification() {
        let mut gw = gateway();
        let (code, mut clients) = lobby_of(&mut gw, 3);

        disconnect(&mut gw, &clients[0]);

        let a = clients[1].drain();
        let b = clients[2].drain();
        assert_eq!(kinds(&a), vec!["becameHost", "lobbyUpdated"]);
        assert_eq!(kinds(&b), vec!["lobbyUpdated"]);

        let roster = a[1]["players"].as_array().expect("players");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0]["id"], json!(clients[1].id));
        assert_eq!(roster[0]["isHost"], json!(true));
        assert_eq!(roster[1]["isHost"], json!(false));
        assert_eq!(gw.registry.get(&code).map(|l| l.host_id()), Some(clients[1].id));
    }

    #[test]
    fn lobby_is_deleted_when_last_member_leaves() {
        let mut gw = gateway();
        let (code, clients) = lobby_of(&mut gw, 2);

        send(&mut gw, &clients[1], json!({ "type": "leaveLobbyRequest" }));
        assert!(gw.registry.get(&code).is_some());

        disconnect(&mut gw, &clients[0]);
        assert!(gw.registry.get(&code).is_none());
        assert_eq!(gw.stats.active_lobbies(), 0);
        assert_eq!(gw.stats.players_in_lobbies(), 0);
        assert_eq!(gw.stats.connections(), 1);
    }

    #[test]
    fn only_host_can_start_and_start_is_broadcast() {
        let mut gw = gateway();
        let (code, mut clients) = lobby_of(&mut gw, 2);

        send(&mut gw, &clients[1], json!({ "type": "startGame", "lobbyId": code }));
        assert!(clients[0].drain().is_empty());
        assert!(clients[1].drain().is_empty());
        assert!(!gw.registry.get(&code).is_some_and(|l| l.is_started()));

        let terrain = json!({ "waterLevel": 0.3 });
        send(
            &mut gw,
            &clients[0],
            json!({ "type": "startGame", "lobbyId": code, "terrainData": terrain }),
        );
        for client in clients.iter_mut() {
            let msgs = client.drain();
            assert_eq!(kinds(&msgs), vec!["gameStarted"]);
            assert_eq!(msgs[0]["terrainData"], terrain);
        }

        // Second start is silently ignored
        send(&mut gw, &clients[0], json!({ "type": "startGame", "lobbyId": code }));
        assert!(clients[0].drain().is_empty());
    }

    #[test]
    fn starting_unknown_lobby_reports_error() {
        let mut gw = gateway();
        let mut client = connect(&mut gw);
        send(&mut gw, &client, json!({ "type": "startGame", "lobbyId": "ZZZZZZ" }));
        assert_eq!(kinds(&client.drain()), vec!["error"]);
    }

    #[test]
    fn late_joiner_receives_started_flag() {
        let mut gw = gateway();
        let (code, clients) = lobby_of(&mut gw, 1);
        send(&mut gw, &clients[0], json!({ "type": "startGame", "lobbyId": code, "terrainData": { "v": 1 } }));

        let mut late = connect(&mut gw);
        send(&mut gw, &late, json!({ "type": "joinLobbyRequest", "lobbyId": code }));
        let msgs = late.drain();
        assert_eq!(msgs[0]["type"], json!("lobbyJoined"));
        assert_eq!(msgs[0]["gameStarted"], json!(true));
        assert_eq!(msgs[0]["terrainData"], json!({ "v": 1 }));
    }

    #[test]
    fn movement_and_shots_are_relayed_to_others_only() {
        let mut gw = gateway();
        let (_, mut clients) = lobby_of(&mut gw, 3);
        let mover = clients[0].id;

        send(
            &mut gw,
            &clients[0],
            json!({
                "type": "newBoatPosition",
                "position": { "x": 5.0, "y": 0.0, "z": -3.0 },
                "rotation": { "x": 0.0, "y": 0.5, "z": 0.0 }
            }),
        );
        send(
            &mut gw,
            &clients[0],
            json!({
                "type": "projectileFired",
                "position": { "x": 5.0, "y": 1.0, "z": -3.0 },
                "rotation": { "x": 0.0, "y": 0.5, "z": 0.0 },
                "sideOfBoat": "left",
                "timestamp": 99.0
            }),
        );

        assert!(clients[0].drain().is_empty());
        for client in clients.iter_mut().skip(1) {
            let msgs = client.drain();
            assert_eq!(kinds(&msgs), vec!["enemyBoatPosition", "enemyProjectileFired"]);
            assert_eq!(msgs[0]["playerId"], json!(mover));
            assert_eq!(msgs[1]["ownerId"], json!(mover));
            assert_eq!(msgs[1]["sideOfBoat"], json!("left"));
        }
    }

    #[test]
    fn hits_kill_once_and_end_the_match_once() {
        let mut gw = gateway();
        let (_, mut clients) = match_of(&mut gw, 3);
        let ids: Vec<ConnId> = clients.iter().map(|c| c.id).collect();

        for _ in 0..3 {
            hit(&mut gw, &clients[0], ids[0], ids[1], 30.0);
        }
        let msgs = clients[2].drain();
        assert_eq!(kinds(&msgs), vec!["playerHit"; 3]);
        assert_eq!(msgs[2]["health"], json!(10.0));

        hit(&mut gw, &clients[0], ids[0], ids[1], 30.0);
        let msgs = clients[2].drain();
        assert_eq!(kinds(&msgs), vec!["playerHit", "playerKilled"]);
        assert_eq!(msgs[1]["playerId"], json!(ids[1]));
        assert_eq!(msgs[1]["killerId"], json!(ids[0]));

        // Replayed hit on the dead player changes nothing
        hit(&mut gw, &clients[0], ids[0], ids[1], 30.0);
        assert!(clients[2].drain().is_empty());

        for client in clients.iter_mut() {
            client.drain();
        }

        // Second death leaves player 2 as sole survivor
        hit(&mut gw, &clients[2], ids[2], ids[0], 100.0);
        let msgs = clients[1].drain();
        assert_eq!(kinds(&msgs), vec!["playerHit", "playerKilled", "gameOver"]);
        assert_eq!(msgs[2]["winnerId"], json!(ids[2]));
        assert_eq!(msgs[2]["winnerName"], json!("P2"));

        for client in clients.iter_mut() {
            client.drain();
        }
        // Sunk boats cannot fire, and the match never ends twice
        hit(&mut gw, &clients[0], ids[0], ids[2], 10.0);
        hit(&mut gw, &clients[1], ids[1], ids[2], 10.0);
        assert!(clients[2].drain().is_empty());
    }

    #[test]
    fn combat_before_start_changes_nothing() {
        let mut gw = gateway();
        let (code, mut clients) = lobby_of(&mut gw, 3);
        let ids: Vec<ConnId> = clients.iter().map(|c| c.id).collect();

        hit(&mut gw, &clients[0], ids[0], ids[1], 100.0);
        hit(&mut gw, &clients[0], ids[0], ids[2], 100.0);
        send(&mut gw, &clients[1], json!({ "type": "playerHeal", "healAmount": 5.0 }));
        for client in clients.iter_mut() {
            assert!(client.drain().is_empty());
        }

        // The real match can still end
        send(&mut gw, &clients[0], json!({ "type": "startGame", "lobbyId": code }));
        for client in clients.iter_mut() {
            client.drain();
        }
        hit(&mut gw, &clients[0], ids[0], ids[1], 100.0);
        hit(&mut gw, &clients[0], ids[0], ids[2], 100.0);
        let msgs = clients[0].drain();
        assert_eq!(
            kinds(&msgs),
            vec!["playerHit", "playerKilled", "playerHit", "playerKilled", "gameOver"]
        );
        assert_eq!(msgs[4]["winnerId"], json!(ids[0]));
    }

    #[test]
    fn forged_hit_is_dropped_silently() {
        let mut gw = gateway();
        let (code, mut clients) = match_of(&mut gw, 3);
        let (a, b) = (clients[0].id, clients[1].id);

        // Client 2 tries to attribute a hit on client 1 to client 0
        hit(&mut gw, &clients[2], a, b, 60.0);
        for client in clients.iter_mut() {
            assert!(client.drain().is_empty());
        }
        let health = gw
            .registry
            .get(&code)
            .and_then(|l| l.player(b))
            .map(|p| p.health);
        assert_eq!(health, Some(100.0));
    }

    #[test]
    fn heal_is_broadcast() {
        let mut gw = gateway();
        let (_, mut clients) = match_of(&mut gw, 2);
        let (a, b) = (clients[0].id, clients[1].id);

        hit(&mut gw, &clients[0], a, b, 50.0);
        send(&mut gw, &clients[1], json!({ "type": "playerHeal", "healAmount": 20.0 }));

        let msgs = clients[0].drain();
        assert_eq!(kinds(&msgs), vec!["playerHit", "playerHealed"]);
        assert_eq!(msgs[1]["playerId"], json!(b));
        assert_eq!(msgs[1]["health"], json!(70.0));
    }

    #[test]
    fn leaving_a_started_match_can_end_it() {
        let mut gw = gateway();
        let (_, mut clients) = match_of(&mut gw, 2);

        send(&mut gw, &clients[0], json!({ "type": "leaveLobbyRequest" }));
        let msgs = clients[1].drain();
        assert_eq!(kinds(&msgs), vec!["becameHost", "lobbyUpdated", "gameOver"]);
        assert_eq!(msgs[2]["winnerId"], json!(clients[1].id));
    }

    #[test]
    fn dropped_player_can_reconnect_mid_match() {
        let mut gw = gateway();
        let (code, mut clients) = match_of(&mut gw, 2);
        let dropped = clients[1].id;

        disconnect(&mut gw, &clients[1]);
        assert!(clients[0].drain().is_empty());
        let lobby = gw.registry.get(&code).expect("lobby kept");
        assert!(lobby.contains(dropped));
        assert!(!lobby.is_match_over());

        let mut returning = connect(&mut gw);
        send(
            &mut gw,
            &returning,
            json!({ "type": "confirmGameStart", "lobbyId": code, "wasHost": false }),
        );

        let msgs = returning.drain();
        assert_eq!(kinds(&msgs), vec!["lobbyJoined", "lobbyUpdated"]);
        assert_eq!(msgs[0]["gameStarted"], json!(true));
        assert_eq!(kinds(&clients[0].drain()), vec!["lobbyUpdated"]);

        let lobby = gw.registry.get(&code).expect("lobby");
        assert!(lobby.contains(returning.id));
        assert!(!lobby.contains(dropped));
        assert_eq!(lobby.players().len(), 2);
        assert!(gw.orphans.is_empty());

        // The claimed record plays on under the new id
        hit(&mut gw, &returning, returning.id, clients[0].id, 25.0);
        assert_eq!(kinds(&clients[0].drain()), vec!["playerHit"]);
    }

    #[test]
    fn dropped_host_is_replaced_after_grace_period() {
        let mut gw = gateway();
        let (code, mut clients) = match_of(&mut gw, 3);

        disconnect(&mut gw, &clients[0]);
        gw.expire_orphans(Instant::now());
        assert!(clients[1].drain().is_empty());
        assert_eq!(gw.registry.get(&code).map(|l| l.players().len()), Some(3));

        gw.expire_orphans(Instant::now() + DEFAULT_RECONNECT_GRACE + Duration::from_secs(1));
        assert_eq!(kinds(&clients[1].drain()), vec!["becameHost", "lobbyUpdated"]);
        assert_eq!(kinds(&clients[2].drain()), vec!["lobbyUpdated"]);
        assert_eq!(gw.registry.get(&code).map(|l| l.host_id()), Some(clients[1].id));
        assert!(gw.orphans.is_empty());

        // Nothing left to claim once the window closed
        let mut late = connect(&mut gw);
        send(
            &mut gw,
            &late,
            json!({ "type": "confirmGameStart", "lobbyId": code, "wasHost": true }),
        );
        assert!(late.drain().is_empty());
    }

    #[test]
    fn zero_grace_removes_dropped_players_at_once() {
        let registry = LobbyRegistry::with_seed(
            TerrainSettings {
                size: 8,
                ..Default::default()
            },
            23,
        );
        let mut gw = SessionGateway::new(registry, Duration::ZERO).0;
        let (_, mut clients) = match_of(&mut gw, 2);

        disconnect(&mut gw, &clients[0]);
        let msgs = clients[1].drain();
        assert_eq!(kinds(&msgs), vec!["becameHost", "lobbyUpdated", "gameOver"]);
        assert!(gw.orphans.is_empty());
    }

    #[test]
    fn creating_a_lobby_leaves_the_previous_one() {
        let mut gw = gateway();
        let (first, mut clients) = lobby_of(&mut gw, 2);

        send(&mut gw, &clients[1], json!({ "type": "createLobbyRequest" }));
        let msgs = clients[1].drain();
        assert_eq!(kinds(&msgs), vec!["lobbyCreated"]);
        assert_ne!(msgs[0]["lobbyId"], json!(first));

        assert_eq!(gw.registry.get(&first).map(|l| l.players().len()), Some(1));
        assert_eq!(kinds(&clients[0].drain()), vec!["lobbyUpdated"]);
        assert_eq!(gw.stats.active_lobbies(), 2);
    }

    #[test]
    fn confirm_game_start_claims_record_with_matching_role() {
        let mut gw = gateway();
        let (code, mut clients) = match_of(&mut gw, 2);
        let old_host = clients[0].id;
        disconnect(&mut gw, &clients[0]);

        // Only the host's record is orphaned
        let mut returning = connect(&mut gw);
        let confirm = |was_host: bool| {
            json!({ "type": "confirmGameStart", "lobbyId": code, "wasHost": was_host })
        };
        send(&mut gw, &returning, confirm(false));
        assert!(returning.drain().is_empty());

        send(&mut gw, &returning, confirm(true));
        let msgs = returning.drain();
        assert_eq!(kinds(&msgs), vec!["lobbyJoined", "lobbyUpdated"]);
        assert_eq!(msgs[1]["players"][0]["id"], json!(returning.id));
        assert_eq!(msgs[1]["players"][0]["isHost"], json!(true));
        assert_eq!(kinds(&clients[1].drain()), vec!["lobbyUpdated"]);

        let lobby = gw.registry.get(&code).expect("lobby");
        assert_eq!(lobby.host_id(), returning.id);
        assert!(!lobby.contains(old_host));

        // Already registered: state is simply re-sent
        send(&mut gw, &returning, confirm(true));
        assert_eq!(kinds(&returning.drain()), vec!["lobbyJoined"]);

        // Nothing left to claim
        let mut stranger = connect(&mut gw);
        send(&mut gw, &stranger, confirm(true));
        assert!(stranger.drain().is_empty());
    }

    #[test]
    fn ping_is_answered_and_unregistered_senders_are_ignored() {
        let mut gw = gateway();
        let mut client = connect(&mut gw);
        send(&mut gw, &client, json!({ "type": "ping", "t": 77 }));
        let msgs = client.drain();
        assert_eq!(msgs, vec![json!({ "type": "pong", "t": 77 })]);

        gw.handle_event(GatewayEvent::Message {
            conn_id: Uuid::new_v4(),
            msg: ClientMsg::CreateLobbyRequest { host_nickname: None },
        });
        assert_eq!(gw.stats.active_lobbies(), 0);
    }

    #[test]
    fn display_names_are_trimmed_capped_and_defaulted() {
        let id = Uuid::new_v4();
        assert_eq!(display_name(Some("  Drake "), id), "Drake");
        assert_eq!(display_name(Some("x".repeat(40).as_str()), id).len(), MAX_NICKNAME_LEN);
        let fallback = display_name(Some("   "), id);
        assert_eq!(fallback, format!("Player_{}", &id.to_string()[..4]));
        assert_eq!(display_name(None, id), fallback);
    }

    #[tokio::test]
    async fn run_loop_processes_events_in_order() {
        let (gateway, handle) = SessionGateway::new(
            LobbyRegistry::with_seed(
                TerrainSettings {
                    size: 8,
                    ..Default::default()
                },
                1,
            ),
            DEFAULT_RECONNECT_GRACE,
        );
        let task = tokio::spawn(gateway.run());

        let (outbox, mut rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = Uuid::new_v4();
        tokio_test::assert_ok!(handle.connect(id, outbox).await);
        tokio_test::assert_ok!(
            handle
                .dispatch(id, ClientMsg::CreateLobbyRequest { host_nickname: None })
                .await
        );
        tokio_test::assert_ok!(handle.dispatch(id, ClientMsg::Ping { t: 5 }).await);

        assert!(matches!(rx.recv().await, Some(ServerMsg::LobbyCreated { .. })));
        assert!(matches!(rx.recv().await, Some(ServerMsg::Pong { t: 5 })));
        assert_eq!(handle.stats().active_lobbies(), 1);
        assert_eq!(handle.stats().connections(), 1);

        tokio_test::assert_ok!(handle.disconnect(id).await);
        drop(handle);
        tokio_test::assert_ok!(task.await);
    }
}
