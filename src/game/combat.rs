//! Combat arbitration - hit attribution, damage, healing, match end

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::lobby::{ConnId, Lobby, LobbyPhase, LobbyRegistry, Outcome, Rejection};
use crate::ws::protocol::Vec3;

/// A hit reported by the attacker's client
#[derive(Debug, Clone)]
pub struct HitEvent {
    pub attacker_id: Uuid,
    pub target_id: Uuid,
    /// Already distance-scaled by the client; taken as-is
    pub damage: f32,
    pub hit_position: Vec3,
    pub timestamp: f64,
}

/// Accepted hit
#[derive(Debug, Clone, PartialEq)]
pub struct HitReport {
    pub attacker_id: Uuid,
    pub target_id: Uuid,
    pub damage: f32,
    /// Target health after the hit
    pub health: f32,
    pub killed: bool,
    pub game_over: Option<GameOver>,
}

/// Match end, with the sole survivor if there is one
#[derive(Debug, Clone, PartialEq)]
pub struct GameOver {
    pub winner_id: Option<Uuid>,
    pub winner_name: Option<String>,
}

/// Accepted heal
#[derive(Debug, Clone, PartialEq)]
pub struct HealReport {
    pub player_id: Uuid,
    pub amount: f32,
    /// Health after the heal
    pub health: f32,
}

/// Validates and applies combat events against lobby state
pub struct CombatArbiter;

impl CombatArbiter {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Apply healing, capped at max health
    pub fn apply_healing(current_health: f32, amount: f32, max_health: f32) -> f32 {
        (current_health + amount).min(max_health)
    }

    /// Validate and apply a hit reported over `sender`'s connection
    pub fn apply_hit(
        registry: &mut LobbyRegistry,
        lobby_id: &str,
        sender: ConnId,
        event: &HitEvent,
    ) -> Outcome<HitReport> {
        let Some(lobby) = registry.get_mut(lobby_id) else {
            return Outcome::Rejected(Rejection::LobbyNotFound);
        };

        if lobby.phase() != LobbyPhase::Started {
            debug!(lobby_id = %lobby_id, sender = %sender, "Hit before game start ignored");
            return Outcome::Rejected(Rejection::GameNotStarted);
        }

        if event.attacker_id != sender {
            warn!(
                lobby_id = %lobby_id,
                sender = %sender,
                claimed_attacker = %event.attacker_id,
                target = %event.target_id,
                "Hit attributed to another connection, dropping"
            );
            return Outcome::Rejected(Rejection::InvalidHitAttribution);
        }

        if event.target_id == sender {
            debug!(lobby_id = %lobby_id, sender = %sender, "Self-hit ignored");
            return Outcome::Rejected(Rejection::SelfHit);
        }

        if !is_positive_amount(event.damage) {
            return Outcome::Rejected(Rejection::InvalidAmount);
        }

        // A sunk boat cannot fire
        match lobby.player(sender) {
            None => return Outcome::Rejected(Rejection::PlayerNotFound),
            Some(attacker) if !attacker.alive => {
                debug!(lobby_id = %lobby_id, sender = %sender, "Hit from dead player ignored");
                return Outcome::Rejected(Rejection::AlreadyDead);
            }
            Some(_) => {}
        }

        let Some(target) = lobby.player_mut(event.target_id) else {
            return Outcome::Rejected(Rejection::TargetNotFound);
        };

        if !target.alive {
            debug!(lobby_id = %lobby_id, target = %event.target_id, "Hit on dead player ignored");
            return Outcome::Rejected(Rejection::AlreadyDead);
        }

        let (health, killed) = Self::apply_damage(target.health, event.damage);
        target.health = health;
        if killed {
            target.alive = false;
            info!(
                lobby_id = %lobby_id,
                victim = %event.target_id,
                killer = %sender,
                "Player killed"
            );
        }

        let game_over = Self::check_match_over(lobby);

        Outcome::Applied(HitReport {
            attacker_id: sender,
            target_id: event.target_id,
            damage: event.damage,
            health,
            killed,
            game_over,
        })
    }

    /// Heal the sender's own boat
    pub fn apply_heal(
        registry: &mut LobbyRegistry,
        lobby_id: &str,
        sender: ConnId,
        amount: f32,
    ) -> Outcome<HealReport> {
        let Some(lobby) = registry.get_mut(lobby_id) else {
            return Outcome::Rejected(Rejection::LobbyNotFound);
        };

        if lobby.phase() != LobbyPhase::Started {
            return Outcome::Rejected(Rejection::GameNotStarted);
        }

        if !is_positive_amount(amount) {
            return Outcome::Rejected(Rejection::InvalidAmount);
        }

        let Some(player) = lobby.player_mut(sender) else {
            return Outcome::Rejected(Rejection::PlayerNotFound);
        };

        if !player.alive {
            return Outcome::Rejected(Rejection::AlreadyDead);
        }

        player.health = Self::apply_healing(player.health, amount, player.max_health);

        Outcome::Applied(HealReport {
            player_id: sender,
            amount,
            health: player.health,
        })
    }

    /// End the match once at most one player is alive. Fires once per lobby.
    pub fn check_match_over(lobby: &mut Lobby) -> Option<GameOver> {
        if lobby.is_match_over() || lobby.alive_count() > 1 {
            return None;
        }
        if !lobby.latch_match_over() {
            return None;
        }

        let survivor = lobby.players().iter().find(|p| p.alive);
        let game_over = GameOver {
            winner_id: survivor.map(|p| p.id),
            winner_name: survivor.map(|p| p.name.clone()),
        };

        info!(
            lobby_id = %lobby.id(),
            winner = ?game_over.winner_id,
            "Game over"
        );

        Some(game_over)
    }
}

fn is_positive_amount(amount: f32) -> bool {
    amount.is_finite() && amount > 0.0
}
