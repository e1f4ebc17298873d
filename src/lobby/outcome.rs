//! Result of a lobby or combat operation

/// What happened to a state-changing request.
///
/// Unauthorized and replayed requests are not errors on the wire, but tests
/// and logs need to tell them apart from success.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The request mutated state
    Applied(T),
    /// The caller lacks authority; nothing changed
    IgnoredUnauthorized,
    /// The request was invalid for the current state; nothing changed
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::IgnoredUnauthorized => Outcome::IgnoredUnauthorized,
            Outcome::Rejected(reason) => Outcome::Rejected(reason),
        }
    }
}

/// Why a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Lobby not found")]
    LobbyNotFound,

    #[error("Not a member of any lobby")]
    NotInLobby,

    #[error("Game already started")]
    GameAlreadyStarted,

    #[error("Game has not started")]
    GameNotStarted,

    #[error("Hit attributed to a different connection")]
    InvalidHitAttribution,

    #[error("A player cannot hit their own boat")]
    SelfHit,

    #[error("Amount must be a positive number")]
    InvalidAmount,

    #[error("Target player not found")]
    TargetNotFound,

    #[error("Player not found")]
    PlayerNotFound,

    #[error("Player is already dead")]
    AlreadyDead,

    #[error("No player record to re-attach")]
    NoRebindCandidate,
}

impl Rejection {
    /// Only structural errors are reported back to the client
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Rejection::LobbyNotFound)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::LobbyNotFound => "lobby_not_found",
            Rejection::NotInLobby => "not_in_lobby",
            Rejection::GameAlreadyStarted => "game_already_started",
            Rejection::GameNotStarted => "game_not_started",
            Rejection::InvalidHitAttribution => "invalid_hit_attribution",
            Rejection::SelfHit => "self_hit",
            Rejection::InvalidAmount => "invalid_amount",
            Rejection::TargetNotFound => "target_not_found",
            Rejection::PlayerNotFound => "player_not_found",
            Rejection::AlreadyDead => "already_dead",
            Rejection::NoRebindCandidate => "no_rebind_candidate",
        }
    }
}
