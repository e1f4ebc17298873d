//! Lobby sessions: membership, host authority and match start

pub mod code;
pub mod model;
pub mod outcome;
pub mod registry;

pub use code::{normalize_code, LobbyCode};
pub use model::{ConnId, Lobby, LobbyPhase, Player, MAX_HEALTH};
pub use outcome::{Outcome, Rejection};
pub use registry::{Departure, LobbyRegistry};
