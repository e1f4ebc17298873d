//! Match rules

pub mod combat;

pub use combat::{CombatArbiter, GameOver, HealReport, HitEvent, HitReport};
