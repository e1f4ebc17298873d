//! Human-enterable lobby codes

use rand::Rng;

pub type LobbyCode = String;

pub const CODE_LENGTH: usize = 6;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Six upper-case base-36 digits read off the fraction of a random value.
/// Uniqueness is the caller's job.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> LobbyCode {
    let mut fraction: f64 = rng.gen();
    let mut code = String::with_capacity(CODE_LENGTH);
    for _ in 0..CODE_LENGTH {
        fraction *= 36.0;
        let digit = (fraction as usize).min(35);
        fraction -= digit as f64;
        code.push(BASE36_DIGITS[digit] as char);
    }
    code
}

/// Canonical form of a code typed by a user
pub fn normalize_code(input: &str) -> LobbyCode {
    input.trim().to_ascii_uppercase()
}
