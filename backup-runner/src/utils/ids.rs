//! Backup identifiers.
//!
//! Ids are lowercase base36 strings derived from a random v4 UUID. The first
//! character is always a letter so an id never parses as a number.

use uuid::Uuid;

pub const DEFAULT_ID_LENGTH: usize = 8;
pub const MIN_ID_LENGTH: usize = 4;
pub const MAX_ID_LENGTH: usize = 24;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a new backup id of `length` characters.
///
/// `length` is clamped to `MIN_ID_LENGTH..=MAX_ID_LENGTH`; the config layer
/// rejects out-of-range values before this is reached.
pub fn backup_id(length: usize) -> String {
    let length = length.clamp(MIN_ID_LENGTH, MAX_ID_LENGTH);
    let mut value = Uuid::new_v4().as_u128();
    let mut id = String::with_capacity(length);

    id.push(ALPHABET[10 + (value % 26) as usize] as char);
    value /= 26;

    while id.len() < length {
        id.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }

    id
}
