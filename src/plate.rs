//! Canonical form of a registration mark (VRM).
//!
//! The canonical plate is the key for the cache, the single-flight coordinator and
//! every provider request, so two spellings of the same plate must collapse here.

use crate::errors::LookupError;

pub const MIN_PLATE_LEN: usize = 2;
pub const MAX_PLATE_LEN: usize = 10;

/// Strips all whitespace, upper-cases and validates a raw plate.
///
/// Normalizing an already-canonical plate returns it unchanged.
pub fn normalize_plate(raw: &str) -> Result<String, LookupError> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    // Checked before upper-casing: some non-ASCII letters upper-case to ASCII ("ß" to "SS").
    if !stripped.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LookupError::InvalidFormat(format!(
            "registration '{}' contains invalid characters",
            stripped
        )));
    }

    let plate = stripped.to_ascii_uppercase();
    let len = plate.len();
    if !(MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&len) {
        return Err(LookupError::InvalidFormat(format!(
            "registration must be {}-{} characters, got {}",
            MIN_PLATE_LEN, MAX_PLATE_LEN, len
        )));
    }

    Ok(plate)
}
