//! Identity field checks for consent records.
//!
//! These checks apply to the identity fields captured with a signed consent, before the record
//! is accepted by the persistence layer.

use crate::{ConsentError, ConsentResult};

/// Verifies that `initials` are consistent with the subject's first and last name.
///
/// Rules:
/// - Initials are 2 or 3 ASCII uppercase letters
/// - The first initial matches the first letter of the first name
/// - The last initial matches the first letter of the last name
///
/// Name comparison ignores case and surrounding whitespace.
///
/// # Errors
///
/// Returns `ConsentError::InitialsMismatch` if any rule fails.
pub fn verify_initials_against_full_name(
    first_name: &str,
    last_name: &str,
    initials: &str,
) -> ConsentResult<()> {
    let initials = initials.trim();

    if !(2..=3).contains(&initials.len()) || !initials.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ConsentError::InitialsMismatch(format!(
            "initials must be 2 or 3 uppercase letters, got '{initials}'"
        )));
    }

    let first = first_letter(first_name, "first name")?;
    let last = first_letter(last_name, "last name")?;

    let bytes = initials.as_bytes();
    if bytes[0] != first {
        return Err(ConsentError::InitialsMismatch(format!(
            "first initial '{}' does not match first name",
            bytes[0] as char
        )));
    }
    if bytes[bytes.len() - 1] != last {
        return Err(ConsentError::InitialsMismatch(format!(
            "last initial '{}' does not match last name",
            bytes[bytes.len() - 1] as char
        )));
    }

    Ok(())
}

fn first_letter(name: &str, field: &str) -> ConsentResult<u8> {
    name.trim()
        .chars()
        .next()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase() as u8)
        .ok_or_else(|| ConsentError::InitialsMismatch(format!("{field} must start with a letter")))
}
