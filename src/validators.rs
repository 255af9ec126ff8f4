/// Input validators for registration and login payloads
///
/// Length limits keep oversized input away from bcrypt and the store; the
/// character rules keep handles printable and unambiguous in logs.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MIN_HANDLE_LENGTH: usize = 3;
const MAX_HANDLE_LENGTH: usize = 64;
const MIN_PASSWORD_LENGTH: usize = 8;
/// bcrypt reads at most 72 bytes including the NUL terminator it appends,
/// so anything longer than 71 bytes would be silently truncated
pub const MAX_PASSWORD_LENGTH: usize = 71;
const MAX_FIRST_NAME_LENGTH: usize = 32;
const MAX_AGE: i32 = 150;

lazy_static! {
    static ref HANDLE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.@+-]+$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ()-]{5,20}$").unwrap();
}

/// Validates a login handle
///
/// Surrounding whitespace is trimmed; the result is otherwise kept verbatim
/// since handles are case-sensitive.
pub fn is_valid_handle(handle: &str) -> Result<String, ValidationError> {
    let trimmed = handle.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username"));
    }

    let length = trimmed.chars().count();
    if length < MIN_HANDLE_LENGTH {
        return Err(ValidationError::TooShort("username", MIN_HANDLE_LENGTH));
    }
    if length > MAX_HANDLE_LENGTH {
        return Err(ValidationError::TooLong("username", MAX_HANDLE_LENGTH));
    }

    if !HANDLE_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("username"));
    }

    Ok(trimmed.to_string())
}

/// Validates a new password before it is hashed
pub fn is_valid_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password"));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort("password", MIN_PASSWORD_LENGTH));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password", MAX_PASSWORD_LENGTH));
    }
    if password.contains('\0') {
        return Err(ValidationError::InvalidFormat("password"));
    }
    Ok(())
}

/// Validates an optional display name
pub fn is_valid_first_name(name: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if name.chars().count() > MAX_FIRST_NAME_LENGTH {
        return Err(ValidationError::TooLong("first_name", MAX_FIRST_NAME_LENGTH));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidFormat("first_name"));
    }

    Ok(Some(name.to_string()))
}

/// Validates an optional contact phone number
pub fn is_valid_phone_number(phone: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    if !PHONE_REGEX.is_match(phone) {
        return Err(ValidationError::InvalidFormat("phone_number"));
    }

    Ok(Some(phone.to_string()))
}

pub fn is_valid_age(age: Option<i32>) -> Result<Option<i32>, ValidationError> {
    match age {
        Some(age) if !(0..=MAX_AGE).contains(&age) => Err(ValidationError::OutOfRange("age")),
        other => Ok(other),
    }
}
