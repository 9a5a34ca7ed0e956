//! Recipient number validation and normalization.
//!
//! Validation runs before any gateway call so that a number the gateway would
//! reject anyway never consumes quota. Kenyan mobile numbers in local or
//! country-code form normalize to canonical `+254...`; other numbers pass only
//! in full international form.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Kenyan mobile ranges: optional `+254`/`254`/`0` prefix, then a 7xx or 1xx
/// subscriber number.
static KENYAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\+?254|0)?([17]\d{8})$").expect("valid regex"));

/// Generic international form: `+` followed by 10 to 15 digits.
static INTERNATIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+\d{10,15}$").expect("valid regex"));

/// Numbering plan a validated number belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Kenya,
    International,
}

/// A recipient number that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedPhone {
    /// Canonical `+<countrycode><subscriber>` form
    pub normalized: String,
    pub region: Region,
}

/// Why a raw number was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,

    #[error("phone number '{0}' does not match a Kenyan mobile or international format")]
    Unrecognized(String),
}

/// Validate and normalize a raw recipient number.
///
/// Strips everything but digits and `+` before matching, so formatted input
/// like `0722 000-000` is accepted.
pub fn validate(raw: &str) -> std::result::Result<ValidatedPhone, PhoneError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.is_empty() {
        return Err(PhoneError::Empty);
    }

    if let Some(captures) = KENYAN.captures(&cleaned) {
        return Ok(ValidatedPhone {
            normalized: format!("+254{}", &captures[1]),
            region: Region::Kenya,
        });
    }

    if INTERNATIONAL.is_match(&cleaned) {
        return Ok(ValidatedPhone {
            normalized: cleaned,
            region: Region::International,
        });
    }

    Err(PhoneError::Unrecognized(raw.to_string()))
}
