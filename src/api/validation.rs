//! Input validation for API requests.
//!
//! Each check returns `Result<(), String>` so it can feed
//! `ValidationErrorBuilder::check` in the `error` module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{parse_date, INVITE_CODE_LENGTH};

lazy_static! {
    /// Pragmatic email check: something@something.tld, no whitespace
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$"
    ).unwrap();

    /// E.164 phone numbers as required by WhatsApp delivery
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+[1-9]\d{6,14}$").unwrap();

    static ref CURRENCY_REGEX: Regex = Regex::new(r"^[A-Z]{3}$").unwrap();
}

/// Largest amount accepted anywhere (one billion in major units)
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// Password policy: at least 8 characters with a letter and a digit
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err("Password must contain at least one letter and one number".to_string());
    }
    Ok(())
}

/// Required free-text field with a maximum length
pub fn validate_text(value: &str, field: &str, max: usize) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is required", field));
    }
    if trimmed.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", field, max));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    validate_text(name, "Name", 100)
}

/// Optional notes field
pub fn validate_notes(notes: &Option<String>) -> Result<(), String> {
    match notes {
        Some(n) if n.chars().count() > 1000 => {
            Err("Notes are too long (max 1000 characters)".to_string())
        }
        _ => Ok(()),
    }
}

/// Money amounts must be positive whole cents
pub fn validate_amount(amount_cents: i64) -> Result<(), String> {
    if amount_cents <= 0 {
        return Err("Amount must be greater than zero".to_string());
    }
    if amount_cents > MAX_AMOUNT_CENTS {
        return Err("Amount is too large".to_string());
    }
    Ok(())
}

pub fn validate_date(value: &str) -> Result<NaiveDate, String> {
    parse_date(value)
}

/// Optional inclusive date range from query parameters
pub fn validate_range(from: &Option<String>, to: &Option<String>) -> Result<(), String> {
    let from = from.as_deref().map(parse_date).transpose()?;
    let to = to.as_deref().map(parse_date).transpose()?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err("'from' must not be after 'to'".to_string());
        }
    }
    Ok(())
}

pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }
    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }
    Ok(())
}

pub fn validate_invite_code(code: &str) -> Result<(), String> {
    let code = code.trim();
    if code.is_empty() {
        return Err("Invite code is required".to_string());
    }
    if code.len() != INVITE_CODE_LENGTH || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!(
            "Invite code must be {} letters or digits",
            INVITE_CODE_LENGTH
        ));
    }
    Ok(())
}

/// Optional phone number; empty clears it
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    match phone.as_deref().map(str::trim) {
        None | Some("") => Ok(()),
        Some(p) if PHONE_REGEX.is_match(p) => Ok(()),
        Some(_) => Err("Phone must be in international format, e.g. +233201234567".to_string()),
    }
}

pub fn validate_currency(currency: &str) -> Result<(), String> {
    if !CURRENCY_REGEX.is_match(currency) {
        return Err("Currency must be a 3-letter ISO code, e.g. USD".to_string());
    }
    Ok(())
}

pub fn validate_rating(rating: i64) -> Result<(), String> {
    if !(1..=5).contains(&rating) {
        return Err("Rating must be between 1 and 5".to_string());
    }
    Ok(())
}

/// Parse an optional enum field, falling back to `default`
pub fn parse_or<T>(value: &Option<String>, default: T) -> Result<T, String>
where
    T: std::str::FromStr<Err = String>,
{
    match value.as_deref() {
        None => Ok(default),
        Some(v) => v.parse(),
    }
}
