use std::sync::LazyLock;

use regex::Regex;

use crate::models::ContactInfo;
use crate::utils::error::{AppError, AppResult};

const MAX_NAME_LEN: usize = 100;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

/// Phone formats per country, matched against the normalized number.
static PHONE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("KZ", r"^\+7[67]\d{9}$"),
        ("RU", r"^\+7[3489]\d{9}$"),
        ("UZ", r"^\+998\d{9}$"),
        ("KG", r"^\+996\d{9}$"),
        ("AE", r"^\+9715\d{8}$"),
    ]
    .into_iter()
    .map(|(country, pattern)| (country, Regex::new(pattern).expect("phone pattern compiles")))
    .collect()
});

static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{7,14}$").expect("e164 pattern compiles"));

/// Strips the punctuation people type into phone fields.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

fn phone_pattern(country_code: &str) -> &'static Regex {
    PHONE_PATTERNS
        .iter()
        .find(|(country, _)| country.eq_ignore_ascii_case(country_code))
        .map(|(_, re)| re)
        .unwrap_or_else(|| LazyLock::force(&E164))
}

pub fn validate_guests(adult_count: i32, child_count: i32, max_guests: i32) -> AppResult<()> {
    if adult_count < 0 {
        return Err(AppError::validation("adult_count", "must not be negative"));
    }
    if child_count < 0 {
        return Err(AppError::validation("child_count", "must not be negative"));
    }
    let total = adult_count + child_count;
    if total < 1 {
        return Err(AppError::validation("adult_count", "at least one guest is required"));
    }
    if child_count > 0 && adult_count < 1 {
        return Err(AppError::validation(
            "adult_count",
            "children must be accompanied by an adult",
        ));
    }
    if total > max_guests {
        return Err(AppError::validation(
            "adult_count",
            format!("at most {max_guests} guests per booking"),
        ));
    }
    Ok(())
}

/// Checks and normalizes contact details for a park in `country_code`.
pub fn validate_contact(contact: &ContactInfo, country_code: &str) -> AppResult<ContactInfo> {
    let name = contact.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("contact.name", "name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::validation(
            "contact.name",
            format!("name must be at most {MAX_NAME_LEN} characters"),
        ));
    }

    let phone = normalize_phone(contact.phone.trim());
    if !phone_pattern(country_code).is_match(&phone) {
        return Err(AppError::validation(
            "contact.phone",
            format!("'{}' is not a valid {country_code} phone number", contact.phone),
        ));
    }

    let email = match contact.email.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(email) if EMAIL.is_match(email) => Some(email.to_lowercase()),
        Some(email) => {
            return Err(AppError::validation(
                "contact.email",
                format!("'{email}' is not a valid email address"),
            ))
        }
    };

    Ok(ContactInfo {
        name: name.to_string(),
        phone,
        email,
    })
}
