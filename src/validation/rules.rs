//! String format rules.

use url::Url;
use uuid::Uuid;

const PASSWORD_SPECIALS: &str = "@$!%*?&";

/// Canonical hyphenated UUID (8-4-4-4-12).
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

/// Pragmatic address check: `local@domain.tld`, no whitespace, dotted domain
/// with a letters-only TLD of at least two characters.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || value.chars().any(char::is_whitespace) {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let label_ok = |label: &&str| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !labels.iter().all(label_ok) {
        return false;
    }
    labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
}

/// Absolute URL.
pub fn is_url(value: &str) -> bool {
    Url::parse(value).is_ok()
}

/// E.164-style number: optional `+`, leading 1-9, 2 to 15 digits total.
pub fn is_phone(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    let len = digits.len();
    (2..=15).contains(&len)
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// At least 8 characters from `[A-Za-z0-9@$!%*?&]` with one lowercase, one
/// uppercase, one digit, and one special character.
pub fn is_strong_password(value: &str) -> bool {
    let is_special = |c: char| PASSWORD_SPECIALS.contains(c);
    value.chars().count() >= 8
        && value.chars().all(|c| c.is_ascii_alphanumeric() || is_special(c))
        && value.chars().any(|c| c.is_ascii_lowercase())
        && value.chars().any(|c| c.is_ascii_uppercase())
        && value.chars().any(|c| c.is_ascii_digit())
        && value.chars().any(is_special)
}
