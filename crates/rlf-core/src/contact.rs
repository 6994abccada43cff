//! Phone and email extraction from free page text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PHONE_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?:\+1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").expect("phone pattern"),
        Regex::new(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b").expect("bare phone pattern"),
    ]
});

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("email pattern")
});

/// Substrings that mark an address as automated rather than a person.
pub const BLOCKED_EMAIL_MARKERS: [&str; 5] = ["noreply", "donotreply", "no-reply", "system", "admin"];

const MIN_PHONE_CHARS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none()
    }
}

pub fn extract_contacts(text: &str) -> ContactInfo {
    ContactInfo {
        phone: extract_phone(text),
        email: extract_email(text),
    }
}

/// First phone-like run in `text`, normalized to `+1-AAA-BBB-CCCC` when it is a
/// bare 10-digit or `1`-prefixed 11-digit number. Anything else (an explicit
/// `+1` prefix included) comes back as the stripped digit string.
pub fn extract_phone(text: &str) -> Option<String> {
    for pattern in PHONE_PATTERNS.iter() {
        let Some(found) = pattern.find(text) else {
            continue;
        };
        let stripped: String = found
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        if stripped.len() >= MIN_PHONE_CHARS {
            return Some(format_us_phone(&stripped));
        }
    }
    None
}

fn format_us_phone(stripped: &str) -> String {
    let digits = match stripped.len() {
        10 => stripped,
        11 if stripped.starts_with('1') => &stripped[1..],
        _ => return stripped.to_string(),
    };
    format!("+1-{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..])
}

/// First email in `text`, lowercased. Automated senders are dropped.
pub fn extract_email(text: &str) -> Option<String> {
    let email = EMAIL_PATTERN.find(text)?.as_str().to_lowercase();
    if is_blocked_email(&email) {
        return None;
    }
    Some(email)
}

fn is_blocked_email(email: &str) -> bool {
    BLOCKED_EMAIL_MARKERS.iter().any(|marker| email.contains(marker))
}

/// Shape check applied when a lead record is built.
pub fn is_valid_phone(phone: &str) -> bool {
    let body = phone.strip_prefix('+').unwrap_or(phone);
    let digits = body.chars().filter(char::is_ascii_digit).count();
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '-')
        && phone.len() >= MIN_PHONE_CHARS
        && digits >= MIN_PHONE_CHARS
}

pub fn is_valid_email(email: &str) -> bool {
    email.matches('@').count() == 1
        && email == email.to_lowercase()
        && !is_blocked_email(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parenthesized_us_number() {
        assert_eq!(extract_phone("Call (214) 555-0199 today").as_deref(), Some("+1-214-555-0199"));
    }

    #[test]
    fn country_code_forms() {
        assert_eq!(extract_phone("Agent: +1 972.555.0142").as_deref(), Some("+19725550142"));
        assert_eq!(extract_phone("tel 1 817.555.0100").as_deref(), Some("+1-817-555-0100"));
    }

    #[test]
    fn short_digit_runs_are_not_phones() {
        assert_eq!(extract_phone("Built 1998, 3 bed 2 bath, lot 555-01"), None);
        assert_eq!(extract_phone(""), None);
    }

    #[test]
    fn every_phone_matches_wire_shape() {
        let shape = Regex::new(r"^\+?[0-9-]{10,}$").unwrap();
        for text in [
            "(214) 555-0199",
            "+1 (469) 555-0123",
            "call 2145550199 now",
            "office 214 555 0199 ext 3",
        ] {
            let phone = extract_phone(text).unwrap();
            assert!(shape.is_match(&phone), "{phone} from {text}");
            assert!(is_valid_phone(&phone));
        }
    }

    #[test]
    fn email_is_lowercased_and_automated_senders_dropped() {
        assert_eq!(extract_email("contact: noreply@example.com"), None);
        assert_eq!(extract_email("contact: jane@example.com").as_deref(), Some("jane@example.com"));
        assert_eq!(extract_email("Email JANE.DOE@Realty.COM").as_deref(), Some("jane.doe@realty.com"));
        assert_eq!(extract_email("write to sysadmin@county.gov"), None);
    }

    #[test]
    fn only_first_email_is_considered() {
        assert_eq!(extract_email("no-reply@mls.com or agent@realty.com"), None);
    }

    #[test]
    fn contacts_are_extracted_together() {
        let info = extract_contacts("Listed by Pat Lee, (817) 555-0111, pat@lee-homes.com");
        assert_eq!(info.phone.as_deref(), Some("+1-817-555-0111"));
        assert_eq!(info.email.as_deref(), Some("pat@lee-homes.com"));
        assert!(extract_contacts("nothing here").is_empty());
    }
}
