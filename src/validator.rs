// src/validator.rs - Centralized field validation
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 ()-]{5,19}$").unwrap();
    static ref PLACEHOLDER_REGEX: Regex = Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").unwrap();
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    pub fn length(value: &str, field: &str, min: Option<usize>, max: Option<usize>) -> Result<(), String> {
        let len = value.chars().count();

        if let Some(min_len) = min {
            if len < min_len {
                return Err(format!("{} must be at least {} characters", humanize(field), min_len));
            }
        }

        if let Some(max_len) = max {
            if len > max_len {
                return Err(format!("{} must not exceed {} characters", humanize(field), max_len));
            }
        }

        Ok(())
    }

    pub fn range<T: PartialOrd + std::fmt::Display>(
        value: T,
        field: &str,
        min: Option<T>,
        max: Option<T>,
    ) -> Result<(), String> {
        match (min, max) {
            (Some(lo), Some(hi)) if value < lo || value > hi => Err(format!(
                "{} must be between {} and {}",
                capitalize(&humanize(field)),
                lo,
                hi
            )),
            (Some(lo), None) if value < lo => {
                Err(format!("{} must be at least {}", capitalize(&humanize(field)), lo))
            }
            (None, Some(hi)) if value > hi => {
                Err(format!("{} must not exceed {}", capitalize(&humanize(field)), hi))
            }
            _ => Ok(()),
        }
    }

    pub fn email(value: &str) -> Result<(), String> {
        if EMAIL_REGEX.is_match(value) {
            Ok(())
        } else {
            Err("Invalid email format".to_string())
        }
    }

    pub fn phone(value: &str) -> Result<(), String> {
        if PHONE_REGEX.is_match(value) {
            Ok(())
        } else {
            Err("Invalid phone number format".to_string())
        }
    }

    pub fn date(value: &str) -> Option<NaiveDate> {
        let head = value.get(..10)?;
        if value.len() > 10 && !matches!(value.as_bytes()[10], b' ' | b'T') {
            return None;
        }
        NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
    }

    pub fn datetime(value: &str) -> Option<NaiveDateTime> {
        DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.naive_local()))
            .or_else(|| {
                (value.len() == 10)
                    .then(|| Self::date(value))
                    .flatten()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    pub fn boolean(value: &str) -> Option<bool> {
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

/// `triage_level` -> `triage level`
pub fn humanize(field: &str) -> String {
    field.replace('_', " ")
}

pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Names of `{{placeholder}}` variables in template order, without duplicates.
pub fn template_placeholders(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in PLACEHOLDER_REGEX.captures_iter(body) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replaces every `{{name}}` with `lookup(name)`; unknown names are left untouched.
pub fn render_placeholders<F>(body: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER_REGEX
        .replace_all(body, |cap: &regex::Captures| {
            lookup(&cap[1]).unwrap_or_else(|| cap[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(FieldValidator::email("nurse@hospital.org").is_ok());
        assert!(FieldValidator::email("nurse@hospital").is_err());
    }

    #[test]
    fn test_phone() {
        assert!(FieldValidator::phone("+254 712 345678").is_ok());
        assert!(FieldValidator::phone("(020) 555-0100").is_err());
        assert!(FieldValidator::phone("call me").is_err());
    }

    #[test]
    fn test_range_message() {
        let err = FieldValidator::range(7, "triage_level", Some(1), Some(5)).unwrap_err();
        assert_eq!(err, "Triage level must be between 1 and 5");
        assert!(FieldValidator::range(3, "triage_level", Some(1), Some(5)).is_ok());
    }

    #[test]
    fn test_dates() {
        assert!(FieldValidator::date("2024-02-30").is_none());
        assert_eq!(
            FieldValidator::date("2024-03-01T08:00:00"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(FieldValidator::date("2024-03-01x").is_none());
        assert!(FieldValidator::datetime("2024-03-01 08:30").is_some());
        assert!(FieldValidator::datetime("2024-03-01").is_some());
        assert!(FieldValidator::datetime("yesterday").is_none());
    }

    #[test]
    fn test_placeholders() {
        let body = "Dear {{ name }}, your appointment is on {{date}}. Bye {{name}}.";
        assert_eq!(template_placeholders(body), vec!["name", "date"]);
        let rendered = render_placeholders(body, |k| (k == "name").then(|| "Ada".to_string()));
        assert_eq!(rendered, "Dear Ada, your appointment is on {{date}}. Bye Ada.");
    }
}
