// src/query_builders/utils/mod.rs
//! Identifier validation and LIKE escaping

const RESERVED_WORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER",
    "UNION", "JOIN", "ORDER", "GROUP", "HAVING", "EXISTS", "AND", "OR", "NOT", "NULL",
    "TABLE", "INDEX", "VIEW", "TRIGGER", "INTO", "VALUES", "SET", "PRAGMA", "ATTACH",
];

const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Escapes LIKE wildcards for use with `ESCAPE '\'`.
pub fn escape_like_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Column identifiers: ASCII letters, digits, underscores, optionally one table alias (`b.status`).
pub fn validate_identifier(field: &str) -> Result<(), String> {
    if field.is_empty() {
        return Err("Field name cannot be empty".to_string());
    }
    if field.len() > MAX_IDENTIFIER_LENGTH {
        return Err(format!("Field name too long (max: {})", MAX_IDENTIFIER_LENGTH));
    }
    if RESERVED_WORDS.contains(&field.to_uppercase().as_str()) {
        return Err(format!("Reserved SQL word: '{}'", field));
    }

    let parts: Vec<&str> = field.split('.').collect();
    if parts.len() > 2 {
        return Err(format!("Invalid field name: '{}'", field));
    }
    for part in parts {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return Err("Field name must start with a letter".to_string()),
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(format!("Invalid character: '{}'", bad));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_value() {
        assert_eq!(escape_like_value("test"), "test");
        assert_eq!(escape_like_value("test%value"), "test\\%value");
        assert_eq!(escape_like_value("test_value"), "test\\_value");
        assert_eq!(escape_like_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("triage_level").is_ok());
        assert!(validate_identifier("b.status").is_ok());
        assert!(validate_identifier("select").is_err());
        assert!(validate_identifier("1name").is_err());
        assert!(validate_identifier("name OR 1=1").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("").is_err());
    }
}
