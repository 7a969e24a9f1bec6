// src/query_builders/filters/whitelist.rs
//! Column whitelist guarding every identifier interpolated into SQL

use std::collections::HashSet;

use crate::query_builders::utils::validate_identifier;

#[derive(Debug, Clone)]
pub struct FieldWhitelist {
    allowed_fields: HashSet<String>,
}

impl FieldWhitelist {
    /// Whitelist built from several column lists, e.g. a resource's columns plus audit columns.
    pub fn from_lists(lists: &[&[&str]]) -> Self {
        Self {
            allowed_fields: lists
                .iter()
                .flat_map(|l| l.iter())
                .map(|s| s.to_string())
                .collect(),
        }
    }

    #[inline]
    pub fn is_allowed(&self, field: &str) -> bool {
        validate_identifier(field).is_ok() && self.allowed_fields.contains(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_and_shape() {
        let wl = FieldWhitelist::from_lists(&[&["name", "ward_id"], &["created_at"]]);
        assert!(wl.is_allowed("ward_id"));
        assert!(wl.is_allowed("created_at"));
        assert!(!wl.is_allowed("password_hash"));
        assert!(!wl.is_allowed("name; --"));
    }
}
