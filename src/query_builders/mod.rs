// src/query_builders/mod.rs
//! Query builders for safely assembled SQL

pub mod filters;
pub mod utils;

pub use filters::{DateWindow, FieldWhitelist, Filter, FilterBuilder, Period};

use utils::escape_like_value;

// ==================== SAFE QUERY BUILDER ====================

/// SELECT builder: every value goes through a placeholder, every column name through the whitelist.
pub struct SafeQueryBuilder<'a> {
    base_query: String,
    conditions: Vec<String>,
    params: Vec<String>,
    whitelist: Option<&'a FieldWhitelist>,
    group_by: Option<String>,
    order_by: Option<(String, String)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<'a> SafeQueryBuilder<'a> {
    /// `base_query` must not carry its own WHERE clause.
    pub fn new(base_query: impl Into<String>) -> Self {
        Self {
            base_query: base_query.into(),
            conditions: Vec::new(),
            params: Vec::new(),
            whitelist: None,
            group_by: None,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn with_whitelist(mut self, whitelist: &'a FieldWhitelist) -> Self {
        self.whitelist = Some(whitelist);
        self
    }

    pub fn add_condition(&mut self, condition: &str, params: Vec<String>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.params.extend(params);
        self
    }

    pub fn add_exact_match(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        if self.is_field_allowed(field) {
            self.conditions.push(format!("{} = ?", field));
            self.params.push(value.into());
        }
        self
    }

    /// Case-insensitive substring match OR-ed over `fields`.
    pub fn add_search(&mut self, fields: &[&str], term: &str) -> &mut Self {
        let allowed: Vec<&str> = fields
            .iter()
            .copied()
            .filter(|f| self.is_field_allowed(f))
            .collect();
        if allowed.is_empty() {
            return self;
        }

        let pattern = format!("%{}%", escape_like_value(&term.to_lowercase()));
        let clauses: Vec<String> = allowed
            .iter()
            .map(|f| format!("LOWER({}) LIKE ? ESCAPE '\\'", f))
            .collect();
        self.conditions.push(format!("({})", clauses.join(" OR ")));
        self.params.extend(allowed.iter().map(|_| pattern.clone()));
        self
    }

    pub fn add_is_null(&mut self, field: &str) -> &mut Self {
        if self.is_field_allowed(field) {
            self.conditions.push(format!("{} IS NULL", field));
        }
        self
    }

    /// Inclusive bounds on the calendar date of `field`; either side may be open.
    pub fn add_date_range(&mut self, field: &str, from: Option<&str>, to: Option<&str>) -> &mut Self {
        if !self.is_field_allowed(field) {
            return self;
        }
        if let Some(from) = from {
            self.conditions.push(format!("date({}) >= ?", field));
            self.params.push(from.to_string());
        }
        if let Some(to) = to {
            self.conditions.push(format!("date({}) <= ?", field));
            self.params.push(to.to_string());
        }
        self
    }

    pub fn group_by(&mut self, expr: &str) -> &mut Self {
        self.group_by = Some(expr.to_string());
        self
    }

    pub fn order_by(&mut self, field: &str, direction: &str) -> &mut Self {
        if self.is_field_allowed(field) {
            let dir = if direction.eq_ignore_ascii_case("ASC") { "ASC" } else { "DESC" };
            self.order_by = Some((field.to_string(), dir.to_string()));
        }
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn build(&self) -> (String, Vec<String>) {
        let mut sql = self.base_query.clone();

        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }

        if let Some(group) = &self.group_by {
            sql.push_str(&format!(" GROUP BY {}", group));
        }

        if let Some((field, dir)) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {} {}", field, dir));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite requires a LIMIT before OFFSET
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        (sql, self.params.clone())
    }

    fn is_field_allowed(&self, field: &str) -> bool {
        match &self.whitelist {
            Some(wl) => wl.is_allowed(field),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_query_builder_basic() {
        let mut builder = SafeQueryBuilder::new("SELECT * FROM patients");
        builder.add_exact_match("gender", "female").order_by("name", "asc").limit(10);

        let (sql, params) = builder.build();
        assert_eq!(sql, "SELECT * FROM patients WHERE gender = ? ORDER BY name ASC LIMIT 10");
        assert_eq!(params, vec!["female".to_string()]);
    }

    #[test]
    fn test_whitelist_blocks_unknown_fields() {
        let whitelist = FieldWhitelist::from_lists(&[&["name", "status"]]);
        let mut builder = SafeQueryBuilder::new("SELECT * FROM doctors").with_whitelist(&whitelist);
        builder
            .add_exact_match("status", "available")
            .add_exact_match("1=1; DROP TABLE doctors; --", "x")
            .order_by("password_hash", "asc");

        let (sql, params) = builder.build();
        assert_eq!(sql, "SELECT * FROM doctors WHERE status = ?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let mut builder = SafeQueryBuilder::new("SELECT * FROM patients");
        builder.add_search(&["name", "phone"], "50%_Off");

        let (sql, params) = builder.build();
        assert!(sql.contains("(LOWER(name) LIKE ? ESCAPE '\\' OR LOWER(phone) LIKE ? ESCAPE '\\')"));
        assert_eq!(params, vec!["%50\\%\\_off%".to_string(), "%50\\%\\_off%".to_string()]);
    }

    #[test]
    fn test_offset_without_limit() {
        let mut builder = SafeQueryBuilder::new("SELECT * FROM wards");
        builder.offset(20);
        assert_eq!(builder.build().0, "SELECT * FROM wards LIMIT -1 OFFSET 20");
    }

    #[test]
    fn test_date_range_and_group() {
        let mut builder = SafeQueryBuilder::new("SELECT status, COUNT(*) FROM lab_orders");
        builder
            .add_date_range("ordered_at", Some("2024-01-01"), Some("2024-01-31"))
            .group_by("status");
        let (sql, params) = builder.build();
        assert_eq!(
            sql,
            "SELECT status, COUNT(*) FROM lab_orders WHERE date(ordered_at) >= ? AND date(ordered_at) <= ? GROUP BY status"
        );
        assert_eq!(params, vec!["2024-01-01", "2024-01-31"]);
    }
}
