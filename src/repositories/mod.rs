// src/repositories/mod.rs
//! Generic persistence for table-backed resources

pub mod columns;

pub use columns::{col, number, Column, ColumnKind};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::clock::{DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::error::{ApiError, ApiResult};
use crate::input::{InputMap, InputMapExt};
use crate::query_builders::{FieldWhitelist, Filter, SafeQueryBuilder};
use columns::{push_value, row_to_map};

/// Columns the server owns; never accepted from a payload.
pub const SERVER_MANAGED: &[&str] = &["id", "created_by", "created_at", "updated_at", "deleted_at"];

/// A dependent table that blocks deletion while it still references the resource.
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub table: &'static str,
    pub column: &'static str,
    pub message: &'static str,
}

/// Who is writing and when.
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub actor: Option<String>,
    pub now: NaiveDateTime,
    pub strict_transitions: bool,
}

impl WriteContext {
    pub fn timestamp(&self) -> String {
        self.now.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn today(&self) -> String {
        self.now.date().format(DATE_FORMAT).to_string()
    }
}

/// Table-backed resource with generic list/get/create/update/delete.
#[async_trait]
pub trait Resource: Send + Sync + Default + 'static {
    fn table_name(&self) -> &'static str;

    /// Human label used in messages ("Patient not found").
    fn label(&self) -> &'static str;

    /// Writable columns.
    fn columns(&self) -> &'static [Column];

    /// Checked in order on create; the first missing field's message is returned.
    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn date_field(&self) -> Option<&'static str> {
        None
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("created_at", "DESC")
    }

    /// Writable on create only.
    fn update_stripped(&self) -> &'static [&'static str] {
        &[]
    }

    fn soft_delete(&self) -> bool {
        false
    }

    fn usages(&self) -> &'static [Usage] {
        &[]
    }

    fn has_created_by(&self) -> bool {
        true
    }

    /// Columns filled with the current time (or date) when a create omits them.
    fn stamp_on_create(&self) -> &'static [&'static str] {
        &[]
    }

    fn status_field(&self) -> Option<&'static str> {
        None
    }

    /// `(status, column)`: entering `status` stamps `column` unless it is already set.
    fn status_stamps(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn can_transition(&self, _from: &str, _to: &str) -> bool {
        true
    }

    fn view_permission(&self) -> &'static str;

    fn manage_permission(&self) -> &'static str;

    /// Recomputes columns owned by the resource itself. `changes` is what this write
    /// sets; `existing` is `None` on create.
    fn derive_fields(&self, _changes: &mut InputMap, _existing: Option<&InputMap>) -> ApiResult<()> {
        Ok(())
    }

    /// Cross-field rules over the full candidate record.
    fn validate(&self, _record: &InputMap) -> ApiResult<()> {
        Ok(())
    }

    /// Rules that need the database, e.g. referenced rows in a particular state.
    async fn before_write(
        &self,
        _pool: &SqlitePool,
        _record: &InputMap,
        _existing: Option<&InputMap>,
    ) -> ApiResult<()> {
        Ok(())
    }

    // ==================== PROVIDED ====================

    fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    fn whitelist(&self) -> FieldWhitelist {
        let names: Vec<&str> = self.columns().iter().map(|c| c.name).collect();
        FieldWhitelist::from_lists(&[names.as_slice(), SERVER_MANAGED])
    }

    fn bool_columns(&self) -> Vec<&'static str> {
        self.columns()
            .iter()
            .filter(|c| c.kind == ColumnKind::Bool)
            .map(|c| c.name)
            .collect()
    }

    async fn list(&self, pool: &SqlitePool, filter: &Filter) -> ApiResult<Vec<InputMap>> {
        let whitelist = self.whitelist();
        let mut builder = SafeQueryBuilder::new(format!("SELECT * FROM {}", self.table_name()))
            .with_whitelist(&whitelist);

        if self.soft_delete() {
            builder.add_is_null("deleted_at");
        }
        if let Some(term) = filter.search() {
            builder.add_search(self.search_fields(), term);
        }
        for field in self.filter_fields() {
            if let Some(raw) = filter.get(field) {
                let param = match self.column(field) {
                    Some(column) => column.filter_param(raw)?,
                    None => raw.to_string(),
                };
                builder.add_exact_match(field, param);
            }
        }
        if let Some(date_field) = self.date_field() {
            builder.add_date_range(
                date_field,
                filter.date_from_str().as_deref(),
                filter.date_to_str().as_deref(),
            );
        }
        let (sort_field, direction) = self.default_sort();
        builder.order_by(sort_field, direction);
        if let Some(limit) = filter.limit {
            builder.limit(limit);
        }
        if let Some(offset) = filter.offset {
            builder.offset(offset);
        }

        let (sql, params) = builder.build();
        let mut query = sqlx::query(&sql);
        for param in params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(pool).await?;

        let bools = self.bool_columns();
        rows.iter().map(|row| row_to_map(row, &bools)).collect()
    }

    async fn find(&self, pool: &SqlitePool, id: &str) -> ApiResult<Option<InputMap>> {
        let mut sql = format!("SELECT * FROM {} WHERE id = ?", self.table_name());
        if self.soft_delete() {
            sql.push_str(" AND deleted_at IS NULL");
        }
        let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
        match row {
            Some(row) => Ok(Some(row_to_map(&row, &self.bool_columns())?)),
            None => Ok(None),
        }
    }

    async fn get(&self, pool: &SqlitePool, id: &str) -> ApiResult<InputMap> {
        self.find(pool, id)
            .await?
            .ok_or_else(|| ApiError::not_found(self.label()))
    }

    /// Required fields, casts, stamps and `validate`, without touching the database.
    fn prepare_create(&self, payload: &InputMap, ctx: &WriteContext) -> ApiResult<InputMap> {
        for (field, message) in self.required_fields() {
            if payload.text(field).is_none() {
                return Err(ApiError::BadRequest(message.to_string()));
            }
        }

        let mut record = InputMap::new();
        for column in self.columns() {
            if SERVER_MANAGED.contains(&column.name) {
                continue;
            }
            if let Some(raw) = payload.get(column.name) {
                let value = column.cast(raw)?;
                if !value.is_null() {
                    record.insert(column.name.to_string(), value);
                }
            }
        }

        for name in self.stamp_on_create() {
            if !record.contains_key(*name) {
                let stamp = match self.column(name).map(|c| c.kind) {
                    Some(ColumnKind::Date) => ctx.today(),
                    _ => ctx.timestamp(),
                };
                record.insert(name.to_string(), Value::String(stamp));
            }
        }
        self.derive_fields(&mut record, None)?;
        self.apply_status_stamps(&mut record, None, ctx);

        self.validate(&record)?;
        Ok(record)
    }

    async fn create(&self, pool: &SqlitePool, payload: &InputMap, ctx: &WriteContext) -> ApiResult<InputMap> {
        let record = self.prepare_create(payload, ctx)?;
        self.before_write(pool, &record, None).await?;

        let (id, mut qb) = self.insert_query(&record, ctx);
        qb.build()
            .execute(pool)
            .await
            .map_err(|e| write_error(self.label(), e))?;

        log::info!("➕ {} created: {}", self.label(), id);
        self.get(pool, &id).await
    }

    /// INSERT for a prepared record with a fresh id and audit columns; the caller picks the executor.
    fn insert_query(&self, record: &InputMap, ctx: &WriteContext) -> (String, QueryBuilder<'static, Sqlite>) {
        let id = Uuid::new_v4().to_string();
        let now = ctx.timestamp();

        let mut names: Vec<&str> = vec!["id"];
        let mut values: Vec<Value> = vec![Value::String(id.clone())];
        for (name, value) in record {
            if let Some(column) = self.column(name) {
                names.push(column.name);
                values.push(value.clone());
            }
        }
        if self.has_created_by() {
            names.push("created_by");
            values.push(ctx.actor.clone().map(Value::String).unwrap_or(Value::Null));
        }
        names.push("created_at");
        values.push(Value::String(now.clone()));
        names.push("updated_at");
        values.push(Value::String(now));

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) VALUES (", self.table_name(), names.join(", ")));
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        qb.push(")");
        (id, qb)
    }

    async fn update(
        &self,
        pool: &SqlitePool,
        id: &str,
        payload: &InputMap,
        ctx: &WriteContext,
    ) -> ApiResult<InputMap> {
        let existing = self.get(pool, id).await?;

        let mut changes = InputMap::new();
        for (key, raw) in payload {
            if SERVER_MANAGED.contains(&key.as_str()) || self.update_stripped().contains(&key.as_str()) {
                continue;
            }
            let column = match self.column(key) {
                Some(column) => column,
                None => continue,
            };
            let value = column.cast(raw)?;
            if value.is_null() {
                if let Some((_, message)) = self.required_fields().iter().find(|(f, _)| *f == key.as_str()) {
                    return Err(ApiError::BadRequest(message.to_string()));
                }
            }
            changes.insert(key.clone(), value);
        }

        if changes.is_empty() {
            return Err(ApiError::BadRequest("No data to update".to_string()));
        }

        if let Some(status_field) = self.status_field() {
            let from = existing.get(status_field).and_then(Value::as_str);
            let to = changes.get(status_field).and_then(Value::as_str);
            if let (Some(from), Some(to)) = (from, to) {
                if ctx.strict_transitions && from != to && !self.can_transition(from, to) {
                    return Err(ApiError::BadRequest(format!(
                        "Cannot change {} status from '{}' to '{}'",
                        self.label().to_lowercase(),
                        from,
                        to
                    )));
                }
            }
        }
        self.derive_fields(&mut changes, Some(&existing))?;
        self.apply_status_stamps(&mut changes, Some(&existing), ctx);

        let mut merged = existing.clone();
        for (key, value) in &changes {
            merged.insert(key.clone(), value.clone());
        }
        self.validate(&merged)?;
        self.before_write(pool, &merged, Some(&existing)).await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {} SET ", self.table_name()));
        for (key, value) in &changes {
            if let Some(column) = self.column(key) {
                qb.push(column.name).push(" = ");
                push_value(&mut qb, value);
                qb.push(", ");
            }
        }
        qb.push("updated_at = ").push_bind(ctx.timestamp());
        qb.push(" WHERE id = ").push_bind(id.to_string());

        qb.build()
            .execute(pool)
            .await
            .map_err(|e| write_error(self.label(), e))?;

        log::info!("✏️ {} updated: {}", self.label(), id);
        self.get(pool, id).await
    }

    async fn delete(&self, pool: &SqlitePool, id: &str, ctx: &WriteContext) -> ApiResult<()> {
        self.get(pool, id).await?;

        for usage in self.usages() {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", usage.table, usage.column);
            let (count,): (i64,) = sqlx::query_as(&sql).bind(id).fetch_one(pool).await?;
            if count > 0 {
                log::warn!("🚫 {} {} still referenced by {} {}", self.label(), id, count, usage.table);
                return Err(ApiError::BadRequest(usage.message.to_string()));
            }
        }

        let result = if self.soft_delete() {
            let now = ctx.timestamp();
            sqlx::query(&format!(
                "UPDATE {} SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
                self.table_name()
            ))
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?
        } else {
            sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table_name()))
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| write_error(self.label(), e))?
        };

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(self.label()));
        }

        log::info!("🗑️ {} deleted: {}", self.label(), id);
        Ok(())
    }

    fn apply_status_stamps(&self, record: &mut InputMap, existing: Option<&InputMap>, ctx: &WriteContext) {
        let status_field = match self.status_field() {
            Some(field) => field,
            None => return,
        };
        let status = match record.get(status_field).and_then(Value::as_str) {
            Some(status) => status.to_string(),
            None => return,
        };
        for (trigger, column) in self.status_stamps() {
            let already_set = record.get(*column).map(|v| !v.is_null()).unwrap_or(false)
                || existing
                    .and_then(|e| e.get(*column))
                    .map(|v| !v.is_null())
                    .unwrap_or(false);
            if *trigger == status && !already_set {
                record.insert(column.to_string(), Value::String(ctx.timestamp()));
            }
        }
    }
}

/// Constraint violations on write become client errors naming the resource.
pub fn write_error(label: &str, err: sqlx::Error) -> ApiError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return ApiError::BadRequest(format!("{} already exists", label));
        }
        if db_err.is_foreign_key_violation() {
            return ApiError::BadRequest(format!(
                "Referenced record does not exist or {} is still in use",
                label.to_lowercase()
            ));
        }
    }
    ApiError::from(err)
}
