// src/aggregate/mod.rs
//! Aggregate report pipeline:
//! filter -> partial grouped queries -> merge by key -> derived fields -> order -> summary.
//!
//! Every partial query is a single grouped aggregate. The key is read as nullable text and
//! every metric as nullable REAL, so the row decoding does not depend on column affinity.

pub mod merge;
pub mod numeric;
pub mod summary;

pub use merge::{merge_partials, FieldSpec, MetricRow, Partial, PartialRow};
pub use numeric::{percent, round_to, Cast};
pub use summary::{Derived, RowOrder, SummaryField};

use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::input::{InputMap, InputMapExt};
use crate::query_builders::{Filter, Period, SafeQueryBuilder};

// ==================== GROUPING ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Day,
    Week,
    Month,
    Year,
}

impl Bucket {
    pub const NAMES: &'static [&'static str] = &["day", "week", "month", "year"];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "day" | "daily" => Some(Bucket::Day),
            "week" | "weekly" => Some(Bucket::Week),
            "month" | "monthly" => Some(Bucket::Month),
            "year" | "yearly" => Some(Bucket::Year),
            _ => None,
        }
    }

    /// `group_by` from the filter, or `default` when absent; unknown values are a 400.
    pub fn from_filter(filter: &Filter, default: Bucket) -> ApiResult<Self> {
        match filter.get("group_by") {
            None => Ok(default),
            Some(raw) => Bucket::parse(raw).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Invalid group_by '{}': expected one of {}",
                    raw,
                    Bucket::NAMES.join(", ")
                ))
            }),
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Bucket::Day => "date",
            Bucket::Week => "week",
            Bucket::Month => "month",
            Bucket::Year => "year",
        }
    }

    pub fn sql(&self, column: &str) -> String {
        let pattern = match self {
            Bucket::Day => "%Y-%m-%d",
            Bucket::Week => "%Y-W%W",
            Bucket::Month => "%Y-%m",
            Bucket::Year => "%Y",
        };
        format!("strftime('{}', {})", pattern, column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Date { column: String, bucket: Bucket },
    Column { expr: String, label: Option<String> },
}

impl GroupKey {
    pub fn date(column: &str, bucket: Bucket) -> Self {
        GroupKey::Date { column: column.to_string(), bucket }
    }

    pub fn column(expr: &str) -> Self {
        GroupKey::Column { expr: expr.to_string(), label: None }
    }

    pub fn labelled(expr: &str, label: &str) -> Self {
        GroupKey::Column { expr: expr.to_string(), label: Some(label.to_string()) }
    }

    fn key_sql(&self) -> String {
        match self {
            GroupKey::Date { column, bucket } => bucket.sql(column),
            GroupKey::Column { expr, .. } => expr.clone(),
        }
    }

    fn label_sql(&self) -> Option<&str> {
        match self {
            GroupKey::Column { label: Some(label), .. } => Some(label),
            _ => None,
        }
    }
}

// ==================== METRICS ====================

#[derive(Debug, Clone, PartialEq)]
pub enum AggExpr {
    Count,
    CountDistinct(String),
    CountWhere(String),
    Sum(String),
    SumWhere { value: String, condition: String },
    Avg(String),
    Min(String),
    Max(String),
}

impl AggExpr {
    fn sql(&self) -> String {
        match self {
            AggExpr::Count => "COUNT(*)".to_string(),
            AggExpr::CountDistinct(e) => format!("COUNT(DISTINCT {})", e),
            AggExpr::CountWhere(c) => format!("COALESCE(SUM(CASE WHEN {} THEN 1 ELSE 0 END), 0)", c),
            AggExpr::Sum(e) => format!("COALESCE(SUM({}), 0)", e),
            AggExpr::SumWhere { value, condition } => {
                format!("COALESCE(SUM(CASE WHEN {} THEN {} ELSE 0 END), 0)", condition, value)
            }
            AggExpr::Avg(e) => format!("AVG({})", e),
            AggExpr::Min(e) => format!("MIN({})", e),
            AggExpr::Max(e) => format!("MAX({})", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub field: &'static str,
    pub expr: AggExpr,
    pub cast: Cast,
    pub in_total: bool,
}

impl Metric {
    pub fn new(field: &'static str, expr: AggExpr, cast: Cast) -> Self {
        Self { field, expr, cast, in_total: false }
    }

    pub fn count(field: &'static str) -> Self {
        Self::new(field, AggExpr::Count, Cast::Int)
    }

    pub fn count_where(field: &'static str, condition: &str) -> Self {
        Self::new(field, AggExpr::CountWhere(condition.to_string()), Cast::Int)
    }

    pub fn count_distinct(field: &'static str, expr: &str) -> Self {
        Self::new(field, AggExpr::CountDistinct(expr.to_string()), Cast::Int)
    }

    pub fn sum(field: &'static str, expr: &str, cast: Cast) -> Self {
        Self::new(field, AggExpr::Sum(expr.to_string()), cast)
    }

    pub fn sum_where(field: &'static str, value: &str, condition: &str, cast: Cast) -> Self {
        Self::new(
            field,
            AggExpr::SumWhere { value: value.to_string(), condition: condition.to_string() },
            cast,
        )
    }

    pub fn avg(field: &'static str, expr: &str) -> Self {
        Self::new(field, AggExpr::Avg(expr.to_string()), Cast::Decimal1)
    }

    pub fn in_total(mut self) -> Self {
        self.in_total = true;
        self
    }

    fn spec(&self) -> FieldSpec {
        FieldSpec { name: self.field, cast: self.cast, in_total: self.in_total }
    }
}

// ==================== PARTIAL QUERY ====================

/// One grouped aggregate over `from`, bounded by the filter's dates on `date_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    from: String,
    date_column: Option<String>,
    key: GroupKey,
    conditions: Vec<(String, Vec<String>)>,
    metrics: Vec<Metric>,
}

impl MetricQuery {
    pub fn new(from: &str, key: GroupKey) -> Self {
        Self {
            from: from.to_string(),
            date_column: None,
            key,
            conditions: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn dated(mut self, column: &str) -> Self {
        self.date_column = Some(column.to_string());
        self
    }

    pub fn condition(mut self, sql: &str, params: Vec<String>) -> Self {
        self.conditions.push((sql.to_string(), params));
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn build(&self, filter: &Filter) -> (String, Vec<String>) {
        let mut select = format!("SELECT CAST({} AS TEXT) AS group_key", self.key.key_sql());
        match self.key.label_sql() {
            Some(label) => select.push_str(&format!(", CAST({} AS TEXT) AS group_label", label)),
            None => select.push_str(", CAST(NULL AS TEXT) AS group_label"),
        }
        for (i, metric) in self.metrics.iter().enumerate() {
            select.push_str(&format!(", CAST({} AS REAL) AS m{}", metric.expr.sql(), i));
        }
        select.push_str(&format!(" FROM {}", self.from));

        let mut builder = SafeQueryBuilder::new(select);
        for (sql, params) in &self.conditions {
            builder.add_condition(sql, params.clone());
        }
        if let Some(column) = &self.date_column {
            builder.add_date_range(
                column,
                filter.date_from_str().as_deref(),
                filter.date_to_str().as_deref(),
            );
        }
        builder.group_by("1, 2");
        builder.build()
    }

    pub async fn fetch(&self, pool: &SqlitePool, filter: &Filter) -> ApiResult<Partial> {
        let (sql, params) = self.build(filter);
        let mut query = sqlx::query(&sql);
        for param in params {
            query = query.bind(param);
        }
        let records = query.fetch_all(pool).await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let key: Option<String> = record.try_get(0)?;
            let label: Option<String> = record.try_get(1)?;
            let mut values = Vec::with_capacity(self.metrics.len());
            for i in 0..self.metrics.len() {
                let value: Option<f64> = record.try_get(i + 2)?;
                values.push(value.unwrap_or(0.0));
            }
            rows.push(PartialRow {
                key: key.unwrap_or_else(|| "unassigned".to_string()),
                label,
                values,
            });
        }

        Ok(Partial {
            fields: self.metrics.iter().map(Metric::spec).collect(),
            rows,
        })
    }
}

// ==================== REPORT ====================

#[derive(Debug, Clone)]
pub struct ReportSpec {
    pub key_name: &'static str,
    pub label_name: Option<&'static str>,
    pub queries: Vec<MetricQuery>,
    pub total: Option<(&'static str, Cast)>,
    pub derived: Vec<Derived>,
    pub summary: Vec<SummaryField>,
    pub order: RowOrder,
}

impl ReportSpec {
    pub fn new(key_name: &'static str) -> Self {
        Self {
            key_name,
            label_name: None,
            queries: Vec::new(),
            total: None,
            derived: Vec::new(),
            summary: Vec::new(),
            order: RowOrder::KeyAsc,
        }
    }

    pub fn label(mut self, name: &'static str) -> Self {
        self.label_name = Some(name);
        self
    }

    pub fn query(mut self, query: MetricQuery) -> Self {
        self.queries.push(query);
        self
    }

    pub fn total(mut self, name: &'static str) -> Self {
        self.total = Some((name, Cast::Int));
        self
    }

    pub fn money_total(mut self, name: &'static str) -> Self {
        self.total = Some((name, Cast::Money));
        self
    }

    pub fn derive(mut self, derived: Derived) -> Self {
        self.derived.push(derived);
        self
    }

    pub fn summarize(mut self, field: SummaryField) -> Self {
        self.summary.push(field);
        self
    }

    pub fn ranked(mut self, by: &'static str, limit: usize) -> Self {
        self.order = RowOrder::Ranked { by, limit };
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub data: Vec<Map<String, Value>>,
    pub summary: Map<String, Value>,
    pub period: Period,
    #[serde(skip)]
    pub columns: Vec<String>,
}

/// Reshapes merged rows into the report payload.
pub fn assemble(spec: &ReportSpec, partials: &[Partial], filter: &Filter) -> ReportOutput {
    let mut rows = merge_partials(partials, spec.total);
    summary::apply_derived(&mut rows, &spec.derived);
    summary::order_rows(&mut rows, spec.order);
    let summary = summary::summarize(&rows, &spec.summary);
    if let Some(limit) = spec.order.limit() {
        rows.truncate(limit);
    }

    let mut columns = vec![spec.key_name.to_string()];
    if let Some(label) = spec.label_name {
        columns.push(label.to_string());
    }
    let mut names: Vec<&'static str> = Vec::new();
    for field in partials.iter().flat_map(|p| p.fields.iter()) {
        if !names.contains(&field.name) {
            names.push(field.name);
        }
    }
    if let Some((total, _)) = spec.total {
        names.push(total);
    }
    names.extend(spec.derived.iter().map(|d| d.field));
    columns.extend(names.iter().map(|n| n.to_string()));

    ReportOutput {
        data: rows.iter().map(|r| r.to_json(spec.key_name, spec.label_name)).collect(),
        summary,
        period: filter.period(),
        columns,
    }
}

/// Runs every partial query, then merges. Any query failure aborts the whole report.
pub async fn run_report(pool: &SqlitePool, filter: &Filter, spec: &ReportSpec) -> ApiResult<ReportOutput> {
    let mut partials = Vec::with_capacity(spec.queries.len());
    for query in &spec.queries {
        partials.push(query.fetch(pool, filter).await?);
    }
    Ok(assemble(spec, &partials, filter))
}

// ==================== RESPONSE ====================

/// Envelope by default, CSV when `format=csv`.
pub fn respond(query: &InputMap, output: ReportOutput, file_stem: &str) -> ApiResult<HttpResponse> {
    if query.text("format").map(|f| f.eq_ignore_ascii_case("csv")).unwrap_or(false) {
        let body = to_csv(&output)?;
        return Ok(HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}.csv\"", file_stem),
            ))
            .body(body));
    }
    Ok(ApiResponse::success(output).into_response())
}

pub fn to_csv(output: &ReportOutput) -> ApiResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&output.columns)
        .map_err(|e| ApiError::InternalServerError(format!("CSV write failed: {}", e)))?;

    for row in &output.data {
        let record: Vec<String> = output
            .columns
            .iter()
            .map(|c| match row.get(c) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| ApiError::InternalServerError(format!("CSV write failed: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ApiError::InternalServerError(format!("CSV flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ApiError::InternalServerError(format!("CSV encoding failed: {}", e)))
}
