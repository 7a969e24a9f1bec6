// src/aggregate/summary.rs
//! Per-row derived fields, row ordering, and the summary rollup.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::merge::MetricRow;
use super::numeric::{percent, ratio, Cast};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivedKind {
    Percent { part: &'static str, whole: &'static str },
    Difference { left: &'static str, right: &'static str },
    Ratio { numerator: &'static str, denominator: &'static str },
    /// Percentage of this row's value in the column total across all rows.
    ShareOfColumn { of: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    pub field: &'static str,
    pub kind: DerivedKind,
    pub cast: Cast,
}

impl Derived {
    pub fn percent(field: &'static str, part: &'static str, whole: &'static str) -> Self {
        Self { field, kind: DerivedKind::Percent { part, whole }, cast: Cast::Decimal1 }
    }

    pub fn difference(field: &'static str, left: &'static str, right: &'static str) -> Self {
        Self { field, kind: DerivedKind::Difference { left, right }, cast: Cast::Money }
    }

    pub fn ratio(field: &'static str, numerator: &'static str, denominator: &'static str) -> Self {
        Self { field, kind: DerivedKind::Ratio { numerator, denominator }, cast: Cast::Decimal1 }
    }

    pub fn share(field: &'static str, of: &'static str) -> Self {
        Self { field, kind: DerivedKind::ShareOfColumn { of }, cast: Cast::Decimal1 }
    }
}

pub fn apply_derived(rows: &mut [MetricRow], derived: &[Derived]) {
    for d in derived {
        let column_total = match d.kind {
            DerivedKind::ShareOfColumn { of } => rows.iter().map(|r| r.get(of)).sum(),
            _ => 0.0,
        };
        for row in rows.iter_mut() {
            let value = match d.kind {
                DerivedKind::Percent { part, whole } => percent(row.get(part), row.get(whole)),
                DerivedKind::Difference { left, right } => row.get(left) - row.get(right),
                DerivedKind::Ratio { numerator, denominator } => {
                    ratio(row.get(numerator), row.get(denominator))
                }
                DerivedKind::ShareOfColumn { of } => percent(row.get(of), column_total),
            };
            row.set(d.field, value, d.cast);
        }
    }
}

// ==================== ORDER ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    KeyAsc,
    /// Metric descending, ties by key ascending, truncated to `limit`.
    Ranked { by: &'static str, limit: usize },
}

impl RowOrder {
    pub fn limit(&self) -> Option<usize> {
        match *self {
            RowOrder::KeyAsc => None,
            RowOrder::Ranked { limit, .. } => Some(limit),
        }
    }
}

/// Sorts only. Truncation to the ranked limit happens after the summary is taken.
pub fn order_rows(rows: &mut [MetricRow], order: RowOrder) {
    match order {
        RowOrder::KeyAsc => rows.sort_by(|a, b| a.key.cmp(&b.key)),
        RowOrder::Ranked { by, .. } => {
            rows.sort_by(|a, b| {
                b.get(by)
                    .partial_cmp(&a.get(by))
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.key.cmp(&b.key))
            });
        }
    }
}

// ==================== SUMMARY ====================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SummaryKind {
    Sum(&'static str),
    Avg(&'static str),
    Min(&'static str),
    Max(&'static str),
    Count,
    /// Percent of the column sums.
    Rate { part: &'static str, whole: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryField {
    pub name: &'static str,
    pub kind: SummaryKind,
    pub cast: Cast,
}

impl SummaryField {
    pub fn sum(name: &'static str, column: &'static str, cast: Cast) -> Self {
        Self { name, kind: SummaryKind::Sum(column), cast }
    }

    pub fn avg(name: &'static str, column: &'static str) -> Self {
        Self { name, kind: SummaryKind::Avg(column), cast: Cast::Decimal1 }
    }

    pub fn min(name: &'static str, column: &'static str, cast: Cast) -> Self {
        Self { name, kind: SummaryKind::Min(column), cast }
    }

    pub fn max(name: &'static str, column: &'static str, cast: Cast) -> Self {
        Self { name, kind: SummaryKind::Max(column), cast }
    }

    pub fn count(name: &'static str) -> Self {
        Self { name, kind: SummaryKind::Count, cast: Cast::Int }
    }

    pub fn rate(name: &'static str, part: &'static str, whole: &'static str) -> Self {
        Self { name, kind: SummaryKind::Rate { part, whole }, cast: Cast::Decimal1 }
    }
}

/// Rollup over reshaped rows. An empty row set yields 0 for every field.
pub fn summarize(rows: &[MetricRow], fields: &[SummaryField]) -> Map<String, Value> {
    let column_sum = |c: &str| rows.iter().map(|r| r.get(c)).sum::<f64>();

    fields
        .iter()
        .map(|f| {
            let value = if rows.is_empty() {
                0.0
            } else {
                match f.kind {
                    SummaryKind::Sum(c) => column_sum(c),
                    SummaryKind::Avg(c) => column_sum(c) / rows.len() as f64,
                    SummaryKind::Min(c) => rows.iter().map(|r| r.get(c)).fold(f64::INFINITY, f64::min),
                    SummaryKind::Max(c) => {
                        rows.iter().map(|r| r.get(c)).fold(f64::NEG_INFINITY, f64::max)
                    }
                    SummaryKind::Count => rows.len() as f64,
                    SummaryKind::Rate { part, whole } => percent(column_sum(part), column_sum(whole)),
                }
            };
            (f.name.to_string(), f.cast.apply(value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, fields: &[(&'static str, f64)]) -> MetricRow {
        MetricRow {
            key: key.to_string(),
            label: None,
            values: fields.iter().map(|(n, v)| (*n, *v, Cast::Int)).collect(),
        }
    }

    #[test]
    fn derived_percent_difference_and_share() {
        let mut rows = vec![
            row("a", &[("visits", 3.0), ("critical", 1.0), ("revenue", 10.0), ("expenses", 4.0)]),
            row("b", &[("visits", 1.0), ("critical", 0.0), ("revenue", 0.0), ("expenses", 0.0)]),
        ];
        apply_derived(
            &mut rows,
            &[
                Derived::percent("critical_rate", "critical", "visits"),
                Derived::difference("net", "revenue", "expenses"),
                Derived::share("share", "visits"),
            ],
        );
        assert_eq!(rows[0].get("critical_rate"), 33.3);
        assert_eq!(rows[0].get("net"), 6.0);
        assert_eq!(rows[0].get("share"), 75.0);
        assert_eq!(rows[1].get("share"), 25.0);
    }

    #[test]
    fn ranked_breaks_ties_by_key() {
        let mut rows = vec![
            row("doc-c", &[("patients", 4.0)]),
            row("doc-b", &[("patients", 7.0)]),
            row("doc-a", &[("patients", 4.0)]),
            row("doc-d", &[("patients", 1.0)]),
        ];
        order_rows(&mut rows, RowOrder::Ranked { by: "patients", limit: 3 });
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["doc-b", "doc-a", "doc-c", "doc-d"]);
    }

    #[test]
    fn empty_rows_summarize_to_zero() {
        let summary = summarize(
            &[],
            &[
                SummaryField::sum("total_visits", "visits", Cast::Int),
                SummaryField::avg("avg_wait", "wait"),
                SummaryField::min("min_wait", "wait", Cast::Decimal1),
                SummaryField::rate("admission_rate", "admitted", "visits"),
                SummaryField::count("days"),
            ],
        );
        assert_eq!(summary["total_visits"], 0);
        assert_eq!(summary["avg_wait"], 0.0);
        assert_eq!(summary["min_wait"], 0.0);
        assert_eq!(summary["admission_rate"], 0.0);
        assert_eq!(summary["days"], 0);
    }

    #[test]
    fn summary_over_rows() {
        let rows = vec![
            row("d1", &[("visits", 4.0), ("admitted", 1.0)]),
            row("d2", &[("visits", 6.0), ("admitted", 2.0)]),
        ];
        let summary = summarize(
            &rows,
            &[
                SummaryField::sum("total", "visits", Cast::Int),
                SummaryField::avg("avg", "visits"),
                SummaryField::max("peak", "visits", Cast::Int),
                SummaryField::rate("rate", "admitted", "visits"),
            ],
        );
        assert_eq!(summary["total"], 10);
        assert_eq!(summary["avg"], 5.0);
        assert_eq!(summary["peak"], 6);
        assert_eq!(summary["rate"], 30.0);
    }
}
