// src/aggregate/merge.rs
//! Outer join of partial aggregate result sets on their grouping key.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::numeric::Cast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub cast: Cast,
    pub in_total: bool,
}

/// One grouped row as read from a single partial query; `values` align with the partial's fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRow {
    pub key: String,
    pub label: Option<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partial {
    pub fields: Vec<FieldSpec>,
    pub rows: Vec<PartialRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub key: String,
    pub label: Option<String>,
    pub values: Vec<(&'static str, f64, Cast)>,
}

impl MetricRow {
    pub fn zeroed(key: String, fields: &[(&'static str, Cast)]) -> Self {
        Self {
            key,
            label: None,
            values: fields.iter().map(|(name, cast)| (*name, 0.0, *cast)).collect(),
        }
    }

    /// Missing fields read as 0.
    pub fn get(&self, name: &str) -> f64 {
        self.values
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, v, _)| *v)
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, name: &'static str, value: f64, cast: Cast) {
        match self.values.iter_mut().find(|(n, _, _)| *n == name) {
            Some(slot) => {
                slot.1 = value;
                slot.2 = cast;
            }
            None => self.values.push((name, value, cast)),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(n, _, _)| *n)
    }

    pub fn to_json(&self, key_name: &str, label_name: Option<&str>) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key_name.to_string(), Value::String(self.key.clone()));
        if let Some(label_name) = label_name {
            map.insert(
                label_name.to_string(),
                self.label.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }
        for (name, value, cast) in &self.values {
            map.insert(name.to_string(), cast.apply(*value));
        }
        map
    }
}

/// Unions every partial by key. Each key gets every field zero-filled, then each partial's
/// values are overlaid; fields flagged `in_total` accumulate into `total`. Rows come out in
/// ascending key order.
pub fn merge_partials(partials: &[Partial], total: Option<(&'static str, Cast)>) -> Vec<MetricRow> {
    let mut all_fields: Vec<(&'static str, Cast)> = Vec::new();
    for field in partials.iter().flat_map(|p| p.fields.iter()) {
        if !all_fields.iter().any(|(n, _)| *n == field.name) {
            all_fields.push((field.name, field.cast));
        }
    }
    if let Some((name, cast)) = total {
        all_fields.push((name, cast));
    }

    let mut merged: BTreeMap<String, MetricRow> = BTreeMap::new();
    for partial in partials {
        for row in &partial.rows {
            let entry = merged
                .entry(row.key.clone())
                .or_insert_with(|| MetricRow::zeroed(row.key.clone(), &all_fields));
            if entry.label.is_none() {
                entry.label = row.label.clone();
            }

            let mut added = 0.0;
            for (field, value) in partial.fields.iter().zip(row.values.iter()) {
                entry.set(field.name, *value, field.cast);
                if field.in_total {
                    added += *value;
                }
            }
            if let Some((name, cast)) = total {
                let running = entry.get(name);
                entry.set(name, running + added, cast);
            }
        }
    }

    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str) -> FieldSpec {
        FieldSpec { name, cast: Cast::Int, in_total: true }
    }

    fn row(key: &str, values: &[f64]) -> PartialRow {
        PartialRow { key: key.to_string(), label: None, values: values.to_vec() }
    }

    #[test]
    fn outer_join_zero_fills_and_totals() {
        let outpatient = Partial {
            fields: vec![field("outpatient")],
            rows: vec![row("2024-01", &[5.0]), row("2024-02", &[3.0])],
        };
        let inpatient = Partial {
            fields: vec![field("inpatient")],
            rows: vec![row("2024-02", &[2.0]), row("2024-03", &[4.0])],
        };

        let rows = merge_partials(&[outpatient, inpatient], Some(("total", Cast::Int)));
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);

        assert_eq!(rows[0].get("outpatient"), 5.0);
        assert_eq!(rows[0].get("inpatient"), 0.0);
        assert_eq!(rows[0].get("total"), 5.0);
        assert_eq!(rows[1].get("total"), 5.0);
        assert_eq!(rows[2].get("outpatient"), 0.0);
        assert_eq!(rows[2].get("total"), 4.0);

        for r in &rows {
            let names: Vec<&str> = r.field_names().collect();
            assert_eq!(names, vec!["outpatient", "inpatient", "total"]);
        }
    }

    #[test]
    fn fields_outside_total_do_not_accumulate() {
        let partial = Partial {
            fields: vec![
                field("admissions"),
                FieldSpec { name: "avg_los", cast: Cast::Decimal1, in_total: false },
            ],
            rows: vec![row("2024-01-01", &[3.0, 4.25])],
        };
        let rows = merge_partials(&[partial], Some(("total", Cast::Int)));
        assert_eq!(rows[0].get("total"), 3.0);

        let json = rows[0].to_json("date", None);
        assert_eq!(json["date"], "2024-01-01");
        assert_eq!(json["avg_los"], 4.3);
        assert_eq!(json["admissions"], 3);
    }

    #[test]
    fn empty_partials_merge_to_nothing() {
        assert!(merge_partials(&[], None).is_empty());
    }
}
