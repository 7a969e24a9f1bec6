// src/aggregate/numeric.rs
use serde_json::Value;

/// Output representation of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    Int,
    Decimal1,
    Money,
}

impl Cast {
    pub fn apply(&self, value: f64) -> Value {
        let value = if value.is_finite() { value } else { 0.0 };
        match self {
            Cast::Int => Value::from(value.round() as i64),
            Cast::Decimal1 => Value::from(round_to(value, 1)),
            Cast::Money => Value::from(round_to(value, 2)),
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// `round(part / whole * 100, 1)`, or 0 when `whole` is 0.
pub fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    round_to(part / whole * 100.0, 1)
}

pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
