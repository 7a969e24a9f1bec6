// src/query_builders/filters/mod.rs
//! Filter normalization: recognized query keys copied into a sparse filter,
//! dates validated, pagination clamped, default report windows applied.

pub mod whitelist;

pub use whitelist::FieldWhitelist;

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::clock::format_date;
use crate::error::{ApiError, ApiResult};
use crate::input::{InputMap, InputMapExt};
use crate::validator::FieldValidator;

/// Keys every list and report endpoint understands.
pub const COMMON_KEYS: &[&str] = &["search", "date_from", "date_to", "limit", "offset"];

// ==================== DATE WINDOW ====================

/// Default reporting window, resolved against the injected clock's current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    LastDays(i64),
    NextDays(i64),
    MonthToDate,
    YearToDate,
}

impl DateWindow {
    pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match *self {
            DateWindow::LastDays(n) => (today - Duration::days(n), today),
            DateWindow::NextDays(n) => (today, today + Duration::days(n)),
            DateWindow::MonthToDate => (today.with_day(1).unwrap_or(today), today),
            DateWindow::YearToDate => (today.with_ordinal(1).unwrap_or(today), today),
        }
    }

    fn span(&self, today: NaiveDate) -> Duration {
        let (from, to) = self.resolve(today);
        to - from
    }
}

// ==================== FILTER ====================

/// Sparse, normalized filter. Only recognized, non-empty keys are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    values: BTreeMap<String, String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Period {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl Filter {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn search(&self) -> Option<&str> {
        self.get("search")
    }

    pub fn date_from_str(&self) -> Option<String> {
        self.date_from.map(format_date)
    }

    pub fn date_to_str(&self) -> Option<String> {
        self.date_to.map(format_date)
    }

    pub fn period(&self) -> Period {
        Period {
            date_from: self.date_from_str(),
            date_to: self.date_to_str(),
        }
    }
}

// ==================== FILTER BUILDER ====================

pub struct FilterBuilder {
    today: NaiveDate,
    max_limit: i64,
    window: Option<DateWindow>,
}

impl FilterBuilder {
    pub fn new(today: NaiveDate, max_limit: i64) -> Self {
        Self {
            today,
            max_limit,
            window: None,
        }
    }

    pub fn with_default_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Copies `COMMON_KEYS` plus `recognized` from `query`; everything else is ignored.
    pub fn build(&self, query: &InputMap, recognized: &[&str]) -> ApiResult<Filter> {
        let mut filter = Filter::default();

        for key in COMMON_KEYS.iter().chain(recognized.iter()) {
            if let Some(value) = query.text(key) {
                filter.values.insert(key.to_string(), value);
            }
        }

        filter.date_from = parse_date_key(&filter, "date_from")?;
        filter.date_to = parse_date_key(&filter, "date_to")?;
        self.apply_window(&mut filter);

        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(ApiError::BadRequest(
                    "date_from must not be after date_to".to_string(),
                ));
            }
        }

        filter.limit = parse_count_key(&filter, "limit")?.map(|l| l.min(self.max_limit));
        filter.offset = parse_count_key(&filter, "offset")?;

        Ok(filter)
    }

    /// Single bounds are only completed for endpoints with a default window;
    /// plain lists keep exactly the bound the caller sent.
    fn apply_window(&self, filter: &mut Filter) {
        let window = match self.window {
            Some(window) => window,
            None => return,
        };
        let span = window.span(self.today);

        match (filter.date_from, filter.date_to) {
            (Some(from), None) => {
                filter.date_to = Some(match window {
                    DateWindow::NextDays(_) => from + span,
                    _ => self.today.max(from),
                });
            }
            (None, Some(to)) => {
                filter.date_from = Some(match window {
                    DateWindow::NextDays(_) if to >= self.today => self.today,
                    _ => to - span,
                });
            }
            (None, None) => {
                let (from, to) = window.resolve(self.today);
                filter.date_from = Some(from);
                filter.date_to = Some(to);
            }
            (Some(_), Some(_)) => {}
        }
    }
}

fn parse_date_key(filter: &Filter, key: &str) -> ApiResult<Option<NaiveDate>> {
    match filter.get(key) {
        None => Ok(None),
        Some(raw) => FieldValidator::date(raw)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid {}: expected YYYY-MM-DD", key))),
    }
}

fn parse_count_key(filter: &Filter, key: &str) -> ApiResult<Option<i64>> {
    match filter.get(key) {
        None => Ok(None),
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(Some(n)),
            _ => Err(ApiError::BadRequest(format!(
                "Invalid {}: expected a non-negative integer",
                key
            ))),
        },
    }
}
