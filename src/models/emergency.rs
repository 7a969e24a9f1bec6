// src/models/emergency.rs
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, VariantNames};

use super::{transition_allowed, Lifecycle};
use crate::auth::permissions;
use crate::error::{ApiError, ApiResult};
use crate::input::InputMap;
use crate::repositories::{col, Column, ColumnKind, Resource};

/// Triage levels 1 (resuscitation) to 5 (non-urgent); 1 and 2 are critical.
pub const CRITICAL_TRIAGE_MAX: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum VisitStatus {
    Waiting,
    InTreatment,
    Admitted,
    Discharged,
    Transferred,
    LeftWithoutBeingSeen,
}

impl VisitStatus {
    /// Statuses counted as "active" on the dashboard.
    pub const ACTIVE: &'static [&'static str] = &["waiting", "in-treatment"];
}

impl Lifecycle for VisitStatus {
    fn next(&self) -> &'static [Self] {
        use VisitStatus::*;
        match self {
            Waiting => &[InTreatment, LeftWithoutBeingSeen, Transferred],
            InTreatment => &[Admitted, Discharged, Transferred],
            Admitted | Discharged | Transferred | LeftWithoutBeingSeen => &[],
        }
    }
}

#[derive(Debug, Default)]
pub struct EmergencyVisits;

const VISIT_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text),
    col("triage_level", ColumnKind::IntRange(1, 5)),
    col("chief_complaint", ColumnKind::Text),
    col("arrival_time", ColumnKind::DateTime),
    col("seen_at", ColumnKind::DateTime),
    col("departed_at", ColumnKind::DateTime),
    col("doctor_id", ColumnKind::Text),
    col("vital_signs", ColumnKind::Text),
    col("status", ColumnKind::Enum(VisitStatus::VARIANTS)),
    col("disposition", ColumnKind::Text),
    col("notes", ColumnKind::Text),
];

impl Resource for EmergencyVisits {
    fn table_name(&self) -> &'static str {
        "emergency_visits"
    }

    fn label(&self) -> &'static str {
        "Emergency visit"
    }

    fn columns(&self) -> &'static [Column] {
        VISIT_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("patient_id", "A patient is required for an emergency visit"),
            ("triage_level", "A triage level (1-5) is required"),
            ("chief_complaint", "A chief complaint is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["chief_complaint", "disposition", "notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["patient_id", "doctor_id", "status", "triage_level"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("arrival_time")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("arrival_time", "DESC")
    }

    fn stamp_on_create(&self) -> &'static [&'static str] {
        &["arrival_time"]
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn status_stamps(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("in-treatment", "seen_at"),
            ("admitted", "departed_at"),
            ("discharged", "departed_at"),
            ("transferred", "departed_at"),
            ("left-without-being-seen", "departed_at"),
        ]
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<VisitStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::EMERGENCY_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::EMERGENCY_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        let arrival = record.get("arrival_time").and_then(|v| v.as_str());
        let seen = record.get("seen_at").and_then(|v| v.as_str());
        if let (Some(arrival), Some(seen)) = (arrival, seen) {
            // Both are normalized to the same text format, so lexical order is time order.
            if seen < arrival {
                return Err(ApiError::BadRequest(
                    "Seen time cannot be before arrival time".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::WriteContext;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ctx() -> WriteContext {
        WriteContext {
            actor: Some("nurse".to_string()),
            now: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(22, 5, 0).unwrap(),
            strict_transitions: false,
        }
    }

    #[test]
    fn missing_triage_level_is_named() {
        let payload = json!({ "patient_id": "p1", "chief_complaint": "Chest pain" });
        let err = EmergencyVisits
            .prepare_create(payload.as_object().unwrap(), &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("triage level"));
    }

    #[test]
    fn arrival_defaults_to_now_and_treatment_stamps_seen_at() {
        let payload = json!({
            "patient_id": "p1",
            "triage_level": "2",
            "chief_complaint": "Fracture",
            "status": "in_treatment"
        });
        let record = EmergencyVisits
            .prepare_create(payload.as_object().unwrap(), &ctx())
            .unwrap();
        assert_eq!(record["triage_level"], 2);
        assert_eq!(record["status"], "in-treatment");
        assert_eq!(record["arrival_time"], "2024-03-15 22:05:00");
        assert_eq!(record["seen_at"], "2024-03-15 22:05:00");
    }

    #[test]
    fn seen_before_arrival_is_rejected() {
        let payload = json!({
            "patient_id": "p1",
            "triage_level": 3,
            "chief_complaint": "Fever",
            "arrival_time": "2024-03-15 10:00:00",
            "seen_at": "2024-03-15 09:00:00"
        });
        assert!(EmergencyVisits
            .prepare_create(payload.as_object().unwrap(), &ctx())
            .is_err());
    }
}
