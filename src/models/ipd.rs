// src/models/ipd.rs
//! Inpatient department: wards, beds, admissions and admission requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use strum::{AsRefStr, Display, EnumString, VariantNames};

use super::{transition_allowed, Lifecycle};
use crate::auth::permissions;
use crate::error::{ApiError, ApiResult};
use crate::input::InputMap;
use crate::repositories::{col, Column, ColumnKind, Resource, Usage};

pub const WARD_TYPES: &[&str] = &[
    "general", "private", "semi-private", "icu", "maternity", "pediatric", "surgical", "emergency",
];

// ==================== STATUSES ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BedStatus {
    Available,
    Occupied,
    Maintenance,
    Reserved,
}

impl Lifecycle for BedStatus {
    fn next(&self) -> &'static [Self] {
        use BedStatus::*;
        match self {
            Available => &[Occupied, Maintenance, Reserved],
            Occupied => &[Available, Maintenance],
            Maintenance => &[Available],
            Reserved => &[Available, Occupied],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionStatus {
    Admitted,
    Discharged,
    Transferred,
    Deceased,
}

impl Lifecycle for AdmissionStatus {
    fn next(&self) -> &'static [Self] {
        use AdmissionStatus::*;
        match self {
            Admitted => &[Discharged, Transferred, Deceased],
            Discharged | Transferred | Deceased => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl Lifecycle for RequestStatus {
    fn next(&self) -> &'static [Self] {
        use RequestStatus::*;
        match self {
            Pending => &[Approved, Rejected, Cancelled],
            Approved | Rejected | Cancelled => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RequestPriority {
    Routine,
    Urgent,
    Emergency,
}

// ==================== WARD ====================

#[derive(Debug, Default)]
pub struct Wards;

const WARD_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("ward_type", ColumnKind::Enum(WARD_TYPES)),
    col("floor", ColumnKind::Text),
    col("daily_rate", ColumnKind::NonNegative),
    col("description", ColumnKind::Text),
    col("is_active", ColumnKind::Bool),
];

impl Resource for Wards {
    fn table_name(&self) -> &'static str {
        "wards"
    }

    fn label(&self) -> &'static str {
        "Ward"
    }

    fn columns(&self) -> &'static [Column] {
        WARD_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("name", "Ward name is required"), ("ward_type", "Ward type is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "description"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["ward_type", "is_active"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "beds",
            column: "ward_id",
            message: "Ward still has beds; remove them or deactivate the ward instead",
        }]
    }

    fn view_permission(&self) -> &'static str {
        permissions::IPD_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::IPD_MANAGE
    }
}

// ==================== BED ====================

#[derive(Debug, Default)]
pub struct Beds;

const BED_COLUMNS: &[Column] = &[
    col("ward_id", ColumnKind::Text),
    col("bed_number", ColumnKind::Text),
    col("bed_type", ColumnKind::Text),
    col("status", ColumnKind::Enum(BedStatus::VARIANTS)),
    col("notes", ColumnKind::Text),
];

#[async_trait]
impl Resource for Beds {
    fn table_name(&self) -> &'static str {
        "beds"
    }

    fn label(&self) -> &'static str {
        "Bed"
    }

    fn columns(&self) -> &'static [Column] {
        BED_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("ward_id", "Ward is required"), ("bed_number", "Bed number is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["bed_number", "bed_type"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["ward_id", "status"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("bed_number", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "ipd_admissions",
            column: "bed_id",
            message: "Bed has admission history; set it to maintenance instead",
        }]
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<BedStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::IPD_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::IPD_MANAGE
    }

    /// A bed held by a live admission keeps its ward and status until discharge.
    async fn before_write(
        &self,
        pool: &SqlitePool,
        record: &InputMap,
        existing: Option<&InputMap>,
    ) -> ApiResult<()> {
        let existing = match existing {
            Some(existing) => existing,
            None => return Ok(()),
        };
        let unchanged = |field: &str| record.get(field) == existing.get(field);
        if unchanged("status") && unchanged("ward_id") {
            return Ok(());
        }

        let (held,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ipd_admissions WHERE bed_id = ? AND status = ?")
                .bind(existing.get("id").and_then(Value::as_str))
                .bind(AdmissionStatus::Admitted.as_ref())
                .fetch_one(pool)
                .await?;
        if held > 0 {
            return Err(ApiError::BadRequest(
                "Bed is held by an admitted patient; discharge or transfer the patient first".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== ADMISSION ====================

#[derive(Debug, Default)]
pub struct Admissions;

const ADMISSION_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text),
    col("ward_id", ColumnKind::Text),
    col("bed_id", ColumnKind::Text),
    col("doctor_id", ColumnKind::Text),
    col("request_id", ColumnKind::Text),
    col("admission_date", ColumnKind::DateTime),
    col("discharge_date", ColumnKind::DateTime),
    col("diagnosis", ColumnKind::Text),
    col("status", ColumnKind::Enum(AdmissionStatus::VARIANTS)),
    col("notes", ColumnKind::Text),
    col("discharge_notes", ColumnKind::Text),
];

impl Resource for Admissions {
    fn table_name(&self) -> &'static str {
        "ipd_admissions"
    }

    fn label(&self) -> &'static str {
        "Admission"
    }

    fn columns(&self) -> &'static [Column] {
        ADMISSION_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("patient_id", "Patient is required"),
            ("ward_id", "Ward is required"),
            ("bed_id", "Bed is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["diagnosis", "notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["patient_id", "ward_id", "bed_id", "doctor_id", "status"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("admission_date")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("admission_date", "DESC")
    }

    /// Placement and discharge go through the dedicated admit/discharge operations.
    fn update_stripped(&self) -> &'static [&'static str] {
        &["patient_id", "ward_id", "bed_id", "request_id", "status", "discharge_date"]
    }

    fn stamp_on_create(&self) -> &'static [&'static str] {
        &["admission_date"]
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<AdmissionStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::IPD_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::IPD_MANAGE
    }
}

// ==================== ADMISSION REQUEST ====================

#[derive(Debug, Default)]
pub struct AdmissionRequests;

const REQUEST_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text),
    col("ward_id", ColumnKind::Text),
    col("doctor_id", ColumnKind::Text),
    col("reason", ColumnKind::Text),
    col("priority", ColumnKind::Enum(RequestPriority::VARIANTS)),
    col("requested_date", ColumnKind::Date),
    col("status", ColumnKind::Enum(RequestStatus::VARIANTS)),
    col("notes", ColumnKind::Text),
    col("review_notes", ColumnKind::Text),
    col("reviewed_by", ColumnKind::Text),
    col("reviewed_at", ColumnKind::DateTime),
];

#[async_trait]
impl Resource for AdmissionRequests {
    fn table_name(&self) -> &'static str {
        "admission_requests"
    }

    fn label(&self) -> &'static str {
        "Admission request"
    }

    fn columns(&self) -> &'static [Column] {
        REQUEST_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("patient_id", "Patient is required"),
            ("ward_id", "Ward is required"),
            ("reason", "Reason for admission is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["reason", "notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["patient_id", "ward_id", "status", "priority"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("created_at")
    }

    /// Review fields are written only by approve/reject.
    fn update_stripped(&self) -> &'static [&'static str] {
        &["status", "reviewed_by", "reviewed_at", "review_notes"]
    }

    fn stamp_on_create(&self) -> &'static [&'static str] {
        &["requested_date"]
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<RequestStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::IPD_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::IPD_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        let status = record.get("status").and_then(Value::as_str).unwrap_or("pending");
        if record.get("reviewed_by").map(|v| !v.is_null()).unwrap_or(false) && status == "pending" {
            return Err(ApiError::BadRequest(
                "A pending admission request cannot carry a reviewer".to_string(),
            ));
        }
        Ok(())
    }

    async fn before_write(
        &self,
        pool: &SqlitePool,
        record: &InputMap,
        _existing: Option<&InputMap>,
    ) -> ApiResult<()> {
        let ward_id = match record.get("ward_id").and_then(Value::as_str) {
            Some(id) => id,
            None => return Ok(()),
        };
        let active: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM wards WHERE id = ?")
            .bind(ward_id)
            .fetch_optional(pool)
            .await?;
        match active {
            None => Err(ApiError::not_found("Ward")),
            Some((false,)) => Err(ApiError::BadRequest("Ward is not active".to_string())),
            Some((true,)) => Ok(()),
        }
    }
}
