// src/models/laboratory.rs
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

// ==================== LAB TEST CATALOG ====================

#[derive(Debug, Default)]
pub struct LabTests;

const TEST_COLUMNS: &[Column] = &[
    col("code", ColumnKind::Text),
    col("name", ColumnKind::Text),
    col("category", ColumnKind::Text),
    col("specimen_type", ColumnKind::Text),
    col("price", ColumnKind::NonNegative),
    col("turnaround_hours", ColumnKind::IntRange(0, 720)),
    col("normal_range", ColumnKind::Text),
    col("unit", ColumnKind::Text),
    col("is_active", ColumnKind::Bool),
];

impl Resource for LabTests {
    fn table_name(&self) -> &'static str {
        "lab_tests"
    }

    fn label(&self) -> &'static str {
        "Lab test"
    }

    fn columns(&self) -> &'static [Column] {
        TEST_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("code", "Test code is required"), ("name", "Test name is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["code", "name", "category"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["category", "is_active"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "lab_orders",
            column: "test_id",
            message: "Lab test has been ordered; deactivate it instead",
        }]
    }

    fn view_permission(&self) -> &'static str {
        permissions::LABORATORY_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::LABORATORY_MANAGE
    }
}

// ==================== LAB ORDER ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum LabOrderStatus {
    Ordered,
    SampleCollected,
    SampleReceived,
    InProgress,
    Completed,
    Cancelled,
}

impl Lifecycle for LabOrderStatus {
    fn next(&self) -> &'static [Self] {
        use LabOrderStatus::*;
        match self {
            Ordered => &[SampleCollected, Cancelled],
            SampleCollected => &[SampleReceived, Cancelled],
            SampleReceived => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum LabPriority {
    Routine,
    Urgent,
    Stat,
}

#[derive(Debug, Default)]
pub struct LabOrders;

const ORDER_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text),
    col("test_id", ColumnKind::Text),
    col("doctor_id", ColumnKind::Text),
    col("priority", ColumnKind::Enum(LabPriority::VARIANTS)),
    col("status", ColumnKind::Enum(LabOrderStatus::VARIANTS)),
    col("ordered_at", ColumnKind::DateTime),
    col("sample_collected_at", ColumnKind::DateTime),
    col("completed_at", ColumnKind::DateTime),
    col("result", ColumnKind::Text),
    col("result_flag", ColumnKind::Enum(&["normal", "abnormal", "critical"])),
    col("clinical_notes", ColumnKind::Text),
];

#[async_trait]
impl Resource for LabOrders {
    fn table_name(&self) -> &'static str {
        "lab_orders"
    }

    fn label(&self) -> &'static str {
        "Lab order"
    }

    fn columns(&self) -> &'static [Column] {
        ORDER_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("patient_id", "Patient is required"), ("test_id", "Lab test is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["result", "clinical_notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["patient_id", "test_id", "doctor_id", "status", "priority"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("ordered_at")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("ordered_at", "DESC")
    }

    fn update_stripped(&self) -> &'static [&'static str] {
        &["patient_id", "test_id", "ordered_at"]
    }

    fn stamp_on_create(&self) -> &'static [&'static str] {
        &["ordered_at"]
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn status_stamps(&self) -> &'static [(&'static str, &'static str)] {
        &[("sample-collected", "sample_collected_at"), ("completed", "completed_at")]
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<LabOrderStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::LABORATORY_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::LABORATORY_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        let completed = record.get("status").and_then(Value::as_str) == Some("completed");
        let has_result = record.get("result").map(|v| !v.is_null()).unwrap_or(false);
        if completed && !has_result {
            return Err(ApiError::BadRequest(
                "A result is required to complete a lab order".to_string(),
            ));
        }
        Ok(())
    }

    /// New orders must reference an active catalog test.
    async fn before_write(
        &self,
        pool: &SqlitePool,
        record: &InputMap,
        existing: Option<&InputMap>,
    ) -> ApiResult<()> {
        if existing.is_some() {
            return Ok(());
        }
        let test_id = match record.get("test_id").and_then(Value::as_str) {
            Some(id) => id,
            None => return Ok(()),
        };
        let active: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM lab_tests WHERE id = ?")
            .bind(test_id)
            .fetch_optional(pool)
            .await?;
        match active {
            None => Err(ApiError::not_found("Lab test")),
            Some((false,)) => Err(ApiError::BadRequest(
                "Lab test is inactive and cannot be ordered".to_string(),
            )),
            Some((true,)) => Ok(()),
        }
    }
}
