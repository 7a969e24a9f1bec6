// src/models/patient.rs
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, VariantNames};

use super::{transition_allowed, Lifecycle, GENDERS};
use crate::auth::permissions;
use crate::repositories::{col, Column, ColumnKind, Resource, Usage};

// ==================== PATIENT ====================

#[derive(Debug, Default)]
pub struct Patients;

const PATIENT_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("gender", ColumnKind::Enum(GENDERS)),
    col("date_of_birth", ColumnKind::Date),
    col("phone", ColumnKind::Phone),
    col("email", ColumnKind::Email),
    col("address", ColumnKind::Text),
    col("blood_group", ColumnKind::Text),
    col("emergency_contact", ColumnKind::Text),
    col("insurance_id", ColumnKind::Text),
    col("insurance_number", ColumnKind::Text),
    col("notes", ColumnKind::Text),
];

impl Resource for Patients {
    fn table_name(&self) -> &'static str {
        "patients"
    }

    fn label(&self) -> &'static str {
        "Patient"
    }

    fn columns(&self) -> &'static [Column] {
        PATIENT_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("name", "Patient name is required"), ("gender", "Gender is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "phone", "email"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["gender", "insurance_id"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("created_at")
    }

    fn usages(&self) -> &'static [Usage] {
        &[
            Usage {
                table: "appointments",
                column: "patient_id",
                message: "Patient has appointments and cannot be deleted",
            },
            Usage {
                table: "ipd_admissions",
                column: "patient_id",
                message: "Patient has admission history and cannot be deleted",
            },
            Usage {
                table: "bills",
                column: "patient_id",
                message: "Patient has bills and cannot be deleted",
            },
        ]
    }

    fn view_permission(&self) -> &'static str {
        permissions::PATIENTS_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::PATIENTS_MANAGE
    }
}

// ==================== DOCTOR ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DoctorStatus {
    Available,
    Unavailable,
    OnLeave,
}

#[derive(Debug, Default)]
pub struct Doctors;

const DOCTOR_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("department", ColumnKind::Text),
    col("specialization", ColumnKind::Text),
    col("phone", ColumnKind::Phone),
    col("email", ColumnKind::Email),
    col("license_number", ColumnKind::Text),
    col("consultation_fee", ColumnKind::NonNegative),
    col("status", ColumnKind::Enum(DoctorStatus::VARIANTS)),
];

impl Resource for Doctors {
    fn table_name(&self) -> &'static str {
        "doctors"
    }

    fn label(&self) -> &'static str {
        "Doctor"
    }

    fn columns(&self) -> &'static [Column] {
        DOCTOR_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("name", "Doctor name is required"), ("department", "Department is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "department", "specialization"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["department", "status"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "appointments",
            column: "doctor_id",
            message: "Doctor has appointments; set the status to unavailable instead",
        }]
    }

    fn view_permission(&self) -> &'static str {
        permissions::DOCTORS_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::DOCTORS_MANAGE
    }
}

// ==================== APPOINTMENT ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl Lifecycle for AppointmentStatus {
    fn next(&self) -> &'static [Self] {
        use AppointmentStatus::*;
        match self {
            Scheduled => &[Confirmed, Completed, Cancelled, NoShow],
            Confirmed => &[Completed, Cancelled, NoShow],
            Completed | Cancelled | NoShow => &[],
        }
    }
}

#[derive(Debug, Default)]
pub struct Appointments;

const APPOINTMENT_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text),
    col("doctor_id", ColumnKind::Text),
    col("appointment_date", ColumnKind::Date),
    col("appointment_time", ColumnKind::Text),
    col("reason", ColumnKind::Text),
    col("status", ColumnKind::Enum(AppointmentStatus::VARIANTS)),
    col("fee", ColumnKind::NonNegative),
    col("notes", ColumnKind::Text),
    col("completed_at", ColumnKind::DateTime),
];

impl Resource for Appointments {
    fn table_name(&self) -> &'static str {
        "appointments"
    }

    fn label(&self) -> &'static str {
        "Appointment"
    }

    fn columns(&self) -> &'static [Column] {
        APPOINTMENT_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("patient_id", "Patient is required"),
            ("doctor_id", "Doctor is required"),
            ("appointment_date", "Appointment date is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["reason", "notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["patient_id", "doctor_id", "status"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("appointment_date")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("appointment_date", "DESC")
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn status_stamps(&self) -> &'static [(&'static str, &'static str)] {
        &[("completed", "completed_at")]
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<AppointmentStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::APPOINTMENTS_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::APPOINTMENTS_MANAGE
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
            actor: Some("u1".to_string()),
            now: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(9, 30, 0).unwrap(),
            strict_transitions: false,
        }
    }

    #[test]
    fn status_names_are_kebab_case() {
        assert_eq!(DoctorStatus::VARIANTS, &["available", "unavailable", "on-leave"]);
        assert_eq!(AppointmentStatus::NoShow.to_string(), "no-show");
    }

    #[test]
    fn patient_requires_name_before_gender() {
        let payload = json!({ "phone": "+255 700 000 000" });
        let err = Patients.prepare_create(payload.as_object().unwrap(), &ctx()).unwrap_err();
        assert_eq!(err.to_string(), "Patient name is required");
    }

    #[test]
    fn appointment_completion_is_stamped() {
        let payload = json!({
            "patient_id": "p1",
            "doctor_id": "d1",
            "appointment_date": "2024-03-15",
            "status": "completed",
            "unknown": "ignored"
        });
        let record = Appointments.prepare_create(payload.as_object().unwrap(), &ctx()).unwrap();
        assert_eq!(record["completed_at"], "2024-03-15 09:30:00");
        assert!(!record.contains_key("unknown"));
    }
}
