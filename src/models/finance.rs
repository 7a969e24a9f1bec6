// src/models/finance.rs
//! Insurance organizations, bills and payments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString, VariantNames};

use super::{transition_allowed, Lifecycle};
use crate::auth::permissions;
use crate::error::{ApiError, ApiResult};
use crate::input::InputMap;
use crate::repositories::{col, number, Column, ColumnKind, Resource, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Insurance,
    MobileMoney,
    BankTransfer,
}

pub const PAYMENT_METHODS: &[&str] = <PaymentMethod as VariantNames>::VARIANTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BillStatus {
    Unpaid,
    Partial,
    Paid,
    Cancelled,
}

impl Lifecycle for BillStatus {
    fn next(&self) -> &'static [Self] {
        use BillStatus::*;
        match self {
            Unpaid => &[Partial, Paid, Cancelled],
            Partial => &[Paid],
            Paid | Cancelled => &[],
        }
    }
}

impl BillStatus {
    /// Status implied by the amount paid so far.
    pub fn for_balance(paid: f64, payable: f64) -> Self {
        if paid <= 0.0 {
            BillStatus::Unpaid
        } else if paid + 0.005 >= payable {
            BillStatus::Paid
        } else {
            BillStatus::Partial
        }
    }
}

// ==================== INSURANCE ORGANIZATION ====================

#[derive(Debug, Default)]
pub struct InsuranceOrganizations;

const ORGANIZATION_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("code", ColumnKind::Text),
    col("contact_person", ColumnKind::Text),
    col("phone", ColumnKind::Phone),
    col("email", ColumnKind::Email),
    col("address", ColumnKind::Text),
    col("coverage_percent", ColumnKind::Real),
    col("is_active", ColumnKind::Bool),
];

impl Resource for InsuranceOrganizations {
    fn table_name(&self) -> &'static str {
        "insurance_organizations"
    }

    fn label(&self) -> &'static str {
        "Insurance organization"
    }

    fn columns(&self) -> &'static [Column] {
        ORGANIZATION_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("name", "Organization name is required"), ("code", "Organization code is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "code", "contact_person"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["is_active"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[
            Usage {
                table: "patients",
                column: "insurance_id",
                message: "Organization has enrolled patients; deactivate it instead",
            },
            Usage {
                table: "bills",
                column: "insurance_id",
                message: "Organization has billed claims; deactivate it instead",
            },
        ]
    }

    fn view_permission(&self) -> &'static str {
        permissions::INSURANCE_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::INSURANCE_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        match number(record, "coverage_percent") {
            Some(p) if !(0.0..=100.0).contains(&p) => Err(ApiError::BadRequest(
                "Coverage percent must be between 0 and 100".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// ==================== BILL ====================

#[derive(Debug, Default)]
pub struct Bills;

const BILL_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text),
    col("admission_id", ColumnKind::Text),
    col("insurance_id", ColumnKind::Text),
    col("bill_number", ColumnKind::Text),
    col("total_amount", ColumnKind::NonNegative),
    col("insurance_amount", ColumnKind::NonNegative),
    col("status", ColumnKind::Enum(BillStatus::VARIANTS)),
    col("due_date", ColumnKind::Date),
    col("notes", ColumnKind::Text),
];

impl Resource for Bills {
    fn table_name(&self) -> &'static str {
        "bills"
    }

    fn label(&self) -> &'static str {
        "Bill"
    }

    fn columns(&self) -> &'static [Column] {
        BILL_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("patient_id", "Patient is required"), ("total_amount", "Total amount is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["bill_number", "notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["patient_id", "insurance_id", "status"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("created_at")
    }

    fn update_stripped(&self) -> &'static [&'static str] {
        &["patient_id", "bill_number"]
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "payments",
            column: "bill_id",
            message: "Bill has payments; cancel it instead",
        }]
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<BillStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::PAYMENTS_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::PAYMENTS_MANAGE
    }

    /// Status follows the balance. Cancellation is the only status a caller may set,
    /// and only while nothing has been paid.
    fn derive_fields(&self, changes: &mut InputMap, existing: Option<&InputMap>) -> ApiResult<()> {
        let cancelled = BillStatus::Cancelled.as_ref();
        let current = existing.and_then(|e| e.get("status")).and_then(Value::as_str);
        let paid = existing.and_then(|e| number(e, "paid_amount")).unwrap_or(0.0);
        let total = number(changes, "total_amount")
            .or_else(|| existing.and_then(|e| number(e, "total_amount")))
            .unwrap_or(0.0);
        let implied = BillStatus::for_balance(paid, total);

        let requested = changes.remove("status");
        match requested.as_ref().and_then(Value::as_str) {
            Some(status) if status == cancelled => {
                if paid > 0.0 {
                    return Err(ApiError::BadRequest(
                        "Bill with recorded payments cannot be cancelled".to_string(),
                    ));
                }
                changes.insert("status".to_string(), Value::String(status.to_string()));
            }
            Some(_) if current == Some(cancelled) => {
                return Err(ApiError::BadRequest("Cancelled bill cannot be reopened".to_string()));
            }
            Some(status) if status != implied.as_ref() => {
                return Err(ApiError::BadRequest(format!(
                    "Bill status follows recorded payments (currently {})",
                    implied
                )));
            }
            _ if current == Some(cancelled) => {}
            _ => {
                if existing.is_none() || changes.contains_key("total_amount") || requested.is_some() {
                    changes.insert("status".to_string(), Value::String(implied.to_string()));
                }
            }
        }
        Ok(())
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        let total = number(record, "total_amount").unwrap_or(0.0);
        if number(record, "insurance_amount").unwrap_or(0.0) > total {
            return Err(ApiError::BadRequest(
                "Insurance amount cannot exceed the bill total".to_string(),
            ));
        }
        if number(record, "paid_amount").unwrap_or(0.0) > total {
            return Err(ApiError::BadRequest(
                "Bill total cannot be lower than the amount already paid".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== PAYMENT ====================

#[derive(Debug, Default)]
pub struct Payments;

const PAYMENT_COLUMNS: &[Column] = &[
    col("bill_id", ColumnKind::Text),
    col("amount", ColumnKind::Real),
    col("payment_method", ColumnKind::Enum(PAYMENT_METHODS)),
    col("reference_number", ColumnKind::Text),
    col("paid_at", ColumnKind::DateTime),
    col("notes", ColumnKind::Text),
];

impl Resource for Payments {
    fn table_name(&self) -> &'static str {
        "payments"
    }

    fn label(&self) -> &'static str {
        "Payment"
    }

    fn columns(&self) -> &'static [Column] {
        PAYMENT_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("bill_id", "Bill is required"),
            ("amount", "Payment amount is required"),
            ("payment_method", "Payment method is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["reference_number", "notes"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["bill_id", "payment_method"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("paid_at")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("paid_at", "DESC")
    }

    fn stamp_on_create(&self) -> &'static [&'static str] {
        &["paid_at"]
    }

    fn view_permission(&self) -> &'static str {
        permissions::PAYMENTS_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::PAYMENTS_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        match number(record, "amount") {
            Some(amount) if amount <= 0.0 => Err(ApiError::BadRequest(
                "Payment amount must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_methods_are_kebab_case() {
        assert_eq!(
            PAYMENT_METHODS,
            &["cash", "card", "insurance", "mobile-money", "bank-transfer"]
        );
    }

    #[test]
    fn bill_status_follows_balance() {
        assert_eq!(BillStatus::for_balance(0.0, 100.0), BillStatus::Unpaid);
        assert_eq!(BillStatus::for_balance(40.0, 100.0), BillStatus::Partial);
        assert_eq!(BillStatus::for_balance(100.0, 100.0), BillStatus::Paid);
        assert!(!transition_allowed::<BillStatus>("paid", "unpaid"));
    }

    #[test]
    fn bill_status_is_derived_not_assigned() {
        let fresh = serde_json::json!({ "total_amount": 100.0, "paid_amount": 0.0, "status": "unpaid" });
        let fresh = fresh.as_object().unwrap();

        let mut changes = serde_json::json!({ "status": "paid" }).as_object().unwrap().clone();
        assert!(Bills.derive_fields(&mut changes, Some(fresh)).is_err());

        let mut changes = serde_json::json!({ "status": "cancelled" }).as_object().unwrap().clone();
        Bills.derive_fields(&mut changes, Some(fresh)).unwrap();
        assert_eq!(changes["status"], "cancelled");

        let settled = serde_json::json!({ "total_amount": 100.0, "paid_amount": 100.0, "status": "paid" });
        let settled = settled.as_object().unwrap();
        let mut changes = serde_json::json!({ "total_amount": 150.0 }).as_object().unwrap().clone();
        Bills.derive_fields(&mut changes, Some(settled)).unwrap();
        assert_eq!(changes["status"], "partial");

        let mut changes = serde_json::json!({ "status": "cancelled" }).as_object().unwrap().clone();
        assert!(Bills.derive_fields(&mut changes, Some(settled)).is_err());

        let void = serde_json::json!({ "total_amount": 100.0, "paid_amount": 0.0, "status": "cancelled" });
        let void = void.as_object().unwrap();
        let mut changes = serde_json::json!({ "status": "unpaid" }).as_object().unwrap().clone();
        assert!(Bills.derive_fields(&mut changes, Some(void)).is_err());
        let mut changes = serde_json::json!({ "total_amount": 80.0 }).as_object().unwrap().clone();
        Bills.derive_fields(&mut changes, Some(void)).unwrap();
        assert!(!changes.contains_key("status"));
    }

    #[test]
    fn insurance_share_cannot_exceed_total() {
        let record = serde_json::json!({ "total_amount": 100.0, "insurance_amount": 150.0 });
        assert!(Bills.validate(record.as_object().unwrap()).is_err());
        let record = serde_json::json!({ "coverage_percent": 120 });
        assert!(InsuranceOrganizations.validate(record.as_object().unwrap()).is_err());
    }
}
