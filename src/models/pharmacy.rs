// src/models/pharmacy.rs
//! Pharmacy inventory and operating expenses.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::auth::permissions;
use crate::error::{ApiError, ApiResult};
use crate::input::InputMap;
use crate::repositories::{col, number, Column, ColumnKind, Resource, Usage};

pub const DOSAGE_FORMS: &[&str] = &[
    "tablet", "capsule", "syrup", "injection", "ointment", "drops", "inhaler", "other",
];

// ==================== ITEM ====================

#[derive(Debug, Default)]
pub struct PharmacyItems;

const ITEM_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("generic_name", ColumnKind::Text),
    col("category", ColumnKind::Text),
    col("dosage_form", ColumnKind::Enum(DOSAGE_FORMS)),
    col("strength", ColumnKind::Text),
    col("unit", ColumnKind::Text),
    col("reorder_level", ColumnKind::IntRange(0, 1_000_000)),
    col("manufacturer", ColumnKind::Text),
    col("is_active", ColumnKind::Bool),
];

impl Resource for PharmacyItems {
    fn table_name(&self) -> &'static str {
        "pharmacy_items"
    }

    fn label(&self) -> &'static str {
        "Pharmacy item"
    }

    fn columns(&self) -> &'static [Column] {
        ITEM_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("name", "Item name is required"), ("unit", "Unit is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "generic_name", "manufacturer"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["category", "dosage_form", "is_active"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "stock_batches",
            column: "item_id",
            message: "Item has stock batches; deactivate it instead",
        }]
    }

    fn view_permission(&self) -> &'static str {
        permissions::PHARMACY_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::PHARMACY_MANAGE
    }
}

// ==================== STOCK BATCH ====================

#[derive(Debug, Default)]
pub struct StockBatches;

const BATCH_COLUMNS: &[Column] = &[
    col("item_id", ColumnKind::Text),
    col("batch_number", ColumnKind::Text),
    col("quantity", ColumnKind::IntRange(0, 1_000_000_000)),
    col("cost_price", ColumnKind::NonNegative),
    col("selling_price", ColumnKind::NonNegative),
    col("expiry_date", ColumnKind::Date),
    col("received_date", ColumnKind::Date),
    col("supplier", ColumnKind::Text),
];

impl Resource for StockBatches {
    fn table_name(&self) -> &'static str {
        "stock_batches"
    }

    fn label(&self) -> &'static str {
        "Stock batch"
    }

    fn columns(&self) -> &'static [Column] {
        BATCH_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("item_id", "Pharmacy item is required"),
            ("batch_number", "Batch number is required"),
            ("quantity", "Quantity is required"),
            ("cost_price", "Cost price is required"),
            ("selling_price", "Selling price is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["batch_number", "supplier"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["item_id", "supplier"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("expiry_date")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("expiry_date", "ASC")
    }

    fn update_stripped(&self) -> &'static [&'static str] {
        &["item_id"]
    }

    fn stamp_on_create(&self) -> &'static [&'static str] {
        &["received_date"]
    }

    fn view_permission(&self) -> &'static str {
        permissions::PHARMACY_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::PHARMACY_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        if let (Some(cost), Some(selling)) = (number(record, "cost_price"), number(record, "selling_price")) {
            if selling < cost {
                return Err(ApiError::BadRequest(
                    "Selling price cannot be lower than cost price".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ==================== EXPENSE CATEGORY ====================

#[derive(Debug, Default)]
pub struct ExpenseCategories;

const CATEGORY_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("description", ColumnKind::Text),
    col("is_active", ColumnKind::Bool),
];

impl Resource for ExpenseCategories {
    fn table_name(&self) -> &'static str {
        "expense_categories"
    }

    fn label(&self) -> &'static str {
        "Expense category"
    }

    fn columns(&self) -> &'static [Column] {
        CATEGORY_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("name", "Category name is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "description"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["is_active"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn usages(&self) -> &'static [Usage] {
        &[Usage {
            table: "expenses",
            column: "category_id",
            message: "Category is used by existing expenses; deactivate it instead",
        }]
    }

    fn view_permission(&self) -> &'static str {
        permissions::EXPENSES_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::EXPENSES_MANAGE
    }
}

// ==================== EXPENSE ====================

#[derive(Debug, Default)]
pub struct Expenses;

const EXPENSE_COLUMNS: &[Column] = &[
    col("category_id", ColumnKind::Text),
    col("amount", ColumnKind::Real),
    col("expense_date", ColumnKind::Date),
    col("description", ColumnKind::Text),
    col("vendor", ColumnKind::Text),
    col("reference_number", ColumnKind::Text),
    col("payment_method", ColumnKind::Enum(super::PAYMENT_METHODS)),
];

#[async_trait]
impl Resource for Expenses {
    fn table_name(&self) -> &'static str {
        "expenses"
    }

    fn label(&self) -> &'static str {
        "Expense"
    }

    fn columns(&self) -> &'static [Column] {
        EXPENSE_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("category_id", "Expense category is required"),
            ("amount", "Amount is required"),
            ("expense_date", "Expense date is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["description", "vendor", "reference_number"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["category_id", "payment_method"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("expense_date")
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("expense_date", "DESC")
    }

    fn view_permission(&self) -> &'static str {
        permissions::EXPENSES_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::EXPENSES_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        match number(record, "amount") {
            Some(amount) if amount <= 0.0 => Err(ApiError::BadRequest(
                "Amount must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn before_write(
        &self,
        pool: &SqlitePool,
        record: &InputMap,
        existing: Option<&InputMap>,
    ) -> ApiResult<()> {
        let category_id = match record.get("category_id").and_then(Value::as_str) {
            Some(id) => id,
            None => return Ok(()),
        };
        let unchanged = existing
            .and_then(|e| e.get("category_id"))
            .and_then(Value::as_str)
            == Some(category_id);
        if unchanged {
            return Ok(());
        }
        let active: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM expense_categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(pool)
            .await?;
        match active {
            None => Err(ApiError::not_found("Expense category")),
            Some((false,)) => Err(ApiError::BadRequest("Expense category is inactive".to_string())),
            Some((true,)) => Ok(()),
        }
    }
}
