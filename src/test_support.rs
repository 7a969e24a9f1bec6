// src/test_support.rs
//! In-memory database, frozen clock and tokens for handler tests.

use actix_web::{body::MessageBody, dev::ServiceResponse, test, web};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use strum::VariantNames;

use crate::auth::{AuthService, UserRole};
use crate::clock::{FixedClock, TIMESTAMP_FORMAT};
use crate::config::Config;
use crate::db::run_migrations;
use crate::input::InputMap;
use crate::models::*;
use crate::repositories::{Resource, WriteContext};
use crate::AppState;

pub const TEST_SECRET: &str = "test_secret_that_is_long_enough_for_hs256!";

/// 2024-03-15 10:00:00, a Friday.
pub fn test_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .expect("valid fixed date")
}

pub struct TestState {
    pub app: Arc<AppState>,
    pub auth: Arc<AuthService>,
    users: HashMap<String, String>,
}

pub async fn test_state() -> TestState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    run_migrations(&pool).await.expect("migrations");

    let auth = Arc::new(AuthService::new(TEST_SECRET, 1, 4));
    let password_hash = auth.hash_password("Passw0rd!").expect("hash");
    let now = test_now().format(TIMESTAMP_FORMAT).to_string();

    let mut users = HashMap::new();
    for role in UserRole::VARIANTS {
        let id = format!("user-{}", role);
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(role.to_string())
        .bind(format!("{}@hospital.test", role))
        .bind(&password_hash)
        .bind(role.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .expect("seed user");
        users.insert(role.to_string(), id);
    }

    let app = Arc::new(AppState {
        db_pool: pool,
        config: Config::default(),
        clock: Arc::new(FixedClock(test_now())),
    });

    TestState { app, auth, users }
}

impl TestState {
    pub fn data(&self) -> web::Data<Arc<AppState>> {
        web::Data::new(self.app.clone())
    }

    pub fn auth(&self) -> web::Data<Arc<AuthService>> {
        web::Data::new(self.auth.clone())
    }

    pub fn user_id(&self, role: UserRole) -> String {
        self.users.get(role.as_ref()).cloned().unwrap_or_default()
    }

    fn write_ctx(&self) -> WriteContext {
        WriteContext {
            actor: Some(self.user_id(UserRole::Admin)),
            now: test_now(),
            strict_transitions: false,
        }
    }

    /// Creates through the resource itself, so fixtures pass the same validation as requests.
    pub async fn create<R: Resource>(&self, payload: Value) -> InputMap {
        let payload = payload.as_object().cloned().unwrap_or_default();
        R::default()
            .create(&self.app.db_pool, &payload, &self.write_ctx())
            .await
            .expect("fixture create")
    }

    pub async fn create_id<R: Resource>(&self, payload: Value) -> String {
        let record = self.create::<R>(payload).await;
        record["id"].as_str().unwrap_or_default().to_string()
    }

    pub async fn insert_patient(&self, name: &str) -> String {
        self.create_id::<Patients>(json!({ "name": name, "gender": "female" })).await
    }

    pub async fn insert_doctor(&self, name: &str, department: &str, status: &str) -> String {
        self.create_id::<Doctors>(json!({ "name": name, "department": department, "status": status }))
            .await
    }

    pub async fn insert_appointment(&self, patient: &str, doctor: &str, date: &str, status: &str) -> String {
        self.create_id::<Appointments>(json!({
            "patient_id": patient,
            "doctor_id": doctor,
            "appointment_date": date,
            "status": status
        }))
        .await
    }

    pub async fn insert_ward(&self, name: &str) -> String {
        self.create_id::<Wards>(json!({ "name": name, "ward_type": "general" })).await
    }

    pub async fn insert_bed(&self, ward: &str, number: &str, status: &str) -> String {
        self.create_id::<Beds>(json!({ "ward_id": ward, "bed_number": number, "status": status }))
            .await
    }

    pub async fn insert_expense_category(&self, name: &str) -> String {
        self.create_id::<ExpenseCategories>(json!({ "name": name })).await
    }

    pub async fn insert_stock_batch(&self, cost: f64, selling: f64) -> String {
        let item = self
            .create_id::<PharmacyItems>(json!({ "name": "Paracetamol 500mg", "unit": "tablet" }))
            .await;
        self.create_id::<StockBatches>(json!({
            "item_id": item,
            "batch_number": "PCM-001",
            "quantity": 100,
            "cost_price": cost,
            "selling_price": selling,
            "expiry_date": "2025-01-31"
        }))
        .await
    }

    pub async fn insert_bill(&self, patient: &str, total: f64) -> String {
        self.create_id::<Bills>(json!({ "patient_id": patient, "total_amount": total })).await
    }

    pub async fn insert_payment(&self, bill: &str, amount: f64, method: &str, paid_at: &str) -> String {
        self.create_id::<Payments>(json!({
            "bill_id": bill,
            "amount": amount,
            "payment_method": method,
            "paid_at": paid_at
        }))
        .await
    }
}

pub fn bearer(state: &TestState, role: UserRole) -> (&'static str, String) {
    let token = state
        .auth
        .generate_token(&state.user_id(role), role.as_ref(), role)
        .expect("token");
    ("Authorization", format!("Bearer {}", token))
}

pub async fn body_json<B: MessageBody>(resp: ServiceResponse<B>) -> Value {
    let bytes = test::read_body(resp).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
