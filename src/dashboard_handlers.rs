// src/dashboard_handlers.rs
//! Dashboard payloads composed from independent queries and report runs.
//! Nothing here shares a transaction, so figures may be slightly skewed under concurrent writes.

use actix_web::{web, HttpResponse};
use chrono::{Datelike, Duration};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::aggregate::{
    percent, round_to, run_report, Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportOutput,
    ReportSpec, SummaryField,
};
use crate::auth::{permissions, RequestContext};
use crate::clock::{format_date, TIMESTAMP_FORMAT};
use crate::error::ApiResult;
use crate::handlers::{method_not_allowed, ApiResponse};
use crate::input::RequestInput;
use crate::ipd_handlers::occupancy_spec;
use crate::models::{VisitStatus, CRITICAL_TRIAGE_MAX};
use crate::payment_handlers::net_income_spec;
use crate::query_builders::{DateWindow, Filter};
use crate::report_handlers::top_doctors_spec;
use crate::AppState;

const EXPIRY_ALERT_DAYS: i64 = 30;
const CRITICAL_WAIT_MINUTES: i64 = 15;
const HIGH_OCCUPANCY_RATE: f64 = 90.0;
const TOP_DOCTORS: usize = 5;

#[derive(Debug, Serialize)]
pub struct DashboardAlert {
    pub kind: &'static str,
    pub severity: &'static str,
    pub message: String,
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub total_patients: i64,
    pub active_doctors: i64,
    pub today_appointments: i64,
    pub completed_appointments: i64,
    pub pending_appointments: i64,
    pub today_revenue: f64,
    pub month_revenue: f64,
    pub total_beds: i64,
    pub occupied_beds: i64,
    pub bed_occupancy_rate: f64,
    pub active_emergency_visits: i64,
    pub department_distribution: ReportOutput,
    pub alerts: Vec<DashboardAlert>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardEvaluation {
    pub patient_flow: ReportOutput,
    pub revenue_trend: ReportOutput,
    pub top_doctors: ReportOutput,
    pub bed_occupancy: ReportOutput,
}

async fn count(pool: &SqlitePool, sql: &str, binds: &[&str]) -> ApiResult<i64> {
    let mut query = sqlx::query_as::<_, (i64,)>(sql);
    for value in binds {
        query = query.bind(*value);
    }
    Ok(query.fetch_one(pool).await?.0)
}

async fn revenue_between(pool: &SqlitePool, from: &str, to: &str) -> ApiResult<f64> {
    let (total,): (f64,) = sqlx::query_as(
        "SELECT CAST(COALESCE(SUM(amount), 0) AS REAL) FROM payments WHERE date(paid_at) BETWEEN ? AND ?",
    )
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(round_to(total, 2))
}

pub fn department_spec() -> ReportSpec {
    ReportSpec::new("department")
        .query(
            MetricQuery::new("appointments a JOIN doctors d ON d.id = a.doctor_id", GroupKey::column("d.department"))
                .dated("a.appointment_date")
                .metric(Metric::count("appointments"))
                .metric(Metric::count_distinct("patients", "a.patient_id")),
        )
        .derive(Derived::share("share", "appointments"))
        .summarize(SummaryField::count("departments"))
        .summarize(SummaryField::sum("total_appointments", "appointments", Cast::Int))
}

/// Outpatient, inpatient and emergency volume per bucket.
pub fn patient_flow_spec(bucket: Bucket) -> ReportSpec {
    ReportSpec::new(bucket.key_name())
        .query(
            MetricQuery::new("appointments", GroupKey::date("appointment_date", bucket))
                .dated("appointment_date")
                .condition("status != 'cancelled'", vec![])
                .metric(Metric::count("outpatient").in_total()),
        )
        .query(
            MetricQuery::new("ipd_admissions", GroupKey::date("admission_date", bucket))
                .dated("admission_date")
                .metric(Metric::count("inpatient").in_total()),
        )
        .query(
            MetricQuery::new("emergency_visits", GroupKey::date("arrival_time", bucket))
                .dated("arrival_time")
                .metric(Metric::count("emergency").in_total()),
        )
        .total("total")
        .summarize(SummaryField::sum("total_outpatient", "outpatient", Cast::Int))
        .summarize(SummaryField::sum("total_inpatient", "inpatient", Cast::Int))
        .summarize(SummaryField::sum("total_emergency", "emergency", Cast::Int))
        .summarize(SummaryField::sum("total_patients", "total", Cast::Int))
}

async fn collect_alerts(app_state: &AppState, occupancy: &ReportOutput) -> ApiResult<Vec<DashboardAlert>> {
    let pool = &app_state.db_pool;
    let now = app_state.clock.now();
    let today = format_date(now.date());
    let mut alerts = Vec::new();

    let low_stock: Vec<(String, String, i64, i64)> = sqlx::query_as(
        "SELECT i.id, i.name, i.reorder_level, CAST(COALESCE(SUM(b.quantity), 0) AS INTEGER)
         FROM pharmacy_items i
         LEFT JOIN stock_batches b ON b.item_id = i.id AND (b.expiry_date IS NULL OR b.expiry_date >= ?)
         WHERE i.is_active = 1
         GROUP BY i.id, i.name, i.reorder_level
         HAVING COALESCE(SUM(b.quantity), 0) <= i.reorder_level
         ORDER BY i.name",
    )
    .bind(&today)
    .fetch_all(pool)
    .await?;
    for (id, name, reorder_level, on_hand) in low_stock {
        alerts.push(DashboardAlert {
            kind: "low-stock",
            severity: if on_hand == 0 { "critical" } else { "warning" },
            message: format!("{} has {} on hand (reorder level {})", name, on_hand, reorder_level),
            reference: Some(id),
        });
    }

    let expiry_limit = format_date(now.date() + Duration::days(EXPIRY_ALERT_DAYS));
    let expiring: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT b.id, i.name, b.batch_number, b.expiry_date
         FROM stock_batches b JOIN pharmacy_items i ON i.id = b.item_id
         WHERE b.quantity > 0 AND b.expiry_date BETWEEN ? AND ?
         ORDER BY b.expiry_date, b.id",
    )
    .bind(&today)
    .bind(&expiry_limit)
    .fetch_all(pool)
    .await?;
    for (id, name, batch, expiry) in expiring {
        alerts.push(DashboardAlert {
            kind: "expiring-stock",
            severity: "warning",
            message: format!("{} batch {} expires on {}", name, batch, expiry),
            reference: Some(id),
        });
    }

    let cutoff = (now - Duration::minutes(CRITICAL_WAIT_MINUTES)).format(TIMESTAMP_FORMAT).to_string();
    let waiting: Vec<(String, i64, String)> = sqlx::query_as(
        "SELECT id, triage_level, arrival_time FROM emergency_visits
         WHERE status = 'waiting' AND triage_level <= ? AND arrival_time <= ?
         ORDER BY triage_level, arrival_time",
    )
    .bind(CRITICAL_TRIAGE_MAX)
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;
    for (id, level, arrival) in waiting {
        alerts.push(DashboardAlert {
            kind: "critical-wait",
            severity: "critical",
            message: format!("Triage level {} patient waiting since {}", level, arrival),
            reference: Some(id),
        });
    }

    for row in &occupancy.data {
        let rate = row.get("occupancy_rate").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if rate >= HIGH_OCCUPANCY_RATE {
            let ward = row.get("ward_name").and_then(|v| v.as_str()).unwrap_or("Ward");
            alerts.push(DashboardAlert {
                kind: "high-occupancy",
                severity: if rate >= 100.0 { "critical" } else { "warning" },
                message: format!("{} is at {:.1}% occupancy", ward, rate),
                reference: row.get("ward_id").and_then(|v| v.as_str()).map(str::to_string),
            });
        }
    }

    Ok(alerts)
}

pub async fn overview(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::DASHBOARD_VIEW)?;

    let pool = &app_state.db_pool;
    let today_date = app_state.clock.today();
    let today = format_date(today_date);
    let month_start = format_date(today_date.with_day(1).unwrap_or(today_date));

    let total_patients = count(pool, "SELECT COUNT(*) FROM patients", &[]).await?;
    let active_doctors = count(pool, "SELECT COUNT(*) FROM doctors WHERE status = 'available'", &[]).await?;
    let today_appointments =
        count(pool, "SELECT COUNT(*) FROM appointments WHERE date(appointment_date) = ?", &[today.as_str()]).await?;
    let completed_appointments = count(
        pool,
        "SELECT COUNT(*) FROM appointments WHERE date(appointment_date) = ? AND status = 'completed'",
        &[today.as_str()],
    )
    .await?;
    let total_beds = count(pool, "SELECT COUNT(*) FROM beds", &[]).await?;
    let occupied_beds = count(pool, "SELECT COUNT(*) FROM beds WHERE status = 'occupied'", &[]).await?;
    let active_emergency_visits = count(
        pool,
        "SELECT COUNT(*) FROM emergency_visits WHERE status IN (?, ?)",
        VisitStatus::ACTIVE,
    )
    .await?;

    let filter = app_state
        .filter_builder()
        .with_default_window(DateWindow::LastDays(30))
        .build(&input.query, &[])?;
    let department_distribution = run_report(pool, &filter, &department_spec()).await?;
    let occupancy = run_report(pool, &Filter::default(), &occupancy_spec()).await?;
    let alerts = collect_alerts(&app_state, &occupancy).await?;

    let overview = DashboardOverview {
        total_patients,
        active_doctors,
        today_appointments,
        completed_appointments,
        pending_appointments: today_appointments - completed_appointments,
        today_revenue: revenue_between(pool, &today, &today).await?,
        month_revenue: revenue_between(pool, &month_start, &today).await?,
        total_beds,
        occupied_beds,
        bed_occupancy_rate: percent(occupied_beds as f64, total_beds as f64),
        active_emergency_visits,
        department_distribution,
        alerts,
    };

    log::debug!("📊 Dashboard overview with {} alerts", overview.alerts.len());
    Ok(ApiResponse::success(overview).into_response())
}

pub async fn evaluation(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::REPORTS_VIEW)?;

    let pool = &app_state.db_pool;
    let filter = app_state
        .filter_builder()
        .with_default_window(DateWindow::LastDays(365))
        .build(&input.query, &["group_by", "department"])?;
    let bucket = Bucket::from_filter(&filter, Bucket::Month)?;

    let evaluation = DashboardEvaluation {
        patient_flow: run_report(pool, &filter, &patient_flow_spec(bucket)).await?,
        revenue_trend: run_report(pool, &filter, &net_income_spec(bucket)).await?,
        top_doctors: run_report(pool, &filter, &top_doctors_spec(&filter, TOP_DOCTORS)).await?,
        bed_occupancy: run_report(pool, &filter, &occupancy_spec()).await?,
    };
    Ok(ApiResponse::success(evaluation).into_response())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/dashboard")
            .service(
                web::resource("/overview")
                    .route(web::get().to(overview))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/evaluation")
                    .route(web::get().to(evaluation))
                    .default_service(web::to(method_not_allowed)),
            ),
    );
}
