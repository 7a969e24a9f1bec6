// src/report_handlers.rs
//! Shared report plumbing plus the cross-department reports under `/api/reports`.

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::aggregate::{
    respond, run_report, Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField,
};
use crate::auth::{permissions, RequestContext};
use crate::error::ApiResult;
use crate::handlers::method_not_allowed;
use crate::input::RequestInput;
use crate::query_builders::{DateWindow, Filter};
use crate::AppState;

/// Builds the filter (with an optional default window), runs the report built from it and
/// answers with the envelope or CSV.
pub async fn serve_report<F>(
    app_state: &AppState,
    input: &RequestInput,
    window: Option<DateWindow>,
    recognized: &[&str],
    file_stem: &str,
    build: F,
) -> ApiResult<HttpResponse>
where
    F: FnOnce(&Filter) -> ApiResult<ReportSpec>,
{
    let mut builder = app_state.filter_builder();
    if let Some(window) = window {
        builder = builder.with_default_window(window);
    }
    let filter = builder.build(&input.query, recognized)?;
    let spec = build(&filter)?;
    let output = run_report(&app_state.db_pool, &filter, &spec).await?;

    log::debug!("📊 Report {} produced {} rows", file_stem, output.data.len());
    respond(&input.query, output, file_stem)
}

/// Adds `column = ?` when the filter carries `key`.
pub fn with_exact(query: MetricQuery, filter: &Filter, key: &str, column: &str) -> MetricQuery {
    match filter.get(key) {
        Some(value) => query.condition(&format!("{} = ?", column), vec![value.to_string()]),
        None => query,
    }
}

/// Doctors ranked by distinct patients seen, then appointment count; ties by doctor id.
pub fn top_doctors_spec(filter: &Filter, limit: usize) -> ReportSpec {
    let query = MetricQuery::new(
        "appointments a JOIN doctors d ON d.id = a.doctor_id",
        GroupKey::labelled("a.doctor_id", "d.name"),
    )
    .dated("a.appointment_date")
    .condition("a.status NOT IN (?, ?)", vec!["cancelled".to_string(), "no-show".to_string()])
    .metric(Metric::count_distinct("patients", "a.patient_id"))
    .metric(Metric::count("appointments"))
    .metric(Metric::sum("revenue", "a.fee", Cast::Money));

    ReportSpec::new("doctor_id")
        .label("doctor_name")
        .query(with_exact(query, filter, "department", "d.department"))
        .ranked("patients", limit)
        .summarize(SummaryField::count("doctors"))
        .summarize(SummaryField::sum("total_patients", "patients", Cast::Int))
        .summarize(SummaryField::sum("total_appointments", "appointments", Cast::Int))
}

pub async fn top_doctors(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::REPORTS_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["department"],
        "top-doctors",
        |filter| Ok(top_doctors_spec(filter, filter.limit.unwrap_or(5) as usize)),
    )
    .await
}

pub async fn appointments_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_any_permission(&[permissions::REPORTS_VIEW, permissions::APPOINTMENTS_VIEW])?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["group_by", "doctor_id"],
        "appointments",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Day)?;
            let query = MetricQuery::new("appointments", GroupKey::date("appointment_date", bucket))
                .dated("appointment_date")
                .metric(Metric::count("appointments"))
                .metric(Metric::count_where("scheduled", "status IN ('scheduled', 'confirmed')"))
                .metric(Metric::count_where("completed", "status = 'completed'"))
                .metric(Metric::count_where("cancelled", "status = 'cancelled'"))
                .metric(Metric::count_where("no_show", "status = 'no-show'"));

            Ok(ReportSpec::new(bucket.key_name())
                .query(with_exact(query, filter, "doctor_id", "doctor_id"))
                .derive(Derived::percent("completion_rate", "completed", "appointments"))
                .summarize(SummaryField::sum("total_appointments", "appointments", Cast::Int))
                .summarize(SummaryField::sum("total_completed", "completed", Cast::Int))
                .summarize(SummaryField::sum("total_no_show", "no_show", Cast::Int))
                .summarize(SummaryField::rate("completion_rate", "completed", "appointments")))
        },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/reports")
            .service(
                web::resource("/top-doctors")
                    .route(web::get().to(top_doctors))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/appointments")
                    .route(web::get().to(appointments_report))
                    .default_service(web::to(method_not_allowed)),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::test_support::{bearer, body_json, test_state};
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn top_doctors_ties_break_by_doctor_id() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let p1 = state.insert_patient("Asha").await;
        let p2 = state.insert_patient("Baraka").await;
        let d1 = state.insert_doctor("Dr. Mwangi", "Cardiology", "available").await;
        let d2 = state.insert_doctor("Dr. Otieno", "Pediatrics", "available").await;
        let d3 = state.insert_doctor("Dr. Wanjiru", "Cardiology", "available").await;
        for doctor in [&d1, &d2] {
            state.insert_appointment(&p1, doctor, "2024-03-10", "completed").await;
            state.insert_appointment(&p2, doctor, "2024-03-11", "scheduled").await;
        }
        state.insert_appointment(&p1, &d3, "2024-03-12", "completed").await;
        state.insert_appointment(&p2, &d3, "2024-03-12", "cancelled").await;

        let req = test::TestRequest::get()
            .uri("/api/reports/top-doctors?limit=2")
            .insert_header(bearer(&state, UserRole::Doctor))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);

        let mut tied = vec![d1.clone(), d2.clone()];
        tied.sort();
        assert_eq!(rows[0]["doctor_id"], tied[0].as_str());
        assert_eq!(rows[1]["doctor_id"], tied[1].as_str());
        assert_eq!(rows[0]["patients"], 2);
        assert_eq!(body["data"]["period"]["date_from"], "2024-02-14");
    }

    #[actix_rt::test]
    async fn appointments_report_buckets_and_rates() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let patient = state.insert_patient("Neema").await;
        let doctor = state.insert_doctor("Dr. Kimaro", "General", "available").await;
        state.insert_appointment(&patient, &doctor, "2024-03-01", "completed").await;
        state.insert_appointment(&patient, &doctor, "2024-03-01", "no-show").await;
        state.insert_appointment(&patient, &doctor, "2024-03-05", "scheduled").await;

        let req = test::TestRequest::get()
            .uri("/api/reports/appointments?date_from=2024-03-01&date_to=2024-03-31&group_by=month")
            .insert_header(bearer(&state, UserRole::Receptionist))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["month"], "2024-03");
        assert_eq!(rows[0]["appointments"], 3);
        assert_eq!(rows[0]["completion_rate"], 33.3);
        assert_eq!(body["data"]["summary"]["total_no_show"], 1);

        let req = test::TestRequest::get()
            .uri("/api/reports/appointments?group_by=hourly")
            .insert_header(bearer(&state, UserRole::Receptionist))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_rt::test]
    async fn csv_export_and_permissions() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/reports/top-doctors")
            .insert_header(bearer(&state, UserRole::SupportAgent))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);

        let req = test::TestRequest::get()
            .uri("/api/reports/appointments?format=csv")
            .insert_header(bearer(&state, UserRole::Admin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert!(resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .starts_with("text/csv"));
        let bytes = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&bytes).starts_with("date,appointments,scheduled"));
    }
}
