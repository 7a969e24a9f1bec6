// src/emergency_handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::aggregate::{Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField};
use crate::auth::{permissions, RequestContext};
use crate::crud_handlers::register;
use crate::error::ApiResult;
use crate::handlers::method_not_allowed;
use crate::input::RequestInput;
use crate::models::{EmergencyVisits, CRITICAL_TRIAGE_MAX};
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::AppState;

/// Visits per bucket with critical cases, admissions and the wait until first seen.
pub async fn summary_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::EMERGENCY_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(7)),
        &["group_by", "doctor_id"],
        "emergency-summary",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Day)?;
            let query = MetricQuery::new("emergency_visits", GroupKey::date("arrival_time", bucket))
                .dated("arrival_time")
                .metric(Metric::count("visits"))
                .metric(Metric::count_where(
                    "critical",
                    &format!("triage_level <= {}", CRITICAL_TRIAGE_MAX),
                ))
                .metric(Metric::count_where("admitted", "status = 'admitted'"))
                .metric(Metric::count_where("left_without_being_seen", "status = 'left-without-being-seen'"))
                .metric(Metric::avg(
                    "avg_wait_minutes",
                    "CASE WHEN seen_at IS NOT NULL THEN (julianday(seen_at) - julianday(arrival_time)) * 1440 END",
                ));

            Ok(ReportSpec::new(bucket.key_name())
                .query(with_exact(query, filter, "doctor_id", "doctor_id"))
                .derive(Derived::percent("admission_rate", "admitted", "visits"))
                .summarize(SummaryField::sum("total_visits", "visits", Cast::Int))
                .summarize(SummaryField::sum("total_critical", "critical", Cast::Int))
                .summarize(SummaryField::rate("admission_rate", "admitted", "visits"))
                .summarize(SummaryField::max("longest_avg_wait_minutes", "avg_wait_minutes", Cast::Decimal1)))
        },
    )
    .await
}

/// Visit counts per triage level and each level's share of all visits.
pub async fn triage_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::EMERGENCY_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["status"],
        "emergency-triage",
        |filter| {
            let query = MetricQuery::new("emergency_visits", GroupKey::column("triage_level"))
                .dated("arrival_time")
                .metric(Metric::count("visits"))
                .metric(Metric::count_where("waiting", "status = 'waiting'"));

            Ok(ReportSpec::new("triage_level")
                .query(with_exact(query, filter, "status", "status"))
                .derive(Derived::share("share", "visits"))
                .summarize(SummaryField::sum("total_visits", "visits", Cast::Int))
                .summarize(SummaryField::count("levels")))
        },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/emergency/reports/summary")
            .route(web::get().to(summary_report))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/emergency/reports/triage")
            .route(web::get().to(triage_report))
            .default_service(web::to(method_not_allowed)),
    );

    register::<EmergencyVisits>(cfg, "/api/emergency/visits");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::test_support::{bearer, body_json, test_state};
    use actix_web::{test, App};
    use serde_json::json;

    #[actix_rt::test]
    async fn visit_requires_a_triage_level() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let patient = state.insert_patient("Amani").await;

        let req = test::TestRequest::post()
            .uri("/api/emergency/visits")
            .insert_header(bearer(&state, UserRole::Nurse))
            .set_json(json!({ "patient_id": patient, "chief_complaint": "Chest pain" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body = body_json(resp).await;
        assert!(body["message"].as_str().unwrap().to_lowercase().contains("triage level"));

        let req = test::TestRequest::post()
            .uri("/api/emergency/visits")
            .insert_header(bearer(&state, UserRole::Nurse))
            .set_json(json!({ "patient_id": patient, "chief_complaint": "Chest pain", "triage_level": 7 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri("/api/emergency/visits")
            .insert_header(bearer(&state, UserRole::Nurse))
            .set_json(json!({ "patient_id": patient, "chief_complaint": "Chest pain", "triage_level": "2" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["triage_level"], 2);
        assert_eq!(body["data"]["status"], "waiting");
        assert_eq!(body["data"]["arrival_time"], "2024-03-15 10:00:00");
    }

    #[actix_rt::test]
    async fn summary_counts_critical_cases_and_waits() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Doctor);
        let patient = state.insert_patient("Faraji").await;

        for (level, arrival, seen, status) in [
            (1, "2024-03-14 08:00:00", Some("2024-03-14 08:10:00"), "admitted"),
            (3, "2024-03-14 09:00:00", Some("2024-03-14 09:30:00"), "discharged"),
            (4, "2024-03-12 12:00:00", None, "waiting"),
        ] {
            let mut payload = json!({
                "patient_id": patient,
                "chief_complaint": "Assessment",
                "triage_level": level,
                "arrival_time": arrival,
                "status": status
            });
            if let Some(seen) = seen {
                payload["seen_at"] = json!(seen);
            }
            state.create_id::<EmergencyVisits>(payload).await;
        }

        let req = test::TestRequest::get()
            .uri("/api/emergency/reports/summary")
            .insert_header(token.clone())
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["period"]["date_from"], "2024-03-08");
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["date"], "2024-03-14");
        assert_eq!(rows[1]["visits"], 2);
        assert_eq!(rows[1]["critical"], 1);
        assert_eq!(rows[1]["admission_rate"], 50.0);
        assert_eq!(rows[1]["avg_wait_minutes"], 20.0);
        assert_eq!(body["data"]["summary"]["total_visits"], 3);

        let req = test::TestRequest::get()
            .uri("/api/emergency/reports/triage")
            .insert_header(token)
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["triage_level"], "1");
        assert_eq!(rows[0]["share"], 33.3);
    }

    #[actix_rt::test]
    async fn reception_cannot_see_emergency_reports() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/emergency/reports/triage")
            .insert_header(bearer(&state, UserRole::Receptionist))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);
    }
}
