// src/insurance_handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::aggregate::{Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField};
use crate::auth::{permissions, RequestContext};
use crate::crud_handlers::register;
use crate::error::ApiResult;
use crate::handlers::method_not_allowed;
use crate::input::RequestInput;
use crate::models::InsuranceOrganizations;
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::AppState;

/// Insured bills per organization: billed, covered and collected amounts.
pub async fn claims_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_any_permission(&[permissions::INSURANCE_VIEW, permissions::FINANCIAL_REPORTS])?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(90)),
        &["status"],
        "insurance-claims",
        |filter| {
            let query = MetricQuery::new(
                "bills b JOIN insurance_organizations o ON o.id = b.insurance_id",
                GroupKey::labelled("b.insurance_id", "o.name"),
            )
            .dated("b.created_at")
            .condition("b.status != 'cancelled'", vec![])
            .metric(Metric::count("bills"))
            .metric(Metric::sum("billed", "b.total_amount", Cast::Money))
            .metric(Metric::sum("covered", "b.insurance_amount", Cast::Money))
            .metric(Metric::sum("paid", "b.paid_amount", Cast::Money));

            Ok(ReportSpec::new("organization_id")
                .label("organization_name")
                .query(with_exact(query, filter, "status", "b.status"))
                .derive(Derived::percent("collection_rate", "paid", "billed"))
                .summarize(SummaryField::count("organizations"))
                .summarize(SummaryField::sum("total_billed", "billed", Cast::Money))
                .summarize(SummaryField::sum("total_covered", "covered", Cast::Money))
                .summarize(SummaryField::rate("collection_rate", "paid", "billed")))
        },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/insurance/reports/claims")
            .route(web::get().to(claims_report))
            .default_service(web::to(method_not_allowed)),
    );

    register::<InsuranceOrganizations>(cfg, "/api/insurance/organizations");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::models::Bills;
    use crate::test_support::{bearer, body_json, test_state};
    use actix_web::{test, App};
    use serde_json::json;

    #[actix_rt::test]
    async fn claims_per_organization() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let org = state
            .create_id::<InsuranceOrganizations>(json!({ "name": "Jubilee", "code": "JUB", "coverage_percent": 80 }))
            .await;
        let patient = state.insert_patient("Wairimu").await;
        for (total, covered, status) in [(100.0, 80.0, "unpaid"), (300.0, 240.0, "unpaid"), (50.0, 40.0, "cancelled")] {
            state
                .create_id::<Bills>(json!({
                    "patient_id": patient,
                    "insurance_id": org,
                    "total_amount": total,
                    "insurance_amount": covered,
                    "status": status
                }))
                .await;
        }
        sqlx::query("UPDATE bills SET paid_amount = total_amount, status = 'paid' WHERE total_amount = 100")
            .execute(&state.app.db_pool)
            .await
            .unwrap();

        let req = test::TestRequest::get()
            .uri("/api/insurance/reports/claims")
            .insert_header(bearer(&state, UserRole::Accountant))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["organization_name"], "Jubilee");
        assert_eq!(rows[0]["bills"], 2);
        assert_eq!(rows[0]["billed"], 400.0);
        assert_eq!(rows[0]["covered"], 320.0);
        assert_eq!(rows[0]["paid"], 100.0);
        assert_eq!(rows[0]["collection_rate"], 25.0);
        assert_eq!(body["data"]["period"]["date_from"], "2023-12-16");
    }

    #[actix_rt::test]
    async fn billed_organization_cannot_be_deleted() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Admin);

        let org = state
            .create_id::<InsuranceOrganizations>(json!({ "name": "AAR", "code": "AAR" }))
            .await;
        let patient = state.insert_patient("Kamau").await;
        state
            .create_id::<Bills>(json!({ "patient_id": patient, "insurance_id": org, "total_amount": 10 }))
            .await;

        let req = test::TestRequest::delete()
            .uri(&format!("/api/insurance/organizations/{}", org))
            .insert_header(token.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert!(body_json(resp).await["message"].as_str().unwrap().contains("deactivate"));

        let req = test::TestRequest::get()
            .uri(&format!("/api/insurance/organizations/{}", org))
            .insert_header(token.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::post()
            .uri("/api/insurance/organizations")
            .insert_header(token)
            .set_json(json!({ "name": "Duplicate", "code": "AAR" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(body_json(resp).await["message"], "Insurance organization already exists");
    }
}
