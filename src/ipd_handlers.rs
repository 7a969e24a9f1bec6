// src/ipd_handlers.rs
//! Inpatient department: wards, beds, admissions with bed placement, admission request review.

use actix_web::{web, HttpResponse};
use serde_json::Value;
use std::sync::Arc;

use crate::aggregate::{Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField};
use crate::auth::{permissions, RequestContext};
use crate::clock::TIMESTAMP_FORMAT;
use crate::crud_handlers::{self, register};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{method_not_allowed, ApiResponse};
use crate::input::{InputMap, InputMapExt, RequestInput};
use crate::models::{
    AdmissionRequests, AdmissionStatus, Admissions, BedStatus, Beds, Lifecycle, RequestStatus, Wards,
};
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::repositories::{write_error, Resource};
use crate::validator::FieldValidator;
use crate::AppState;

// ==================== ADMISSIONS ====================

/// Admits a patient into an available bed of the given ward; the bed becomes occupied in the
/// same transaction.
pub async fn admit_patient(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::IPD_MANAGE)?;

    let admissions = Admissions;
    let write_ctx = app_state.write_context(&ctx);
    let mut record = admissions.prepare_create(&input.body, &write_ctx)?;
    record.insert("status".to_string(), Value::String(AdmissionStatus::Admitted.to_string()));
    record.remove("discharge_date");

    let patient_id = record.text("patient_id").unwrap_or_default();
    let ward_id = record.text("ward_id").unwrap_or_default();
    let bed_id = record.text("bed_id").unwrap_or_default();

    let mut tx = app_state.db_pool.begin().await?;

    let bed: Option<(String, String)> = sqlx::query_as("SELECT ward_id, status FROM beds WHERE id = ?")
        .bind(&bed_id)
        .fetch_optional(&mut *tx)
        .await?;
    let (bed_ward, bed_status) = bed.ok_or_else(|| ApiError::not_found("Bed"))?;
    if bed_ward != ward_id {
        return Err(ApiError::BadRequest("Bed does not belong to the selected ward".to_string()));
    }
    if bed_status != BedStatus::Available.as_ref() {
        return Err(ApiError::BadRequest(format!("Bed is not available (currently {})", bed_status)));
    }

    let (already_admitted,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM ipd_admissions WHERE patient_id = ? AND status = ?",
    )
    .bind(&patient_id)
    .bind(AdmissionStatus::Admitted.as_ref())
    .fetch_one(&mut *tx)
    .await?;
    if already_admitted > 0 {
        return Err(ApiError::BadRequest("Patient is already admitted".to_string()));
    }

    if let Some(request_id) = record.text("request_id") {
        let request: Option<(String,)> = sqlx::query_as("SELECT status FROM admission_requests WHERE id = ?")
            .bind(&request_id)
            .fetch_optional(&mut *tx)
            .await?;
        match request {
            None => return Err(ApiError::not_found("Admission request")),
            Some((status,)) if status != RequestStatus::Approved.as_ref() => {
                return Err(ApiError::BadRequest(format!(
                    "Admission request is {}; only approved requests can be admitted",
                    status
                )));
            }
            Some(_) => {}
        }
    }

    let (id, mut insert) = admissions.insert_query(&record, &write_ctx);
    insert
        .build()
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(admissions.label(), e))?;

    let occupied = sqlx::query("UPDATE beds SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(BedStatus::Occupied.as_ref())
        .bind(write_ctx.timestamp())
        .bind(&bed_id)
        .bind(BedStatus::Available.as_ref())
        .execute(&mut *tx)
        .await?;
    if occupied.rows_affected() == 0 {
        return Err(ApiError::BadRequest("Bed is no longer available".to_string()));
    }

    tx.commit().await?;
    log::info!("🛏️ Patient {} admitted to bed {} ({})", patient_id, bed_id, id);

    let admission = admissions.get(&app_state.db_pool, &id).await?;
    Ok(ApiResponse::created(admission, "Patient admitted").into_response())
}

/// Ends an admission (discharged by default, or transferred / deceased) and frees the bed.
pub async fn discharge_patient(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::IPD_MANAGE)?;

    let id = path.into_inner();
    let write_ctx = app_state.write_context(&ctx);
    let outcome = match input.body.text("status") {
        None => AdmissionStatus::Discharged,
        Some(raw) => raw.to_lowercase().parse::<AdmissionStatus>().map_err(|_| {
            ApiError::BadRequest(format!("Invalid discharge status '{}'", raw))
        })?,
    };
    if outcome == AdmissionStatus::Admitted {
        return Err(ApiError::BadRequest(
            "Discharge status must be discharged, transferred or deceased".to_string(),
        ));
    }
    let discharge_date = match input.body.text("discharge_date") {
        None => write_ctx.timestamp(),
        Some(raw) => FieldValidator::datetime(&raw)
            .map(|d| d.format(TIMESTAMP_FORMAT).to_string())
            .ok_or_else(|| ApiError::BadRequest("Invalid discharge_date".to_string()))?,
    };

    let admissions = Admissions;
    let existing = admissions.get(&app_state.db_pool, &id).await?;
    let admitted_at = existing.text("admission_date").unwrap_or_default();
    if discharge_date < admitted_at {
        return Err(ApiError::BadRequest(
            "Discharge date cannot be before the admission date".to_string(),
        ));
    }

    let mut tx = app_state.db_pool.begin().await?;
    let updated = sqlx::query(
        "UPDATE ipd_admissions
         SET status = ?, discharge_date = ?, discharge_notes = COALESCE(?, discharge_notes), updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(outcome.as_ref())
    .bind(&discharge_date)
    .bind(input.body.text("discharge_notes"))
    .bind(write_ctx.timestamp())
    .bind(&id)
    .bind(AdmissionStatus::Admitted.as_ref())
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::BadRequest("Only admitted patients can be discharged".to_string()));
    }

    sqlx::query("UPDATE beds SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(BedStatus::Available.as_ref())
        .bind(write_ctx.timestamp())
        .bind(existing.text("bed_id"))
        .bind(BedStatus::Occupied.as_ref())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    log::info!("🏠 Admission {} closed as {}", id, outcome);

    let admission = admissions.get(&app_state.db_pool, &id).await?;
    Ok(ApiResponse::success_with_message(admission, "Patient discharged").into_response())
}

// ==================== ADMISSION REQUESTS ====================

async fn review_request(
    app_state: &AppState,
    ctx: &RequestContext,
    id: &str,
    body: &InputMap,
    decision: RequestStatus,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::IPD_APPROVE_ADMISSIONS)?;

    let requests = AdmissionRequests;
    let existing = requests.get(&app_state.db_pool, id).await?;
    let current = existing
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<RequestStatus>().ok())
        .unwrap_or(RequestStatus::Pending);
    if !current.next().contains(&decision) {
        log::warn!("🚫 Admission request {} is {}, cannot become {}", id, current, decision);
        return Err(ApiError::BadRequest(format!("Admission request is already {}", current)));
    }

    let notes = body.text("review_notes");
    if decision == RequestStatus::Rejected && notes.is_none() {
        return Err(ApiError::BadRequest(
            "A reason (review_notes) is required to reject an admission request".to_string(),
        ));
    }

    let write_ctx = app_state.write_context(ctx);
    let result = sqlx::query(
        "UPDATE admission_requests
         SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(decision.as_ref())
    .bind(ctx.user_id())
    .bind(write_ctx.timestamp())
    .bind(notes)
    .bind(write_ctx.timestamp())
    .bind(id)
    .bind(RequestStatus::Pending.as_ref())
    .execute(&app_state.db_pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::BadRequest("Admission request is no longer pending".to_string()));
    }

    log::info!("📝 Admission request {} {} by {}", id, decision, ctx.claims.username);
    let request = requests.get(&app_state.db_pool, id).await?;
    Ok(ApiResponse::success_with_message(request, format!("Admission request {}", decision)).into_response())
}

pub async fn approve_request(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    review_request(&app_state, &ctx, &path.into_inner(), &input.body, RequestStatus::Approved).await
}

pub async fn reject_request(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    review_request(&app_state, &ctx, &path.into_inner(), &input.body, RequestStatus::Rejected).await
}

// ==================== REPORTS ====================

pub fn occupancy_spec() -> ReportSpec {
    ReportSpec::new("ward_id")
        .label("ward_name")
        .query(
            MetricQuery::new("wards w LEFT JOIN beds b ON b.ward_id = w.id", GroupKey::labelled("w.id", "w.name"))
                .condition("w.is_active = 1", vec![])
                .metric(Metric::count_distinct("total_beds", "b.id"))
                .metric(Metric::count_where("occupied", "b.status = 'occupied'"))
                .metric(Metric::count_where("available", "b.status = 'available'")),
        )
        .derive(Derived::percent("occupancy_rate", "occupied", "total_beds"))
        .summarize(SummaryField::sum("total_beds", "total_beds", Cast::Int))
        .summarize(SummaryField::sum("occupied", "occupied", Cast::Int))
        .summarize(SummaryField::sum("available", "available", Cast::Int))
        .summarize(SummaryField::rate("occupancy_rate", "occupied", "total_beds"))
}

pub async fn occupancy_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::IPD_VIEW)?;
    serve_report(&app_state, &input, None, &[], "ipd-occupancy", |_| Ok(occupancy_spec())).await
}

pub async fn admissions_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::IPD_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["group_by", "ward_id"],
        "ipd-admissions",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Day)?;
            let admitted = MetricQuery::new("ipd_admissions", GroupKey::date("admission_date", bucket))
                .dated("admission_date")
                .metric(Metric::count("admissions").in_total());
            let discharged = MetricQuery::new("ipd_admissions", GroupKey::date("discharge_date", bucket))
                .dated("discharge_date")
                .condition("discharge_date IS NOT NULL", vec![])
                .metric(Metric::count("discharges").in_total())
                .metric(Metric::avg("avg_los", "julianday(discharge_date) - julianday(admission_date)"));

            Ok(ReportSpec::new(bucket.key_name())
                .query(with_exact(admitted, filter, "ward_id", "ward_id"))
                .query(with_exact(discharged, filter, "ward_id", "ward_id"))
                .total("total")
                .summarize(SummaryField::sum("total_admissions", "admissions", Cast::Int))
                .summarize(SummaryField::sum("total_discharges", "discharges", Cast::Int))
                .summarize(SummaryField::max("peak_admissions", "admissions", Cast::Int)))
        },
    )
    .await
}

// ==================== ROUTES ====================

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/ipd/reports/occupancy")
            .route(web::get().to(occupancy_report))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/ipd/reports/admissions")
            .route(web::get().to(admissions_report))
            .default_service(web::to(method_not_allowed)),
    );

    register::<Wards>(cfg, "/api/ipd/wards");
    register::<Beds>(cfg, "/api/ipd/beds");

    cfg.service(
        web::resource("/api/ipd/admissions")
            .route(web::get().to(crud_handlers::list::<Admissions>))
            .route(web::post().to(admit_patient))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/ipd/admissions/{id}")
            .route(web::get().to(crud_handlers::get::<Admissions>))
            .route(web::put().to(crud_handlers::update::<Admissions>))
            .route(web::patch().to(crud_handlers::update::<Admissions>))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/ipd/admissions/{id}/discharge")
            .route(web::post().to(discharge_patient))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/ipd/admission-requests/{id}/approve")
            .route(web::post().to(approve_request))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/ipd/admission-requests/{id}/reject")
            .route(web::post().to(reject_request))
            .default_service(web::to(method_not_allowed)),
    );

    register::<AdmissionRequests>(cfg, "/api/ipd/admission-requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::test_support::{bearer, body_json, test_state, TestState};
    use actix_web::{test, App};
    use serde_json::json;

    async fn bed_status(state: &TestState, bed: &str) -> String {
        let (status,): (String,) = sqlx::query_as("SELECT status FROM beds WHERE id = ?")
            .bind(bed)
            .fetch_one(&state.app.db_pool)
            .await
            .unwrap();
        status
    }

    #[actix_rt::test]
    async fn admission_occupies_and_discharge_frees_the_bed() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Nurse);

        let patient = state.insert_patient("Zawadi").await;
        let other = state.insert_patient("Jabari").await;
        let ward = state.insert_ward("Ward A").await;
        let bed = state.insert_bed(&ward, "A-1", "available").await;

        let req = test::TestRequest::post()
            .uri("/api/ipd/admissions")
            .insert_header(token.clone())
            .set_json(json!({ "patient_id": patient, "ward_id": ward, "bed_id": bed, "diagnosis": "Pneumonia" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], "admitted");
        assert_eq!(body["data"]["admission_date"], "2024-03-15 10:00:00");
        let admission = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(bed_status(&state, &bed).await, "occupied");

        let req = test::TestRequest::post()
            .uri("/api/ipd/admissions")
            .insert_header(token.clone())
            .set_json(json!({ "patient_id": other, "ward_id": ward, "bed_id": bed }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert!(body_json(resp).await["message"].as_str().unwrap().contains("not available"));

        let bed_uri = format!("/api/ipd/beds/{}", bed);
        let req = test::TestRequest::put()
            .uri(&bed_uri)
            .insert_header(token.clone())
            .set_json(json!({ "status": "available" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
        assert_eq!(bed_status(&state, &bed).await, "occupied");

        let req = test::TestRequest::put()
            .uri(&bed_uri)
            .insert_header(token.clone())
            .set_json(json!({ "notes": "Near window" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admissions/{}/discharge", admission))
            .insert_header(token.clone())
            .set_json(json!({ "discharge_notes": "Stable" }))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["status"], "discharged");
        assert_eq!(body["data"]["discharge_notes"], "Stable");
        assert_eq!(bed_status(&state, &bed).await, "available");

        let req = test::TestRequest::put()
            .uri(&bed_uri)
            .insert_header(token.clone())
            .set_json(json!({ "status": "maintenance" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
        assert_eq!(bed_status(&state, &bed).await, "maintenance");

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admissions/{}/discharge", admission))
            .insert_header(token.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/ipd/admissions/{}", admission))
            .insert_header(token)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 405);
    }

    #[actix_rt::test]
    async fn bed_must_belong_to_the_ward() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let patient = state.insert_patient("Imani").await;
        let ward_a = state.insert_ward("Ward A").await;
        let ward_b = state.insert_ward("Ward B").await;
        let bed = state.insert_bed(&ward_b, "B-1", "available").await;

        let req = test::TestRequest::post()
            .uri("/api/ipd/admissions")
            .insert_header(bearer(&state, UserRole::Nurse))
            .set_json(json!({ "patient_id": patient, "ward_id": ward_a, "bed_id": bed }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ipd_admissions")
            .fetch_one(&state.app.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(bed_status(&state, &bed).await, "available");
    }

    #[actix_rt::test]
    async fn admission_requests_are_reviewed_once() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;

        let patient = state.insert_patient("Baraka").await;
        let ward = state.insert_ward("Surgical").await;
        let req = test::TestRequest::post()
            .uri("/api/ipd/admission-requests")
            .insert_header(bearer(&state, UserRole::Nurse))
            .set_json(json!({ "patient_id": patient, "ward_id": ward, "reason": "Post-op observation" }))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["status"], "pending");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admission-requests/{}/approve", id))
            .insert_header(bearer(&state, UserRole::Nurse))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admission-requests/{}/reject", id))
            .insert_header(bearer(&state, UserRole::Doctor))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admission-requests/{}/approve", id))
            .insert_header(bearer(&state, UserRole::Doctor))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["status"], "approved");
        assert_eq!(body["data"]["reviewed_by"], state.user_id(UserRole::Doctor));
        assert_eq!(body["data"]["reviewed_at"], "2024-03-15 10:00:00");

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admission-requests/{}/reject", id))
            .insert_header(bearer(&state, UserRole::Doctor))
            .set_json(json!({ "review_notes": "Changed my mind" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(body_json(resp).await["message"], "Admission request is already approved");
    }

    #[actix_rt::test]
    async fn occupancy_and_admissions_reports() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Nurse);

        let patient = state.insert_patient("Halima").await;
        let ward = state.insert_ward("Maternity").await;
        let bed = state.insert_bed(&ward, "M-1", "available").await;
        state.insert_bed(&ward, "M-2", "available").await;

        let req = test::TestRequest::post()
            .uri("/api/ipd/admissions")
            .insert_header(token.clone())
            .set_json(json!({
                "patient_id": patient,
                "ward_id": ward,
                "bed_id": bed,
                "admission_date": "2024-03-10 08:00:00"
            }))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let admission = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/ipd/reports/occupancy")
            .insert_header(token.clone())
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["data"][0]["ward_name"], "Maternity");
        assert_eq!(body["data"]["data"][0]["total_beds"], 2);
        assert_eq!(body["data"]["data"][0]["occupancy_rate"], 50.0);
        assert_eq!(body["data"]["summary"]["occupancy_rate"], 50.0);

        let req = test::TestRequest::post()
            .uri(&format!("/api/ipd/admissions/{}/discharge", admission))
            .insert_header(token.clone())
            .set_json(json!({ "discharge_date": "2024-03-13 08:00:00" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::get()
            .uri("/api/ipd/reports/admissions?date_from=2024-03-01")
            .insert_header(token)
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["date"], "2024-03-10");
        assert_eq!(rows[0]["admissions"], 1);
        assert_eq!(rows[0]["discharges"], 0);
        assert_eq!(rows[1]["avg_los"], 3.0);
        assert_eq!(body["data"]["summary"]["total_discharges"], 1);
        assert_eq!(body["data"]["period"]["date_to"], "2024-03-15");
    }
}
