// src/payment_handlers.rs
//! Bills, payment recording against a bill's balance, and revenue reports.

use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;

use crate::aggregate::{Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField};
use crate::auth::{permissions, RequestContext};
use crate::crud_handlers::{self, register};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{method_not_allowed, ApiResponse};
use crate::input::{InputMapExt, RequestInput};
use crate::models::{BillStatus, Bills, Payments};
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::repositories::{number, write_error, Resource};
use crate::AppState;

/// Amounts within half a cent of the balance count as settling it.
const BALANCE_TOLERANCE: f64 = 0.005;

// ==================== PAYMENTS ====================

/// Records a payment and moves the bill's paid amount and status in one transaction.
pub async fn record_payment(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::PAYMENTS_MANAGE)?;

    let payments = Payments;
    let write_ctx = app_state.write_context(&ctx);
    let record = payments.prepare_create(&input.body, &write_ctx)?;
    let bill_id = record.text("bill_id").unwrap_or_default();
    let amount = number(&record, "amount").unwrap_or(0.0);

    let mut tx = app_state.db_pool.begin().await?;

    let bill: Option<(f64, f64, String)> =
        sqlx::query_as("SELECT total_amount, paid_amount, status FROM bills WHERE id = ?")
            .bind(&bill_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (total, paid, status) = bill.ok_or_else(|| ApiError::not_found("Bill"))?;
    if status == BillStatus::Cancelled.as_ref() {
        return Err(ApiError::BadRequest(
            "Cannot record a payment against a cancelled bill".to_string(),
        ));
    }
    let outstanding = total - paid;
    if amount > outstanding + BALANCE_TOLERANCE {
        log::warn!("🚫 Payment of {:.2} on bill {} exceeds balance {:.2}", amount, bill_id, outstanding);
        return Err(ApiError::BadRequest(format!(
            "Payment exceeds outstanding balance of {:.2}",
            outstanding
        )));
    }

    let (id, mut insert) = payments.insert_query(&record, &write_ctx);
    insert
        .build()
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(payments.label(), e))?;

    let next_status = BillStatus::for_balance(paid + amount, total);
    let updated = sqlx::query(
        "UPDATE bills SET paid_amount = paid_amount + ?, status = ?, updated_at = ?
         WHERE id = ? AND status != ? AND paid_amount = ? AND paid_amount + ? <= total_amount + ?",
    )
    .bind(amount)
    .bind(next_status.as_ref())
    .bind(write_ctx.timestamp())
    .bind(&bill_id)
    .bind(BillStatus::Cancelled.as_ref())
    .bind(paid)
    .bind(amount)
    .bind(BALANCE_TOLERANCE)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::BadRequest(
            "Bill balance changed while recording the payment; please retry".to_string(),
        ));
    }

    tx.commit().await?;
    log::info!("💰 Payment {} of {:.2} recorded on bill {} ({})", id, amount, bill_id, next_status);

    let payment = payments.get(&app_state.db_pool, &id).await?;
    let bill = Bills.get(&app_state.db_pool, &bill_id).await?;
    Ok(ApiResponse::created(json!({ "payment": payment, "bill": bill }), "Payment recorded").into_response())
}

// ==================== REPORTS ====================

pub async fn revenue_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::FINANCIAL_REPORTS)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["group_by"],
        "revenue",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Day)?;
            let mut query = MetricQuery::new("payments", GroupKey::date("paid_at", bucket))
                .dated("paid_at")
                .metric(Metric::count("payments"));
            for (field, method) in [
                ("cash", "cash"),
                ("card", "card"),
                ("insurance", "insurance"),
                ("mobile_money", "mobile-money"),
                ("bank_transfer", "bank-transfer"),
            ] {
                query = query.metric(
                    Metric::sum_where(field, "amount", &format!("payment_method = '{}'", method), Cast::Money)
                        .in_total(),
                );
            }

            Ok(ReportSpec::new(bucket.key_name())
                .query(query)
                .money_total("total")
                .summarize(SummaryField::sum("total_revenue", "total", Cast::Money))
                .summarize(SummaryField::sum("total_payments", "payments", Cast::Int))
                .summarize(SummaryField::avg("average_per_period", "total"))
                .summarize(SummaryField::max("best_period", "total", Cast::Money)))
        },
    )
    .await
}

pub fn net_income_spec(bucket: Bucket) -> ReportSpec {
    ReportSpec::new(bucket.key_name())
        .query(
            MetricQuery::new("payments", GroupKey::date("paid_at", bucket))
                .dated("paid_at")
                .metric(Metric::sum("revenue", "amount", Cast::Money)),
        )
        .query(
            MetricQuery::new("expenses", GroupKey::date("expense_date", bucket))
                .dated("expense_date")
                .metric(Metric::sum("expenses", "amount", Cast::Money)),
        )
        .derive(Derived::difference("net", "revenue", "expenses"))
        .summarize(SummaryField::sum("total_revenue", "revenue", Cast::Money))
        .summarize(SummaryField::sum("total_expenses", "expenses", Cast::Money))
        .summarize(SummaryField::sum("net_income", "net", Cast::Money))
        .summarize(SummaryField::rate("profit_margin", "net", "revenue"))
}

pub async fn net_income_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::FINANCIAL_REPORTS)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(365)),
        &["group_by"],
        "net-income",
        |filter| Ok(net_income_spec(Bucket::from_filter(filter, Bucket::Month)?)),
    )
    .await
}

/// Balances still owed, per bill status. Cancelled bills are left out.
pub async fn outstanding_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_any_permission(&[permissions::FINANCIAL_REPORTS, permissions::PAYMENTS_VIEW])?;

    serve_report(&app_state, &input, None, &["insurance_id"], "outstanding", |filter| {
        let query = MetricQuery::new("bills", GroupKey::column("status"))
            .dated("created_at")
            .condition("status != 'cancelled'", vec![])
            .metric(Metric::count("bills"))
            .metric(Metric::sum("billed", "total_amount", Cast::Money))
            .metric(Metric::sum("paid", "paid_amount", Cast::Money))
            .metric(Metric::sum("outstanding", "total_amount - paid_amount", Cast::Money));

        Ok(ReportSpec::new("status")
            .query(with_exact(query, filter, "insurance_id", "insurance_id"))
            .derive(Derived::share("share_of_outstanding", "outstanding"))
            .summarize(SummaryField::sum("total_bills", "bills", Cast::Int))
            .summarize(SummaryField::sum("total_billed", "billed", Cast::Money))
            .summarize(SummaryField::sum("total_outstanding", "outstanding", Cast::Money))
            .summarize(SummaryField::rate("collection_rate", "paid", "billed")))
    })
    .await
}

// ==================== ROUTES ====================

/// `/api/payments/bills` and the report paths go first so `/api/payments/{id}` cannot shadow them.
pub fn configure(cfg: &mut web::ServiceConfig) {
    register::<Bills>(cfg, "/api/payments/bills");

    cfg.service(
        web::scope("/api/payments/reports")
            .service(
                web::resource("/revenue")
                    .route(web::get().to(revenue_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/net-income")
                    .route(web::get().to(net_income_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/outstanding")
                    .route(web::get().to(outstanding_report))
                    .default_service(web::to(method_not_allowed)),
            ),
    )
    .service(
        web::resource("/api/payments")
            .route(web::get().to(crud_handlers::list::<Payments>))
            .route(web::post().to(record_payment))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/payments/{id}")
            .route(web::get().to(crud_handlers::get::<Payments>))
            .default_service(web::to(method_not_allowed)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::test_support::{bearer, body_json, test_state};
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn payments_move_bill_balance_and_cannot_overpay() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Receptionist);

        let patient = state.insert_patient("Mosi").await;
        let bill = state.insert_bill(&patient, 100.0).await;

        let pay = |amount: f64| {
            test::TestRequest::post()
                .uri("/api/payments")
                .insert_header(token.clone())
                .set_json(json!({ "bill_id": bill, "amount": amount, "payment_method": "mobile_money" }))
                .to_request()
        };

        let resp = test::call_service(&app, pay(40.0)).await;
        assert_eq!(resp.status(), 201);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["payment"]["payment_method"], "mobile-money");
        assert_eq!(body["data"]["payment"]["paid_at"], "2024-03-15 10:00:00");
        assert_eq!(body["data"]["bill"]["status"], "partial");
        assert_eq!(body["data"]["bill"]["paid_amount"], 40.0);
        let payment_id = body["data"]["payment"]["id"].as_str().unwrap().to_string();

        let resp = test::call_service(&app, pay(70.0)).await;
        assert_eq!(resp.status(), 400);
        assert!(body_json(resp).await["message"].as_str().unwrap().contains("outstanding balance"));

        let body = body_json(test::call_service(&app, pay(60.0)).await).await;
        assert_eq!(body["data"]["bill"]["status"], "paid");

        assert_eq!(test::call_service(&app, pay(1.0)).await.status(), 400);
        assert_eq!(test::call_service(&app, pay(0.0)).await.status(), 400);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments")
            .fetch_one(&state.app.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/payments/{}", payment_id))
            .insert_header(token.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 405);

        let req = test::TestRequest::get()
            .uri("/api/payments/bills")
            .insert_header(token)
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn bill_status_cannot_contradict_the_balance() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Accountant);
        let patient = state.insert_patient("Zawadi").await;
        let bill = state.insert_bill(&patient, 100.0).await;
        let uri = format!("/api/payments/bills/{}", bill);

        let req = test::TestRequest::put()
            .uri(&uri)
            .insert_header(token.clone())
            .set_json(json!({ "status": "paid" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri("/api/payments")
            .insert_header(token.clone())
            .set_json(json!({ "bill_id": bill, "amount": 100, "payment_method": "cash" }))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["bill"]["status"], "paid");

        let req = test::TestRequest::put()
            .uri(&uri)
            .insert_header(token.clone())
            .set_json(json!({ "total_amount": 160 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], "partial");
        assert_eq!(body["data"]["paid_amount"], 100.0);

        let req = test::TestRequest::put()
            .uri(&uri)
            .insert_header(token.clone())
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let unpaid = state.insert_bill(&patient, 40.0).await;
        let req = test::TestRequest::put()
            .uri(&format!("/api/payments/bills/{}", unpaid))
            .insert_header(token)
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["status"], "cancelled");
    }

    #[actix_rt::test]
    async fn cancelled_bills_take_no_payments() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let patient = state.insert_patient("Nia").await;
        let bill = state.insert_bill(&patient, 80.0).await;
        sqlx::query("UPDATE bills SET status = 'cancelled' WHERE id = ?")
            .bind(&bill)
            .execute(&state.app.db_pool)
            .await
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/api/payments")
            .insert_header(bearer(&state, UserRole::Accountant))
            .set_json(json!({ "bill_id": bill, "amount": 10, "payment_method": "cash" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri("/api/payments")
            .insert_header(bearer(&state, UserRole::Accountant))
            .set_json(json!({ "bill_id": "missing", "amount": 10, "payment_method": "cash" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_rt::test]
    async fn revenue_splits_by_method_and_net_income_merges_expenses() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(configure)).await;
        let token = bearer(&state, UserRole::Accountant);

        let patient = state.insert_patient("Zuri").await;
        let bill = state.insert_bill(&patient, 1000.0).await;
        state.insert_payment(&bill, 100.0, "cash", "2024-03-10 09:00:00").await;
        state.insert_payment(&bill, 50.5, "mobile-money", "2024-03-10 15:00:00").await;
        state.insert_payment(&bill, 200.0, "card", "2024-01-20 12:00:00").await;
        let category = state.insert_expense_category("Supplies").await;
        state
            .create_id::<crate::models::Expenses>(json!({
                "category_id": category,
                "amount": 80,
                "expense_date": "2024-02-05"
            }))
            .await;

        let req = test::TestRequest::get()
            .uri("/api/payments/reports/revenue")
            .insert_header(token.clone())
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["date"], "2024-03-10");
        assert_eq!(rows[0]["cash"], 100.0);
        assert_eq!(rows[0]["mobile_money"], 50.5);
        assert_eq!(rows[0]["card"], 0.0);
        assert_eq!(rows[0]["payments"], 2);
        assert_eq!(rows[0]["total"], 150.5);

        let req = test::TestRequest::get()
            .uri("/api/payments/reports/net-income")
            .insert_header(token.clone())
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let rows = body["data"]["data"].as_array().unwrap();
        let months: Vec<&str> = rows.iter().map(|r| r["month"].as_str().unwrap()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(rows[1]["revenue"], 0.0);
        assert_eq!(rows[1]["net"], -80.0);
        assert_eq!(body["data"]["summary"]["net_income"], 270.5);

        let req = test::TestRequest::get()
            .uri("/api/payments/reports/outstanding")
            .insert_header(bearer(&state, UserRole::Receptionist))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["data"][0]["status"], "unpaid");
        assert_eq!(body["data"]["data"][0]["outstanding"], 1000.0);

        let req = test::TestRequest::get()
            .uri("/api/payments/reports/revenue")
            .insert_header(bearer(&state, UserRole::Receptionist))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);
    }
}
