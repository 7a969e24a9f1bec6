// src/laboratory_handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::aggregate::{
    AggExpr, Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField,
};
use crate::auth::{permissions, RequestContext};
use crate::crud_handlers::register;
use crate::error::ApiResult;
use crate::handlers::method_not_allowed;
use crate::input::RequestInput;
use crate::models::{LabOrders, LabTests};
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::AppState;

const TURNAROUND_HOURS: &str = "(julianday(o.completed_at) - julianday(o.ordered_at)) * 24";

pub async fn orders_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::LABORATORY_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["group_by", "priority"],
        "lab-orders",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Day)?;
            let query = MetricQuery::new("lab_orders", GroupKey::date("ordered_at", bucket))
                .dated("ordered_at")
                .metric(Metric::count("ordered"))
                .metric(Metric::count_where("completed", "status = 'completed'"))
                .metric(Metric::count_where("cancelled", "status = 'cancelled'"))
                .metric(Metric::count_where("critical_results", "result_flag = 'critical'"));

            Ok(ReportSpec::new(bucket.key_name())
                .query(with_exact(query, filter, "priority", "priority"))
                .derive(Derived::percent("completion_rate", "completed", "ordered"))
                .summarize(SummaryField::sum("total_ordered", "ordered", Cast::Int))
                .summarize(SummaryField::sum("total_completed", "completed", Cast::Int))
                .summarize(SummaryField::rate("completion_rate", "completed", "ordered")))
        },
    )
    .await
}

/// Completed orders per test against the catalog's target turnaround.
pub async fn turnaround_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::LABORATORY_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["category"],
        "lab-turnaround",
        |filter| {
            let query = MetricQuery::new(
                "lab_orders o JOIN lab_tests t ON t.id = o.test_id",
                GroupKey::labelled("o.test_id", "t.name"),
            )
            .dated("o.ordered_at")
            .condition("o.status = 'completed' AND o.completed_at IS NOT NULL", vec![])
            .metric(Metric::count("completed"))
            .metric(Metric::avg("avg_turnaround_hours", TURNAROUND_HOURS))
            .metric(Metric::new("target_hours", AggExpr::Max("t.turnaround_hours".to_string()), Cast::Int))
            .metric(Metric::count_where(
                "within_target",
                &format!("t.turnaround_hours IS NULL OR {} <= t.turnaround_hours", TURNAROUND_HOURS),
            ));

            Ok(ReportSpec::new("test_id")
                .label("test_name")
                .query(with_exact(query, filter, "category", "t.category"))
                .derive(Derived::percent("on_time_rate", "within_target", "completed"))
                .summarize(SummaryField::sum("total_completed", "completed", Cast::Int))
                .summarize(SummaryField::rate("on_time_rate", "within_target", "completed"))
                .summarize(SummaryField::max("slowest_avg_hours", "avg_turnaround_hours", Cast::Decimal1)))
        },
    )
    .await
}

pub async fn top_tests_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::LABORATORY_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(90)),
        &[],
        "lab-top-tests",
        |filter| {
            let query = MetricQuery::new(
                "lab_orders o JOIN lab_tests t ON t.id = o.test_id",
                GroupKey::labelled("o.test_id", "t.name"),
            )
            .dated("o.ordered_at")
            .condition("o.status != 'cancelled'", vec![])
            .metric(Metric::count("orders"))
            .metric(Metric::count_distinct("patients", "o.patient_id"))
            .metric(Metric::sum("revenue", "t.price", Cast::Money));

            Ok(ReportSpec::new("test_id")
                .label("test_name")
                .query(query)
                .derive(Derived::share("share", "orders"))
                .ranked("orders", filter.limit.unwrap_or(10) as usize)
                .summarize(SummaryField::sum("total_orders", "orders", Cast::Int))
                .summarize(SummaryField::sum("total_revenue", "revenue", Cast::Money)))
        },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/laboratory/reports")
            .service(
                web::resource("/orders")
                    .route(web::get().to(orders_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/turnaround")
                    .route(web::get().to(turnaround_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/top-tests")
                    .route(web::get().to(top_tests_report))
                    .default_service(web::to(method_not_allowed)),
            ),
    );

    register::<LabTests>(cfg, "/api/laboratory/tests");
    register::<LabOrders>(cfg, "/api/laboratory/orders");
}
