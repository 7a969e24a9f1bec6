// src/support_handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::aggregate::{Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField};
use crate::auth::{permissions, RequestContext};
use crate::crud_handlers::register;
use crate::error::ApiResult;
use crate::handlers::method_not_allowed;
use crate::input::RequestInput;
use crate::models::SupportTickets;
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::AppState;

const LIVE_TICKETS: &str = "deleted_at IS NULL";

/// Tickets opened against tickets resolved in each bucket.
pub async fn tickets_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::SUPPORT_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["group_by", "category"],
        "support-tickets",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Day)?;
            let created = MetricQuery::new("support_tickets", GroupKey::date("created_at", bucket))
                .dated("created_at")
                .condition(LIVE_TICKETS, vec![])
                .metric(Metric::count("created").in_total());
            let resolved = MetricQuery::new("support_tickets", GroupKey::date("resolved_at", bucket))
                .dated("resolved_at")
                .condition(LIVE_TICKETS, vec![])
                .condition("resolved_at IS NOT NULL", vec![])
                .metric(Metric::count("resolved").in_total());

            Ok(ReportSpec::new(bucket.key_name())
                .query(with_exact(created, filter, "category", "category"))
                .query(with_exact(resolved, filter, "category", "category"))
                .total("total")
                .derive(Derived::percent("resolution_rate", "resolved", "created"))
                .summarize(SummaryField::sum("total_created", "created", Cast::Int))
                .summarize(SummaryField::sum("total_resolved", "resolved", Cast::Int))
                .summarize(SummaryField::rate("resolution_rate", "resolved", "created")))
        },
    )
    .await
}

pub async fn by_priority_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::SUPPORT_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::LastDays(30)),
        &["category"],
        "support-priority",
        |filter| {
            let query = MetricQuery::new("support_tickets", GroupKey::column("priority"))
                .dated("created_at")
                .condition(LIVE_TICKETS, vec![])
                .metric(Metric::count("tickets"))
                .metric(Metric::count_where("open", "status IN ('open', 'in-progress')"));

            Ok(ReportSpec::new("priority")
                .query(with_exact(query, filter, "category", "category"))
                .derive(Derived::share("share", "tickets"))
                .summarize(SummaryField::sum("total_tickets", "tickets", Cast::Int))
                .summarize(SummaryField::sum("total_open", "open", Cast::Int)))
        },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/support/reports")
            .service(
                web::resource("/tickets")
                    .route(web::get().to(tickets_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/by-priority")
                    .route(web::get().to(by_priority_report))
                    .default_service(web::to(method_not_allowed)),
            ),
    );

    register::<SupportTickets>(cfg, "/api/support/tickets");
}
