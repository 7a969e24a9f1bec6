// src/pharmacy_handlers.rs
//! Pharmacy catalogue, stock batches and expense tracking, with their reports.

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::aggregate::{
    AggExpr, Bucket, Cast, Derived, GroupKey, Metric, MetricQuery, ReportSpec, SummaryField,
};
use crate::auth::{permissions, RequestContext};
use crate::clock::format_date;
use crate::crud_handlers::register;
use crate::error::ApiResult;
use crate::handlers::method_not_allowed;
use crate::input::RequestInput;
use crate::models::{ExpenseCategories, Expenses, PharmacyItems, StockBatches};
use crate::query_builders::DateWindow;
use crate::report_handlers::{serve_report, with_exact};
use crate::AppState;

/// Stock on hand per active item. Expired batches are excluded from quantities and values.
pub async fn stock_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::PHARMACY_VIEW)?;

    let today = format_date(app_state.clock.today());
    let from = format!(
        "pharmacy_items i LEFT JOIN stock_batches b ON b.item_id = i.id \
         AND (b.expiry_date IS NULL OR date(b.expiry_date) >= '{}')",
        today
    );

    serve_report(&app_state, &input, None, &["category"], "pharmacy-stock", |filter| {
        let query = MetricQuery::new(&from, GroupKey::labelled("i.id", "i.name"))
            .condition("i.is_active = 1", vec![])
            .metric(Metric::count_distinct("batches", "b.id"))
            .metric(Metric::sum("quantity", "b.quantity", Cast::Int))
            .metric(Metric::sum("stock_value", "b.quantity * b.cost_price", Cast::Money))
            .metric(Metric::sum("retail_value", "b.quantity * b.selling_price", Cast::Money))
            .metric(Metric::new("reorder_level", AggExpr::Max("i.reorder_level".to_string()), Cast::Int));

        Ok(ReportSpec::new("item_id")
            .label("item_name")
            .query(with_exact(query, filter, "category", "i.category"))
            .derive(Derived::difference("potential_margin", "retail_value", "stock_value"))
            .summarize(SummaryField::count("items"))
            .summarize(SummaryField::sum("total_quantity", "quantity", Cast::Int))
            .summarize(SummaryField::sum("total_stock_value", "stock_value", Cast::Money))
            .summarize(SummaryField::sum("total_retail_value", "retail_value", Cast::Money)))
    })
    .await
}

/// Batches with stock left, bucketed by the month they expire.
pub async fn expiry_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::PHARMACY_VIEW)?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::NextDays(90)),
        &["group_by", "item_id"],
        "pharmacy-expiry",
        |filter| {
            let bucket = Bucket::from_filter(filter, Bucket::Month)?;
            let query = MetricQuery::new("stock_batches", GroupKey::date("expiry_date", bucket))
                .dated("expiry_date")
                .condition("quantity > 0", vec![])
                .metric(Metric::count("batches"))
                .metric(Metric::sum("quantity", "quantity", Cast::Int))
                .metric(Metric::sum("stock_value", "quantity * cost_price", Cast::Money));

            Ok(ReportSpec::new(bucket.key_name())
                .query(with_exact(query, filter, "item_id", "item_id"))
                .summarize(SummaryField::sum("total_batches", "batches", Cast::Int))
                .summarize(SummaryField::sum("total_quantity", "quantity", Cast::Int))
                .summarize(SummaryField::sum("total_stock_value", "stock_value", Cast::Money)))
        },
    )
    .await
}

/// Expenses by date bucket, or by category with `group_by=category`.
pub async fn expenses_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    ctx.require_any_permission(&[permissions::EXPENSES_VIEW, permissions::FINANCIAL_REPORTS])?;

    serve_report(
        &app_state,
        &input,
        Some(DateWindow::MonthToDate),
        &["group_by", "category_id", "payment_method"],
        "expenses",
        |filter| {
            let by_category = filter.get("group_by") == Some("category");
            let (key, spec) = if by_category {
                (
                    GroupKey::labelled("e.category_id", "c.name"),
                    ReportSpec::new("category_id").label("category_name"),
                )
            } else {
                let bucket = Bucket::from_filter(filter, Bucket::Day)?;
                (GroupKey::date("e.expense_date", bucket), ReportSpec::new(bucket.key_name()))
            };

            let query = MetricQuery::new("expenses e JOIN expense_categories c ON c.id = e.category_id", key)
                .dated("e.expense_date")
                .metric(Metric::count("expenses"))
                .metric(Metric::sum("amount", "e.amount", Cast::Money));
            let query = with_exact(query, filter, "category_id", "e.category_id");
            let query = with_exact(query, filter, "payment_method", "e.payment_method");

            Ok(spec
                .query(query)
                .derive(Derived::share("share", "amount"))
                .summarize(SummaryField::sum("total_expenses", "expenses", Cast::Int))
                .summarize(SummaryField::sum("total_amount", "amount", Cast::Money))
                .summarize(SummaryField::max("largest_bucket", "amount", Cast::Money)))
        },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/pharmacy/reports")
            .service(
                web::resource("/stock")
                    .route(web::get().to(stock_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/expiry")
                    .route(web::get().to(expiry_report))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/expenses")
                    .route(web::get().to(expenses_report))
                    .default_service(web::to(method_not_allowed)),
            ),
    );

    register::<PharmacyItems>(cfg, "/api/pharmacy/items");
    register::<StockBatches>(cfg, "/api/pharmacy/stock-batches");
    register::<ExpenseCategories>(cfg, "/api/pharmacy/expense-categories");
    register::<Expenses>(cfg, "/api/pharmacy/expenses");
}
