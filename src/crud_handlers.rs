// src/crud_handlers.rs
//! Generic HTTP handlers over any `Resource`: list, get, create, update, delete.

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::auth::RequestContext;
use crate::error::ApiResult;
use crate::handlers::{method_not_allowed, ApiResponse};
use crate::input::RequestInput;
use crate::repositories::Resource;
use crate::AppState;

pub async fn list<R: Resource>(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    let resource = R::default();
    ctx.require_permission(resource.view_permission())?;

    let filter = app_state
        .filter_builder()
        .build(&input.query, resource.filter_fields())?;
    let items = resource.list(&app_state.db_pool, &filter).await?;
    Ok(ApiResponse::success(items).into_response())
}

pub async fn get<R: Resource>(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let resource = R::default();
    ctx.require_permission(resource.view_permission())?;

    let item = resource.get(&app_state.db_pool, &path.into_inner()).await?;
    Ok(ApiResponse::success(item).into_response())
}

pub async fn create<R: Resource>(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    let resource = R::default();
    ctx.require_permission(resource.manage_permission())?;

    let write_ctx = app_state.write_context(&ctx);
    let item = resource.create(&app_state.db_pool, &input.body, &write_ctx).await?;
    Ok(ApiResponse::created(item, format!("{} created", resource.label())).into_response())
}

pub async fn update<R: Resource>(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    let resource = R::default();
    ctx.require_permission(resource.manage_permission())?;

    let write_ctx = app_state.write_context(&ctx);
    let item = resource
        .update(&app_state.db_pool, &path.into_inner(), &input.body, &write_ctx)
        .await?;
    Ok(ApiResponse::success_with_message(item, format!("{} updated", resource.label())).into_response())
}

pub async fn delete<R: Resource>(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let resource = R::default();
    ctx.require_permission(resource.manage_permission())?;

    let write_ctx = app_state.write_context(&ctx);
    resource.delete(&app_state.db_pool, &path.into_inner(), &write_ctx).await?;
    Ok(ApiResponse::message(format!("{} deleted", resource.label())).into_response())
}

/// Mounts the full CRUD surface for `R` at `path` and `path/{id}`; other methods get 405.
pub fn register<R: Resource>(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(
        web::resource(path)
            .route(web::get().to(list::<R>))
            .route(web::post().to(create::<R>))
            .default_service(web::to(method_not_allowed)),
    )
    .service(item_resource::<R>(path));
}

/// `path/{id}` with get, put, patch and delete.
pub fn item_resource<R: Resource>(path: &str) -> actix_web::Resource {
    web::resource(format!("{}/{{id}}", path))
        .route(web::get().to(get::<R>))
        .route(web::put().to(update::<R>))
        .route(web::patch().to(update::<R>))
        .route(web::delete().to(delete::<R>))
        .default_service(web::to(method_not_allowed))
}
