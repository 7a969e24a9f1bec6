// src/template_handlers.rs
//! Message templates and placeholder rendering. Rendering is a preview only; nothing is sent.

use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{permissions, RequestContext};
use crate::crud_handlers::register;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{method_not_allowed, ApiResponse};
use crate::input::{InputMap, InputMapExt, RequestInput};
use crate::models::MessageTemplates;
use crate::repositories::Resource;
use crate::validator::{render_placeholders, template_placeholders};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RenderedTemplate {
    pub template_id: String,
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
    pub placeholders: Vec<String>,
    pub missing: Vec<String>,
}

/// Variables come from a `variables` object when present, otherwise from the top-level body.
fn variables(body: &InputMap) -> InputMap {
    match body.get("variables") {
        Some(Value::Object(map)) => map.clone(),
        _ => body.clone(),
    }
}

fn variable_text(vars: &InputMap, name: &str) -> Option<String> {
    match vars.get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn render_template(id: &str, template: &InputMap, vars: &InputMap) -> RenderedTemplate {
    let body = template.text("body").unwrap_or_default();
    let subject = template.text("subject");

    let mut placeholders = template_placeholders(&body);
    if let Some(subject) = &subject {
        for name in template_placeholders(subject) {
            if !placeholders.contains(&name) {
                placeholders.push(name);
            }
        }
    }
    let missing = placeholders
        .iter()
        .filter(|name| variable_text(vars, name).is_none())
        .cloned()
        .collect();

    let lookup = |name: &str| variable_text(vars, name);
    RenderedTemplate {
        template_id: id.to_string(),
        channel: template.text("channel").unwrap_or_default(),
        subject: subject.map(|s| render_placeholders(&s, lookup)),
        body: render_placeholders(&body, lookup),
        placeholders,
        missing,
    }
}

pub async fn render(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
    path: web::Path<String>,
    input: RequestInput,
) -> ApiResult<HttpResponse> {
    let templates = MessageTemplates;
    ctx.require_permission(templates.view_permission())?;

    let id = path.into_inner();
    let template = templates.get(&app_state.db_pool, &id).await?;
    if template.get("is_active").and_then(Value::as_bool) == Some(false) {
        return Err(ApiError::BadRequest("Template is inactive".to_string()));
    }

    let rendered = render_template(&id, &template, &variables(&input.body));
    let message = if rendered.missing.is_empty() {
        "Template rendered".to_string()
    } else {
        log::warn!("Template {} rendered without: {}", id, rendered.missing.join(", "));
        format!("Template rendered with missing variables: {}", rendered.missing.join(", "))
    };
    Ok(ApiResponse::success_with_message(rendered, message).into_response())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/message-templates/{id}/render")
            .route(web::post().to(render))
            .default_service(web::to(method_not_allowed)),
    );

    register::<MessageTemplates>(cfg, "/api/message-templates");
}
