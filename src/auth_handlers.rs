// src/auth_handlers.rs
use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

use crate::auth::{
    permissions, AuthService, ChangePasswordRequest, CreateUserRequest, LoginRequest, LoginResponse,
    RequestContext, User, UserInfo, UserRole,
};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: UserInfo,
    pub role_name: &'static str,
    pub permissions: &'static [&'static str],
}

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let now = app_state.clock.now();
    let invalid = || ApiError::AuthError("Invalid username or password".to_string());

    let mut user = User::find_by_username(&app_state.db_pool, &request.username)
        .await?
        .ok_or_else(invalid)?;

    if !user.is_active {
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }
    if user.is_locked(now) {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        let auth = &app_state.config.auth;
        user.record_failed_login(
            &app_state.db_pool,
            now,
            auth.max_login_attempts,
            auth.lockout_duration_minutes,
        )
        .await?;
        log::warn!("🔒 Failed login for {} ({} attempts)", user.username, user.failed_login_attempts);

        if user.locked_until.is_some() {
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                auth.lockout_duration_minutes
            )));
        }
        return Err(invalid());
    }

    user.record_login(&app_state.db_pool, now).await?;
    let token = auth_service.generate_token(&user.id, &user.username, user.get_role())?;

    log::info!("🔑 User {} logged in", user.username);
    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime_seconds(),
        user: user.into(),
    };
    Ok(ApiResponse::success_with_message(response, "Login successful").into_response())
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<HttpResponse> {
    let user = User::find_by_id(&app_state.db_pool, ctx.user_id()).await?;
    let role = user.get_role();
    Ok(ApiResponse::success(ProfileResponse {
        user: user.into(),
        role_name: role.display_name(),
        permissions: role.permissions(),
    })
    .into_response())
}

pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    ctx: RequestContext,
    request: web::Json<ChangePasswordRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let user = User::find_by_id(&app_state.db_pool, ctx.user_id()).await?;
    user.change_password(
        &app_state.db_pool,
        &request.current_password,
        &request.new_password,
        &auth_service,
        app_state.clock.now(),
    )
    .await?;

    log::info!("🔑 Password changed for {}", user.username);
    Ok(ApiResponse::<()>::message("Password changed successfully").into_response())
}

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::USERS_MANAGE)?;

    let users: Vec<UserInfo> = User::list(&app_state.db_pool)
        .await?
        .into_iter()
        .map(UserInfo::from)
        .collect();
    Ok(ApiResponse::success(users).into_response())
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    ctx: RequestContext,
    request: web::Json<CreateUserRequest>,
) -> ApiResult<HttpResponse> {
    ctx.require_permission(permissions::USERS_MANAGE)?;
    request.validate()?;

    let role: UserRole = request
        .role
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid role '{}'", request.role)))?;

    let user = User::create(&app_state.db_pool, &request, role, &auth_service, app_state.clock.now()).await?;
    log::info!("👤 User {} created by {} with role {}", user.username, ctx.claims.username, role);

    Ok(ApiResponse::created(UserInfo::from(user), "User created").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, body_json, test_state};
    use actix_web::{test, App};
    use serde_json::json;

    fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/auth/login", web::post().to(login))
            .route("/api/auth/profile", web::get().to(get_profile))
            .route("/api/auth/change-password", web::post().to(change_password))
            .route("/api/auth/users", web::get().to(get_users))
            .route("/api/auth/users", web::post().to(create_user));
    }

    #[actix_rt::test]
    async fn login_returns_token_and_profile_lists_permissions() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "username": "pharmacist", "password": "Passw0rd!" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body = body_json(resp).await;
        let token = body["data"]["token"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["user"]["role"], "pharmacist");

        let req = test::TestRequest::get()
            .uri("/api/auth/profile")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        let granted: Vec<&str> = body["data"]["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|p| p.as_str())
            .collect();
        assert!(granted.contains(&"pharmacy.manage"));
        assert!(!granted.contains(&"users.manage"));
    }

    #[actix_rt::test]
    async fn repeated_failures_lock_the_account() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(routes)).await;

        for _ in 0..state.app.config.auth.max_login_attempts {
            let req = test::TestRequest::post()
                .uri("/auth/login")
                .set_json(json!({ "username": "nurse", "password": "wrong" }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 401);
        }

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "username": "nurse", "password": "Passw0rd!" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
        assert!(body_json(resp).await["message"].as_str().unwrap().contains("locked"));
    }

    #[actix_rt::test]
    async fn only_admins_manage_users() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.data()).app_data(state.auth()).configure(routes)).await;
        let payload = json!({
            "username": "frontdesk2",
            "email": "frontdesk2@hospital.test",
            "password": "Welcome123",
            "role": "receptionist"
        });

        let req = test::TestRequest::post()
            .uri("/api/auth/users")
            .insert_header(bearer(&state, UserRole::Doctor))
            .set_json(payload.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);

        let req = test::TestRequest::post()
            .uri("/api/auth/users")
            .insert_header(bearer(&state, UserRole::Admin))
            .set_json(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        assert_eq!(body_json(resp).await["data"]["role"], "receptionist");
    }
}
