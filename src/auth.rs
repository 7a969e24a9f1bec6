use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use bcrypt::{hash, verify};
use chrono::{Duration, NaiveDateTime, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString, VariantNames};
use uuid::Uuid;
use validator::Validate;

use crate::clock::TIMESTAMP_FORMAT;
use crate::error::{ApiError, ApiResult};

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub failed_login_attempts: i64,
    pub locked_until: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Doctor,
    Nurse,
    LabTechnician,
    Pharmacist,
    Accountant,
    Receptionist,
    SupportAgent,
}

// ======== PERMISSIONS ========

pub mod permissions {
    pub const DASHBOARD_VIEW: &str = "dashboard.view";
    pub const REPORTS_VIEW: &str = "reports.view";
    pub const PATIENTS_VIEW: &str = "patients.view";
    pub const PATIENTS_MANAGE: &str = "patients.manage";
    pub const DOCTORS_VIEW: &str = "doctors.view";
    pub const DOCTORS_MANAGE: &str = "doctors.manage";
    pub const APPOINTMENTS_VIEW: &str = "appointments.view";
    pub const APPOINTMENTS_MANAGE: &str = "appointments.manage";
    pub const IPD_VIEW: &str = "ipd.view";
    pub const IPD_MANAGE: &str = "ipd.manage";
    pub const IPD_APPROVE_ADMISSIONS: &str = "ipd.approve_admissions";
    pub const EMERGENCY_VIEW: &str = "emergency.view";
    pub const EMERGENCY_MANAGE: &str = "emergency.manage";
    pub const LABORATORY_VIEW: &str = "laboratory.view";
    pub const LABORATORY_MANAGE: &str = "laboratory.manage";
    pub const PHARMACY_VIEW: &str = "pharmacy.view";
    pub const PHARMACY_MANAGE: &str = "pharmacy.manage";
    pub const EXPENSES_VIEW: &str = "expenses.view";
    pub const EXPENSES_MANAGE: &str = "expenses.manage";
    pub const INSURANCE_VIEW: &str = "insurance.view";
    pub const INSURANCE_MANAGE: &str = "insurance.manage";
    pub const PAYMENTS_VIEW: &str = "payments.view";
    pub const PAYMENTS_MANAGE: &str = "payments.manage";
    pub const SUPPORT_VIEW: &str = "support.view";
    pub const SUPPORT_MANAGE: &str = "support.manage";
    pub const TEMPLATES_VIEW: &str = "templates.view";
    pub const TEMPLATES_MANAGE: &str = "templates.manage";
    pub const FINANCIAL_REPORTS: &str = "admin.view_financial_reports";
    pub const USERS_MANAGE: &str = "users.manage";

    pub const ALL: &[&str] = &[
        DASHBOARD_VIEW, REPORTS_VIEW, PATIENTS_VIEW, PATIENTS_MANAGE, DOCTORS_VIEW,
        DOCTORS_MANAGE, APPOINTMENTS_VIEW, APPOINTMENTS_MANAGE, IPD_VIEW, IPD_MANAGE,
        IPD_APPROVE_ADMISSIONS, EMERGENCY_VIEW, EMERGENCY_MANAGE, LABORATORY_VIEW,
        LABORATORY_MANAGE, PHARMACY_VIEW, PHARMACY_MANAGE, EXPENSES_VIEW, EXPENSES_MANAGE,
        INSURANCE_VIEW, INSURANCE_MANAGE, PAYMENTS_VIEW, PAYMENTS_MANAGE, SUPPORT_VIEW,
        SUPPORT_MANAGE, TEMPLATES_VIEW, TEMPLATES_MANAGE, FINANCIAL_REPORTS, USERS_MANAGE,
    ];
}

impl UserRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "Administrator",
            UserRole::Doctor => "Doctor",
            UserRole::Nurse => "Nurse",
            UserRole::LabTechnician => "Lab Technician",
            UserRole::Pharmacist => "Pharmacist",
            UserRole::Accountant => "Accountant",
            UserRole::Receptionist => "Receptionist",
            UserRole::SupportAgent => "Support Agent",
        }
    }

    pub fn permissions(&self) -> &'static [&'static str] {
        use permissions::*;
        match self {
            UserRole::Admin => ALL,
            UserRole::Doctor => &[
                DASHBOARD_VIEW, REPORTS_VIEW, PATIENTS_VIEW, PATIENTS_MANAGE, DOCTORS_VIEW,
                APPOINTMENTS_VIEW, APPOINTMENTS_MANAGE, IPD_VIEW, IPD_MANAGE,
                IPD_APPROVE_ADMISSIONS, EMERGENCY_VIEW, EMERGENCY_MANAGE, LABORATORY_VIEW,
                LABORATORY_MANAGE, PHARMACY_VIEW, TEMPLATES_VIEW,
            ],
            UserRole::Nurse => &[
                DASHBOARD_VIEW, PATIENTS_VIEW, PATIENTS_MANAGE, DOCTORS_VIEW, APPOINTMENTS_VIEW,
                IPD_VIEW, IPD_MANAGE, EMERGENCY_VIEW, EMERGENCY_MANAGE, LABORATORY_VIEW,
                PHARMACY_VIEW,
            ],
            UserRole::LabTechnician => &[
                DASHBOARD_VIEW, PATIENTS_VIEW, LABORATORY_VIEW, LABORATORY_MANAGE, REPORTS_VIEW,
            ],
            UserRole::Pharmacist => &[
                DASHBOARD_VIEW, PATIENTS_VIEW, PHARMACY_VIEW, PHARMACY_MANAGE, EXPENSES_VIEW,
                REPORTS_VIEW,
            ],
            UserRole::Accountant => &[
                DASHBOARD_VIEW, REPORTS_VIEW, PATIENTS_VIEW, EXPENSES_VIEW, EXPENSES_MANAGE,
                INSURANCE_VIEW, INSURANCE_MANAGE, PAYMENTS_VIEW, PAYMENTS_MANAGE,
                PHARMACY_VIEW, FINANCIAL_REPORTS,
            ],
            UserRole::Receptionist => &[
                DASHBOARD_VIEW, PATIENTS_VIEW, PATIENTS_MANAGE, DOCTORS_VIEW, APPOINTMENTS_VIEW,
                APPOINTMENTS_MANAGE, INSURANCE_VIEW, PAYMENTS_VIEW, PAYMENTS_MANAGE,
                TEMPLATES_VIEW,
            ],
            UserRole::SupportAgent => &[
                DASHBOARD_VIEW, SUPPORT_VIEW, SUPPORT_MANAGE, TEMPLATES_VIEW, TEMPLATES_MANAGE,
            ],
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions().contains(&permission)
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<String>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        let role = user.get_role();
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            role,
            is_active: user.is_active,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_hours: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_hours,
            bcrypt_cost,
        }
    }

    pub fn token_lifetime_seconds(&self) -> i64 {
        self.token_hours * 3600
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        validate_password_strength(password)?;
        hash(password, self.bcrypt_cost)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        verify(password, hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))
    }

    pub fn generate_token(&self, user_id: &str, username: &str, role: UserRole) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::AuthError("Token expired".to_string())
                }
                _ => ApiError::AuthError("Invalid token".to_string()),
            })
    }
}

// ======== PASSWORD VALIDATION ========

pub fn validate_password_strength(password: &str) -> ApiResult<()> {
    if password.len() < 8 {
        return Err(ApiError::ValidationError("Password must be at least 8 characters".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one uppercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one lowercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::ValidationError("Password must contain at least one digit".to_string()));
    }
    Ok(())
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> ApiResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User"))
    }

    pub async fn list(pool: &SqlitePool) -> ApiResult<Vec<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username")
            .fetch_all(pool)
            .await?)
    }

    pub async fn create(
        pool: &SqlitePool,
        request: &CreateUserRequest,
        role: UserRole,
        auth_service: &AuthService,
        now: NaiveDateTime,
    ) -> ApiResult<User> {
        let id = Uuid::new_v4().to_string();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let password_hash = auth_service.hash_password(&request.password)?;

        sqlx::query(
            r#"INSERT INTO users (
                id, username, email, password_hash, role, full_name, is_active,
                failed_login_attempts, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 1, 0, ?, ?)"#,
        )
        .bind(&id)
        .bind(&request.username)
        .bind(request.email.to_lowercase())
        .bind(&password_hash)
        .bind(role.as_ref())
        .bind(&request.full_name)
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(pool)
        .await
        .map_err(|e| crate::repositories::write_error("User", e))?;

        Self::find_by_id(pool, &id).await
    }

    pub async fn record_login(&mut self, pool: &SqlitePool, now: NaiveDateTime) -> ApiResult<()> {
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        sqlx::query(
            "UPDATE users SET last_login = ?, failed_login_attempts = 0, locked_until = NULL WHERE id = ?",
        )
        .bind(&timestamp)
        .bind(&self.id)
        .execute(pool)
        .await?;
        self.last_login = Some(timestamp);
        self.failed_login_attempts = 0;
        self.locked_until = None;
        Ok(())
    }

    /// Counts a failed attempt and locks the account once `max_attempts` is reached.
    pub async fn record_failed_login(
        &mut self,
        pool: &SqlitePool,
        now: NaiveDateTime,
        max_attempts: i64,
        lockout_minutes: i64,
    ) -> ApiResult<()> {
        self.failed_login_attempts += 1;
        if self.failed_login_attempts >= max_attempts {
            self.locked_until = Some(
                (now + Duration::minutes(lockout_minutes))
                    .format(TIMESTAMP_FORMAT)
                    .to_string(),
            );
        }
        sqlx::query("UPDATE users SET failed_login_attempts = ?, locked_until = ? WHERE id = ?")
            .bind(self.failed_login_attempts)
            .bind(&self.locked_until)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        pool: &SqlitePool,
        current_password: &str,
        new_password: &str,
        auth_service: &AuthService,
        now: NaiveDateTime,
    ) -> ApiResult<()> {
        if !auth_service.verify_password(current_password, &self.password_hash)? {
            return Err(ApiError::BadRequest("Current password is incorrect".to_string()));
        }

        let new_hash = auth_service.hash_password(new_password)?;
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(&new_hash)
            .bind(now.format(TIMESTAMP_FORMAT).to_string())
            .bind(&self.id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn is_locked(&self, now: NaiveDateTime) -> bool {
        self.locked_until
            .as_deref()
            .and_then(|t| NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT).ok())
            .map(|until| now < until)
            .unwrap_or(false)
    }

    pub fn get_role(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::Receptionist)
    }
}

// ======== REQUEST CONTEXT ========

/// Per-request identity: verified claims, the role's permissions and a request id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub claims: Claims,
}

impl RequestContext {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn role(&self) -> UserRole {
        self.claims.role
    }

    pub fn permissions(&self) -> &'static [&'static str] {
        self.claims.role.permissions()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.claims.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: &str) -> ApiResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            log::warn!(
                "🚫 [{}] {} ({}) lacks permission {}",
                self.request_id, self.claims.username, self.claims.role, permission
            );
            Err(ApiError::Forbidden("Insufficient permissions".to_string()))
        }
    }

    pub fn require_any_permission(&self, permissions: &[&str]) -> ApiResult<()> {
        match permissions.iter().find(|p| self.has_permission(p)) {
            Some(_) => Ok(()),
            None => {
                log::warn!(
                    "🚫 [{}] {} ({}) lacks any of {:?}",
                    self.request_id, self.claims.username, self.claims.role, permissions
                );
                Err(ApiError::Forbidden("Insufficient permissions".to_string()))
            }
        }
    }
}

impl FromRequest for RequestContext {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let bearer = BearerAuth::from_request(req, payload);
        let auth_service = req.app_data::<web::Data<Arc<AuthService>>>().cloned();
        let request_id = req
            .headers()
            .get("X-Request-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Box::pin(async move {
            let credentials = bearer
                .await
                .map_err(|_| ApiError::Unauthorized("Missing or malformed bearer token".to_string()))?;
            let auth_service = auth_service.ok_or_else(|| {
                ApiError::InternalServerError("Auth service not available".to_string())
            })?;
            let claims = auth_service.verify_token(credentials.token()).map_err(|err| {
                log::warn!("JWT verification failed: {}", err);
                err
            })?;
            Ok(RequestContext { request_id, claims })
        })
    }
}
