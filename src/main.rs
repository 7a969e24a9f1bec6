// src/main.rs
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer,
};
use anyhow::Context;
use rand::{distributions::Alphanumeric, seq::SliceRandom, thread_rng, Rng};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregate;
mod auth;
mod auth_handlers;
mod clock;
mod config;
mod crud_handlers;
mod dashboard_handlers;
mod db;
mod emergency_handlers;
mod error;
mod handlers;
mod input;
mod insurance_handlers;
mod ipd_handlers;
mod laboratory_handlers;
mod models;
mod monitoring;
mod payment_handlers;
mod pharmacy_handlers;
pub mod query_builders;
mod report_handlers;
pub mod repositories;
mod support_handlers;
mod template_handlers;
pub mod validator;

#[cfg(test)]
mod test_support;

use crate::auth::{AuthService, CreateUserRequest, RequestContext, User, UserRole};
use crate::clock::{Clock, SystemClock};
use crate::config::{load_config, Config};
use crate::error::ApiError;
use crate::models::{Appointments, Doctors, Patients};
use crate::monitoring::{Metrics, RequestLogger};
use crate::query_builders::FilterBuilder;
use crate::repositories::WriteContext;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Filter builder bound to the clock's date and the configured page limit.
    pub fn filter_builder(&self) -> FilterBuilder {
        FilterBuilder::new(self.clock.today(), self.config.pagination.max_limit)
    }

    pub fn write_context(&self, ctx: &RequestContext) -> WriteContext {
        WriteContext {
            actor: Some(ctx.user_id().to_string()),
            now: self.clock.now(),
            strict_transitions: self.config.lifecycle.strict_transitions,
        }
    }
}

/// Every API route. Specific paths are registered before `{id}` patterns that would shadow them.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/login", web::post().to(auth_handlers::login))
        .service(
            web::scope("/api/auth")
                .route("/profile", web::get().to(auth_handlers::get_profile))
                .route("/change-password", web::post().to(auth_handlers::change_password))
                .route("/users", web::get().to(auth_handlers::get_users))
                .route("/users", web::post().to(auth_handlers::create_user)),
        );

    dashboard_handlers::configure(cfg);
    report_handlers::configure(cfg);

    crud_handlers::register::<Patients>(cfg, "/api/patients");
    crud_handlers::register::<Doctors>(cfg, "/api/doctors");
    crud_handlers::register::<Appointments>(cfg, "/api/appointments");

    ipd_handlers::configure(cfg);
    emergency_handlers::configure(cfg);
    laboratory_handlers::configure(cfg);
    pharmacy_handlers::configure(cfg);
    insurance_handlers::configure(cfg);
    payment_handlers::configure(cfg);
    support_handlers::configure(cfg);
    template_handlers::configure(cfg);
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(format!("Invalid JSON payload: {}", err)).into()
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    }
    config.print_startup_info();

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
        config.auth.bcrypt_cost,
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    create_default_admin_if_needed(&pool, &auth_service, clock.as_ref()).await?;

    let app_state = Arc::new(AppState {
        db_pool: pool,
        config: config.clone(),
        clock,
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(address = %bind_address, "🚀 Starting server");

    let metrics = Arc::new(Metrics::new());
    let cors_origins = config.security.allowed_origins.clone();
    let production = config.is_production();
    if production && cors_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Cannot start server with wildcard CORS in production");
    }

    let security = config.security.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(setup_cors(&cors_origins, production))
            .wrap(setup_security_headers(&security))
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(metrics.clone()))
            .app_data(json_config())
            .app_data(web::PayloadConfig::new(security.max_request_size))
            .service(
                web::scope("/health")
                    .route("", web::get().to(monitoring::health_check))
                    .route("/ready", web::get().to(monitoring::readiness_check))
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint)),
            )
            .configure(configure_api)
            .default_service(web::to(handlers::route_not_found))
    })
    .keep_alive(Duration::from_secs(config.server.keep_alive));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

fn setup_cors(allowed_origins: &[String], production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !production {
        log::warn!("⚠️ Using wildcard CORS (*) in development mode");
        return cors.allow_any_origin();
    }

    for origin in allowed_origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
        cors = cors.allowed_origin(origin);
    }
    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.auth.jwt_secret.starts_with("development_only") || config.auth.jwt_secret.len() < 32 {
        anyhow::bail!("Insecure JWT secret in production! Set JWT_SECRET to at least 32 characters.");
    }

    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }

    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("💾 Creating database: {}", database_url);
        Sqlite::create_database(database_url)
            .await
            .with_context(|| format!("Failed to create database {}", database_url))?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &crate::config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database URL: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .connect_with(options)
        .await
        .context("Failed to connect to database")
}

fn setup_security_headers(config: &crate::config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ));
    }

    headers
}

/// 16 characters with at least one upper, lower and digit, so it passes the strength rules.
fn generate_admin_password() -> String {
    let mut rng = thread_rng();
    let mut chars: Vec<char> = (&mut rng).sample_iter(&Alphanumeric).take(13).map(char::from).collect();
    chars.push(char::from(b'A' + rng.gen_range(0..26u8)));
    chars.push(char::from(b'a' + rng.gen_range(0..26u8)));
    chars.push(char::from(b'0' + rng.gen_range(0..10u8)));
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let (user_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if user_count > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_ADMIN_PASSWORD") {
        Ok(password) => (password, false),
        Err(_) => (generate_admin_password(), true),
    };

    let request = CreateUserRequest {
        username: "admin".to_string(),
        email: "admin@his.local".to_string(),
        password: password.clone(),
        role: UserRole::Admin.to_string(),
        full_name: Some("System Administrator".to_string()),
    };
    User::create(pool, &request, UserRole::Admin, auth_service, clock.now())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::warn!("👤 Default admin user created");
    log::warn!("   Username: admin");
    if generated {
        log::warn!("   Password: {} (generated, change it immediately)", password);
    }
    Ok(())
}
