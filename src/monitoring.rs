// src/monitoring.rs
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crate::AppState;

const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Metrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub response_times: Arc<std::sync::Mutex<Vec<u64>>>,
    pub started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            response_times: Arc::new(std::sync::Mutex::new(Vec::new())),
            started_at: Instant::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Keeps the most recent 1000 samples.
    pub fn record_response_time(&self, time_ms: u64) {
        if let Ok(mut times) = self.response_times.lock() {
            times.push(time_ms);
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    pub fn average_response_time(&self) -> f64 {
        match self.response_times.lock() {
            Ok(times) if !times.is_empty() => times.iter().sum::<u64>() as f64 / times.len() as f64,
            _ => 0.0,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_time_ms: f64,
    pub database_connections: u32,
    pub idle_connections: usize,
}

pub async fn health_check(metrics: web::Data<Arc<Metrics>>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: metrics.started_at.elapsed().as_secs(),
    })
}

pub async fn readiness_check(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    let ping = sqlx::query("SELECT 1").fetch_one(&app_state.db_pool);
    match tokio::time::timeout(READINESS_TIMEOUT, ping).await {
        Ok(Ok(_)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        })),
        Ok(Err(e)) => {
            log::error!("❌ Readiness check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "not ready",
                "database": "disconnected"
            }))
        }
        Err(_) => {
            log::error!("❌ Readiness check timed out after {:?}", READINESS_TIMEOUT);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "not ready",
                "database": "timeout"
            }))
        }
    }
}

pub async fn metrics_endpoint(
    metrics: web::Data<Arc<Metrics>>,
    app_state: web::Data<Arc<AppState>>,
) -> HttpResponse {
    HttpResponse::Ok().json(MetricsResponse {
        requests_total: metrics.request_count.load(Ordering::Relaxed),
        errors_total: metrics.error_count.load(Ordering::Relaxed),
        avg_response_time_ms: metrics.average_response_time(),
        database_connections: app_state.db_pool.size(),
        idle_connections: app_state.db_pool.num_idle(),
    })
}

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for RequestLogger
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let metrics = self.metrics.clone();
        let method = req.method().clone();
        let path = req.path().to_string();
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;
            let elapsed = start_time.elapsed().as_millis() as u64;
            metrics.record_response_time(elapsed);

            if let Ok(ref response) = res {
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    metrics.increment_errors();
                }
                if status.is_server_error() {
                    log::error!("❌ {} {} -> {} in {}ms", method, path, status.as_u16(), elapsed);
                } else {
                    log::debug!("{} {} -> {} in {}ms", method, path, status.as_u16(), elapsed);
                }
            }
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_json, test_state};
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn response_time_window_is_bounded() {
        let metrics = Metrics::new();
        for i in 0..1005 {
            metrics.record_response_time(i);
        }
        assert_eq!(metrics.response_times.lock().unwrap().len(), 1000);
        assert!(metrics.average_response_time() > 500.0);
    }

    #[actix_rt::test]
    async fn middleware_counts_requests_and_errors() {
        let state = test_state().await;
        let metrics = Arc::new(Metrics::new());
        let app = test::init_service(
            App::new()
                .wrap(RequestLogger::new(metrics.clone()))
                .app_data(state.data())
                .app_data(web::Data::new(metrics.clone()))
                .route("/health", web::get().to(health_check))
                .route("/health/ready", web::get().to(readiness_check))
                .route("/health/metrics", web::get().to(metrics_endpoint)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health/ready").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
        let req = test::TestRequest::get().uri("/missing").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get().uri("/health/metrics").to_request();
        let body = body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["requests_total"], 3);
        assert_eq!(body["errors_total"], 1);
    }
}
