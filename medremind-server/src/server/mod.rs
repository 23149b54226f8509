pub mod auth;
mod config;
mod consumption;
pub mod cron;
mod medicines;
mod notifications;
pub mod push;
mod subscriptions;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Router,
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
pub use config::{AppConfig, ConfigError, PushConfig, SchedulerConfig};
use medremind_shared::schedule::TimeError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use crate::storage::{StorageError, Store};
use push::{PushService, PushTransport};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    /// The single operating timezone; parsed once from config.
    pub tz: Tz,
    pub push: PushService,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Result<Self, ConfigError> {
        let tz = config.tz()?;
        let push = PushService::from_config(&config, store.clone(), tz);
        Ok(Self {
            config,
            store,
            tz,
            push,
            shutdown: CancellationToken::new(),
        })
    }

    /// Replaces the push transport, keeping store and timezone.
    pub fn with_push_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.push = self.push.with_transport(transport);
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolves the patient addressed by `phone`; unknown numbers are 404.
    pub(crate) async fn patient_id(&self, phone: &str) -> Result<i32, AppError> {
        if phone.trim().is_empty() {
            return Err(AppError::validation("phoneNumber is required"));
        }
        let patient = self
            .store
            .find_patient_by_phone(phone)
            .await
            .map_err(AppError::internal)?
            .ok_or_else(|| AppError::not_found("patient not found"))?;
        Span::current().record("patient_id", patient.id);
        Ok(patient.id)
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let cron = Router::new()
        .route("/api/cron/reminders", get(cron::api_cron_reminders))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_cron_secret,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            patient_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route(
            "/api/medicines",
            get(medicines::api_list_medicines)
                .post(medicines::api_create_medicine)
                .put(medicines::api_update_medicine)
                .delete(medicines::api_delete_medicine),
        )
        .route(
            "/api/medicines/consumption",
            get(consumption::api_consumption_stats).post(consumption::api_record_consumption),
        )
        .route(
            "/api/notifications",
            get(notifications::api_list_notifications)
                .post(notifications::api_create_notification)
                .put(notifications::api_update_notification)
                .patch(notifications::api_toggle_notification)
                .delete(notifications::api_delete_notification),
        )
        .route(
            "/api/push/subscriptions",
            post(subscriptions::api_push_subscribe),
        )
        .route(
            "/api/push/subscriptions/unsubscribe",
            post(subscriptions::api_push_unsubscribe),
        )
        .merge(cron)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    match &state.config.dev_cors_origin {
        Some(origin) => app.layer(dev_cors(origin)),
        None => app,
    }
}

/// Lets a separately served web UI call the API during development.
fn dev_cors(origin: &str) -> CorsLayer {
    let origin = HeaderValue::from_str(origin).unwrap_or_else(|_| {
        tracing::warn!(origin = %origin, "invalid dev_cors_origin; using http://localhost:5173");
        HeaderValue::from_static("http://localhost:5173")
    });
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

const SECURITY_HEADERS: [(&str, &str); 3] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("referrer-policy", "no-referrer"),
];

// Reminder and stock data must never be served from a cache
const NO_STORE_HEADERS: [(&str, &str); 2] = [
    ("cache-control", "no-store, no-cache, must-revalidate, private"),
    ("pragma", "no-cache"),
];

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let uncacheable = {
        let path = req.uri().path();
        path == "/healthz" || path == "/api" || path.starts_with("/api/")
    };
    let mut resp = next.run(req).await;

    let extra: &[(&'static str, &'static str)] = if uncacheable { &NO_STORE_HEADERS } else { &[] };
    let headers = resp.headers_mut();
    for &(name, value) in SECURITY_HEADERS.iter().chain(extra) {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    Ok(resp)
}

pub(crate) fn rfc3339(dt: NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Validation(String),
    Unauthorized,
    NotFound(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::InvalidInput(m) => AppError::Validation(m),
            other => AppError::internal(other),
        }
    }
}

impl From<TimeError> for AppError {
    fn from(value: TimeError) -> Self {
        AppError::Validation(value.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, m, "validation", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
