#![forbid(unsafe_code)]

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use nomorenoise_adapter::{
    AckResponse, AdapterConfig, AdapterError, AdapterHealthResponse, AdapterRuntime,
    AdminComplaintsResponse, AdminLoginRequest, AdminSessionResponse, ComplaintListResponse,
    ComplaintResponse, SignInRequest, SignUpRequest, SubmitComplaintRequest, UpdateStatusRequest,
    UserSessionResponse,
};
use tokio_stream::{Stream, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env()?;
    let runtime = AdapterRuntime::new(&config)?;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/auth/signup", post(sign_up))
        .route("/v1/auth/signin", post(sign_in))
        .route("/v1/auth/demo", post(demo_sign_in))
        .route("/v1/auth/signout", post(sign_out))
        .route("/v1/admin/login", post(admin_login))
        .route("/v1/admin/logout", post(admin_logout))
        .route("/v1/complaints", post(submit_complaint))
        .route("/v1/complaints/mine", get(my_complaints))
        .route("/v1/admin/complaints", get(admin_complaints))
        .route("/v1/admin/complaints/events", get(complaint_events))
        .route("/v1/admin/complaints/:id/status", post(update_status))
        .with_state(runtime)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        );

    tracing::info!(
        addr = %config.http_bind,
        journal = config.store_path.is_some(),
        geo_timeout_ms = config.geo_timeout_ms,
        demo_user_enabled = config.demo_user_enabled,
        "nomorenoise_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(config.http_bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

struct ApiError(AdapterError);

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(self.0.to_response())).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn healthz(State(runtime): State<AdapterRuntime>) -> (StatusCode, Json<AdapterHealthResponse>) {
    match runtime.health_report() {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(err.to_string()),
                complaints: 0,
                feed_subscribers: 0,
                feed_last_seq: 0,
            }),
        ),
    }
}

async fn sign_up(
    State(runtime): State<AdapterRuntime>,
    Json(request): Json<SignUpRequest>,
) -> ApiResult<UserSessionResponse> {
    Ok(Json(runtime.sign_up(request)?))
}

async fn sign_in(
    State(runtime): State<AdapterRuntime>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<UserSessionResponse> {
    Ok(Json(runtime.sign_in(request)?))
}

async fn demo_sign_in(
    State(runtime): State<AdapterRuntime>,
) -> ApiResult<UserSessionResponse> {
    Ok(Json(runtime.demo_sign_in()?))
}

async fn sign_out(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
) -> ApiResult<AckResponse> {
    Ok(Json(runtime.sign_out(bearer_token(&headers))?))
}

async fn admin_login(
    State(runtime): State<AdapterRuntime>,
    Json(request): Json<AdminLoginRequest>,
) -> ApiResult<AdminSessionResponse> {
    Ok(Json(runtime.admin_login(request)?))
}

async fn admin_logout(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
) -> ApiResult<AckResponse> {
    Ok(Json(runtime.admin_logout(bearer_token(&headers))?))
}

async fn submit_complaint(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
    Json(request): Json<SubmitComplaintRequest>,
) -> ApiResult<ComplaintResponse> {
    Ok(Json(
        runtime
            .submit_complaint(bearer_token(&headers), request)
            .await?,
    ))
}

async fn my_complaints(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
) -> ApiResult<ComplaintListResponse> {
    Ok(Json(runtime.my_complaints(bearer_token(&headers))?))
}

#[derive(Debug, serde::Deserialize)]
struct AdminComplaintsQuery {
    status: Option<String>,
}

async fn admin_complaints(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
    Query(query): Query<AdminComplaintsQuery>,
) -> ApiResult<AdminComplaintsResponse> {
    Ok(Json(runtime.admin_complaints(
        bearer_token(&headers),
        query.status.as_deref(),
    )?))
}

async fn update_status(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
    Path(complaint_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<ComplaintResponse> {
    Ok(Json(runtime.update_status(
        bearer_token(&headers),
        &complaint_id,
        request,
    )?))
}

async fn complaint_events(
    State(runtime): State<AdapterRuntime>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = runtime.subscribe_events(bearer_token(&headers))?;
    let subscription_id = subscription.id();
    tracing::info!(subscription_id = %subscription_id, "complaint event stream opened");
    let stream = subscription.filter_map(move |event| {
        match Event::default()
            .event(event.kind.as_str())
            .id(event.seq.to_string())
            .json_data(&event)
        {
            Ok(sse) => Some(Ok(sse)),
            Err(err) => {
                tracing::warn!(subscription_id = %subscription_id, error = %err, "event encode failed");
                None
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
