#![forbid(unsafe_code)]

use std::{
    env,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tether_adapter::{
    ActivationAdapterRequest, AdapterHealthResponse, AdapterRuntime, DeactivateHookResponse,
    InstallHookResponse, RegistrationHookResponse, RegistrationReportResponse,
    UpdateCheckResponse,
};
use tether_os::health::HealthReportOutcome;
use tracing_subscriber::EnvFilter;

type SharedRuntime = Arc<Mutex<AdapterRuntime>>;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: String,
    reason: String,
}

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();

    let bind = env::var("TETHER_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let addr: SocketAddr = bind.trim().parse()?;
    let tick_ms = parse_scheduler_tick_ms_from_env();

    let runtime: SharedRuntime = Arc::new(Mutex::new(AdapterRuntime::default_from_env()?));
    let runtime_for_scheduler = runtime.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
        loop {
            ticker.tick().await;
            let tick = with_runtime(runtime_for_scheduler.clone(), |rt| rt.run_scheduler_tick()).await;
            match tick {
                Ok(Some(HealthReportOutcome::Failed(err))) => {
                    tracing::warn!(error = %err, "scheduled health report failed")
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "scheduler tick failed"),
            }
        }
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/hooks/install", post(install_hook))
        .route("/v1/hooks/admin-enter", post(admin_enter_hook))
        .route("/v1/hooks/deactivate", post(deactivate_hook))
        .route("/v1/activation", post(submit_activation))
        .route("/v1/updates", get(update_check))
        .route("/v1/registration", get(registration_report))
        .with_state(runtime);

    tracing::info!(%addr, tick_ms, "tether_sidecar_http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_scheduler_tick_ms_from_env() -> u64 {
    env::var("TETHER_SCHEDULER_TICK_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| (100..=600_000).contains(v))
        .unwrap_or(10_000)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Runs `f` on the blocking pool with the runtime locked. Outbound HTTP inside `f` blocks.
async fn with_runtime<T, F>(runtime: SharedRuntime, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&mut AdapterRuntime) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<T, String> {
        let mut guard = runtime
            .lock()
            .map_err(|_| "adapter runtime lock poisoned".to_string())?;
        Ok(f(&mut *guard))
    })
    .await
    .map_err(|e| format!("adapter task failed: {e}"))?
}

fn internal_error(reason: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            status: "error".to_string(),
            reason,
        }),
    )
}

async fn healthz(State(runtime): State<SharedRuntime>) -> (StatusCode, Json<AdapterHealthResponse>) {
    match with_runtime(runtime, |rt| rt.health_report()).await {
        Ok(response) if response.status == "ok" => (StatusCode::OK, Json(response)),
        Ok(response) => (StatusCode::INTERNAL_SERVER_ERROR, Json(response)),
        Err(reason) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(reason),
                daily_timer_scheduled: false,
            }),
        ),
    }
}

async fn install_hook(State(runtime): State<SharedRuntime>) -> HandlerResult<InstallHookResponse> {
    with_runtime(runtime, |rt| rt.run_install_hook())
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn admin_enter_hook(
    State(runtime): State<SharedRuntime>,
) -> HandlerResult<RegistrationHookResponse> {
    with_runtime(runtime, |rt| rt.run_admin_enter_hook())
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn deactivate_hook(
    State(runtime): State<SharedRuntime>,
) -> HandlerResult<DeactivateHookResponse> {
    with_runtime(runtime, |rt| rt.run_deactivate_hook())
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn submit_activation(
    State(runtime): State<SharedRuntime>,
    Json(request): Json<ActivationAdapterRequest>,
) -> HandlerResult<RegistrationHookResponse> {
    match with_runtime(runtime, move |rt| rt.submit_activation(request)).await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(reason)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                status: "error".to_string(),
                reason,
            }),
        )),
        Err(reason) => Err(internal_error(reason)),
    }
}

async fn update_check(State(runtime): State<SharedRuntime>) -> HandlerResult<UpdateCheckResponse> {
    with_runtime(runtime, |rt| rt.run_update_check())
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn registration_report(
    State(runtime): State<SharedRuntime>,
) -> HandlerResult<RegistrationReportResponse> {
    match with_runtime(runtime, |rt| rt.registration_report()).await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(reason)) | Err(reason) => Err(internal_error(reason)),
    }
}
