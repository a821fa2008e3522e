use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::dispatcher::Dispatcher;
use crate::error::{ComponentError, Error};
use crate::store::HookStore;
use crate::types::{Delivery, Hook, Params};

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    delivery_header: Arc<str>,
    started: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, delivery_header: &str) -> Self {
        Self {
            dispatcher,
            delivery_header: Arc::from(delivery_header),
            started: Instant::now(),
        }
    }

    fn hooks(&self) -> &HookStore {
        self.dispatcher.hooks()
    }
}

/// Routes exposed to webhook senders.
pub fn public_router(state: AppState) -> Router {
    Router::new()
        .route("/_status", get(status))
        .route("/h/{hook_id}", get(receive_delivery).post(receive_delivery))
        .with_state(state)
}

/// JSON administration routes. Bind these to a private address.
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/_status", get(status))
        .route("/components", get(list_component_types))
        .route("/hooks", get(list_hooks).post(create_hook))
        .route("/hooks/{hook_id}", get(get_hook).put(update_hook))
        .route("/hooks/{hook_id}/stats", get(hook_stats))
        .route("/hooks/{hook_id}/components", get(list_components).post(attach_component))
        .route(
            "/hooks/{hook_id}/components/{component}",
            get(component_params).put(update_component),
        )
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves once `signal` fires. If the signal handler cannot be installed
/// the error is logged and the returned future never resolves, so the
/// server keeps running until it is killed.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => tracing::info!("shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Maps a hook-level error to an HTTP response with a JSON body.
pub struct ErrorResponse(Error);

impl From<Error> for ErrorResponse {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ErrorResponse {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::HookNotFound(_) | Error::ComponentNotAttached { .. } => StatusCode::NOT_FOUND,
            Error::HookExists(_) | Error::ComponentAlreadyAttached { .. } => StatusCode::CONFLICT,
            Error::UnknownComponent(_) => StatusCode::BAD_REQUEST,
            Error::Component { source, .. } => match source {
                ComponentError::MissingOption(_)
                | ComponentError::InvalidOption { .. }
                | ComponentError::MissingDeliveryId
                | ComponentError::Payload(_)
                | ComponentError::NotAPullRequest => StatusCode::BAD_REQUEST,
                ComponentError::Rejected(_) => StatusCode::UNAUTHORIZED,
                ComponentError::Api(_) => StatusCode::BAD_GATEWAY,
                ComponentError::NotInitialized | ComponentError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Error::DuplicateComponent(_) | Error::CorruptRecord { .. } | Error::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

// ─── Public handlers ──────────────────────────────────────────────────────────

async fn status(State(state): State<AppState>) -> String {
    let uptime = state.started.elapsed().as_secs();
    format!(
        "OK\nversion:\t{}\nuptime:\t{}s\n",
        env!("CARGO_PKG_VERSION"),
        uptime
    )
}

async fn receive_delivery(
    Path(hook_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = Delivery::from_request(&state.delivery_header, headers, body);
    let dispatcher = state.dispatcher.clone();

    // Detached so the transaction commits or aborts even if the sender hangs up.
    let task = tokio::spawn(async move { dispatcher.dispatch(&hook_id, &delivery).await });

    match task.await {
        Ok(Ok(report)) => {
            let status = if report.is_duplicate() {
                "duplicate"
            } else {
                "processed"
            };
            Json(serde_json::json!({ "status": status, "report": report })).into_response()
        }
        // A stored hook naming an unregistered type is our misconfiguration,
        // not the sender's.
        Ok(Err(e @ Error::UnknownComponent(_))) => {
            let body = Json(serde_json::json!({ "error": e.to_string() }));
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
        Ok(Err(e)) => ErrorResponse(e).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "dispatch task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ─── Admin handlers ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateHook {
    name: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct UpdateHook {
    name: String,
}

#[derive(Deserialize)]
struct AttachComponent {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    params: Params,
}

#[derive(Deserialize)]
struct UpdateComponent {
    #[serde(default)]
    params: Params,
}

type AdminResult<T> = Result<T, ErrorResponse>;

async fn list_component_types(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hooks().registry().list())
}

async fn list_hooks(State(state): State<AppState>) -> AdminResult<Json<Vec<Hook>>> {
    Ok(Json(state.hooks().list()?))
}

async fn create_hook(
    State(state): State<AppState>,
    Json(input): Json<CreateHook>,
) -> AdminResult<(StatusCode, Json<Hook>)> {
    let hook = match input.id {
        Some(id) => Hook::with_id(id, input.name),
        None => Hook::new(input.name),
    };
    state.hooks().create(&hook).await?;
    Ok((StatusCode::CREATED, Json(hook)))
}

async fn get_hook(
    Path(hook_id): Path<String>,
    State(state): State<AppState>,
) -> AdminResult<Json<Hook>> {
    Ok(Json(state.hooks().get(&hook_id)?))
}

async fn update_hook(
    Path(hook_id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<UpdateHook>,
) -> AdminResult<Json<Hook>> {
    let mut hook = state.hooks().get(&hook_id)?;
    hook.name = input.name;
    Ok(Json(state.hooks().update(&hook).await?))
}

async fn hook_stats(
    Path(hook_id): Path<String>,
    State(state): State<AppState>,
) -> AdminResult<impl IntoResponse> {
    Ok(Json(state.hooks().stats(&hook_id)?))
}

async fn list_components(
    Path(hook_id): Path<String>,
    State(state): State<AppState>,
) -> AdminResult<Json<Vec<String>>> {
    Ok(Json(state.hooks().list_components(&hook_id)?))
}

async fn attach_component(
    Path(hook_id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<AttachComponent>,
) -> AdminResult<(StatusCode, Json<Hook>)> {
    let hook = state
        .hooks()
        .attach_component(&hook_id, &input.type_name, &input.params)
        .await?;
    Ok((StatusCode::CREATED, Json(hook)))
}

async fn component_params(
    Path((hook_id, component)): Path<(String, String)>,
    State(state): State<AppState>,
) -> AdminResult<Json<Params>> {
    Ok(Json(state.hooks().component_params(&hook_id, &component)?))
}

async fn update_component(
    Path((hook_id, component)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(input): Json<UpdateComponent>,
) -> AdminResult<StatusCode> {
    state
        .hooks()
        .update_component(&hook_id, &component, &input.params)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
