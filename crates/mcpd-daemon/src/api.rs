use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use mcpd_config::CorsConfig;
use mcpd_core::{DaemonError, ErrorKind, ServerState};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::docs;
use crate::router::{Router as ToolRouter, ToolRef};
use crate::supervisor::{ServerView, Supervisor};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Arc<Supervisor>,
    pub router: ToolRouter,
    /// Root shutdown token; cancelling it fails in-flight tool calls
    /// with `Cancelled`.
    pub shutdown: CancellationToken,
}

/// Error envelope: `{error, kind, details?}`.
struct ApiError(DaemonError);

impl From<DaemonError> for ApiError {
    fn from(error: DaemonError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unavailable | ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Transport | ErrorKind::ProtocolError | ErrorKind::SpawnFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::ConfigInvalid | ErrorKind::SpecUnsatisfied => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "error": self.0.message(),
            "kind": self.0.kind,
        });
        if let Some(details) = self.0.details() {
            body["details"] = details.clone();
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthSummary {
    status: &'static str,
    servers: Vec<ServerHealthView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerHealthView {
    name: String,
    state: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<mcpd_core::HealthRecord>,
}

/// Build the full application router, CORS included.
pub fn build_app(
    state: ApiState,
    cors: Option<&CorsConfig>,
) -> Result<axum::Router, DaemonError> {
    let api = axum::Router::new()
        .route("/servers", get(list_servers))
        .route("/servers/{name}", get(get_server))
        .route("/servers/{name}/tools", get(list_server_tools))
        .route("/servers/{name}/tools/{tool}", post(call_tool))
        .route("/tools", get(list_tools))
        .route("/health", get(health));

    let mut app = axum::Router::new()
        .nest("/api/v1", api)
        .route("/docs", get(serve_docs))
        .route("/openapi.json", get(serve_openapi))
        .with_state(state);

    if let Some(cors) = cors {
        app = app.layer(build_cors_layer(cors)?);
    }
    Ok(app)
}

/// Translate the resolved CORS policy into a tower-http layer.
fn build_cors_layer(cors: &CorsConfig) -> Result<CorsLayer, DaemonError> {
    let origins = cors
        .allow_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| {
                DaemonError::config_invalid(format!("invalid cors origin '{origin}'"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut layer = CorsLayer::new().allow_origin(AllowOrigin::list(origins));

    if !cors.allow_methods.is_empty() {
        let methods = cors
            .allow_methods
            .iter()
            .map(|method| {
                method.parse::<Method>().map_err(|_| {
                    DaemonError::config_invalid(format!("invalid cors method '{method}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        layer = layer.allow_methods(methods);
    }
    if !cors.allow_headers.is_empty() {
        layer = layer.allow_headers(parse_headers(&cors.allow_headers)?);
    }
    if !cors.expose_headers.is_empty() {
        layer = layer.expose_headers(parse_headers(&cors.expose_headers)?);
    }
    if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }
    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(max_age);
    }
    Ok(layer)
}

fn parse_headers(raw: &[String]) -> Result<Vec<HeaderName>, DaemonError> {
    raw.iter()
        .map(|name| {
            name.parse::<HeaderName>().map_err(|_| {
                DaemonError::config_invalid(format!("invalid cors header '{name}'"))
            })
        })
        .collect()
}

async fn list_servers(State(state): State<ApiState>) -> Json<Vec<ServerView>> {
    Json(state.supervisor.views().await)
}

async fn get_server(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ServerView>, ApiError> {
    let view = state
        .supervisor
        .views()
        .await
        .into_iter()
        .find(|view| view.name == name)
        .ok_or_else(|| DaemonError::not_found(format!("unknown server: {name}")))?;
    Ok(Json(view))
}

async fn list_server_tools(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ToolRef>>, ApiError> {
    Ok(Json(state.router.tools_of(&name)?))
}

async fn list_tools(State(state): State<ApiState>) -> Json<Vec<ToolRef>> {
    Json(state.router.list_tools())
}

async fn call_tool(
    State(state): State<ApiState>,
    Path((name, tool)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    let arguments = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).map_err(|error| {
            DaemonError::config_invalid(format!("request body is not valid JSON: {error}"))
        })?
    };
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(DaemonError::config_invalid(format!(
                "tool arguments must be a JSON object, got {}",
                json_type_name(&other)
            ))
            .into());
        }
    };

    let result = state
        .router
        .call_tool(&name, &tool, arguments, &state.shutdown)
        .await?;
    Ok(Json(result))
}

async fn health(State(state): State<ApiState>) -> Json<HealthSummary> {
    let views = state.supervisor.views().await;
    let degraded = views.iter().any(|view| !view.state.can_serve());
    let servers = views
        .into_iter()
        .map(|view| ServerHealthView {
            name: view.name,
            state: view.state,
            health: view.health,
        })
        .collect();

    Json(HealthSummary {
        status: if degraded { "degraded" } else { "ok" },
        servers,
    })
}

async fn serve_docs() -> Html<&'static str> {
    Html(docs::DOCS_HTML)
}

async fn serve_openapi() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        docs::openapi_document().to_string(),
    )
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Serve the API until the shutdown token fires, then drain in-flight
/// handlers for at most `drain_timeout` before closing.
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    cors: Option<CorsConfig>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let app =
        build_app(state, cors.as_ref()).map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API listener at {addr}"))?;
    tracing::info!(%addr, "API listening");

    let graceful_token = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful_token.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return result.context("API server task panicked")?.context("API server failed");
        }
        _ = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(result) => result.context("API server task panicked")?.context("API server failed")?,
        Err(_) => {
            tracing::warn!(
                timeout = ?drain_timeout,
                "API drain timeout exceeded; aborting in-flight handlers"
            );
            server.abort();
        }
    }
    Ok(())
}
