//! Request handlers. Wire shapes live here; semantics live in the policy,
//! supervisor, and tools crates.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::info,
};

use {
    toolcase_common::ToolError,
    toolcase_supervisor::{OutputStream, StartRequest},
    toolcase_tools::{archive, exec, fs, search},
};

use crate::{catalog::tool_catalog, state::GatewayState};

/// Adapter from the shared error taxonomy to an HTTP response. The body is
/// always the uniform `{ok: false, error, reason, ...}` shape.
pub struct ApiError(pub ToolError);

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            "policy_denied" | "permission_denied" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_command" | "empty_command" | "invalid_path" | "no_output" => {
                StatusCode::BAD_REQUEST
            },
            "timeout" => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0.to_response())).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "name": "toolcase",
        "version": env!("CARGO_PKG_VERSION"),
        "sandbox_root": state.sandbox_root,
    }))
}

pub async fn tools_list() -> Json<Value> {
    Json(json!({ "ok": true, "tools": tool_catalog() }))
}

pub async fn exec_run(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<exec::ExecRequest>,
) -> ApiResult<exec::ExecResult> {
    let result = exec::run(&state.policy, &req).await?;
    info!(
        tool = "exec.run",
        ok = result.ok,
        exit_code = result.exit_code,
        execution_id = %result.audit.execution_id,
        preview = %result.audit.command_preview,
        "tool call"
    );
    Ok(Json(result))
}

// ── Process routes ──────────────────────────────────────────────────────────

pub async fn process_start(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<StartRequest>,
) -> ApiResult<toolcase_supervisor::StartResult> {
    let result = state.supervisor.start(&req).await?;
    info!(
        tool = "process.start",
        pid = result.pid,
        execution_id = %result.audit.execution_id,
        preview = %result.audit.command_preview,
        "tool call"
    );
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ProcessStatusBody {
    pub pid: u32,
}

pub async fn process_status(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ProcessStatusBody>,
) -> ApiResult<toolcase_supervisor::StatusResult> {
    Ok(Json(state.supervisor.status(req.pid).await?))
}

#[derive(Debug, Deserialize)]
pub struct ProcessKillBody {
    pub pid: u32,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_kill_timeout")]
    pub timeout_s: u64,
}

fn default_kill_timeout() -> u64 {
    5
}

pub async fn process_kill(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ProcessKillBody>,
) -> ApiResult<toolcase_supervisor::KillResult> {
    let result = state.supervisor.kill(req.pid, req.force, req.timeout_s).await?;
    info!(
        tool = "process.kill",
        pid = req.pid,
        force = req.force,
        status = result.status,
        "tool call"
    );
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ProcessReadBody {
    pub pid: u32,
    #[serde(default = "default_stream")]
    pub stream: OutputStream,
    #[serde(default = "default_read_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_true")]
    pub tail: bool,
}

fn default_stream() -> OutputStream {
    OutputStream::Stdout
}

fn default_read_bytes() -> usize {
    20_000
}

fn default_true() -> bool {
    true
}

pub async fn process_read(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ProcessReadBody>,
) -> ApiResult<toolcase_supervisor::ReadResult> {
    Ok(Json(
        state
            .supervisor
            .read(req.pid, req.stream, req.max_bytes, req.tail)
            .await?,
    ))
}

pub async fn process_list(
    State(state): State<Arc<GatewayState>>,
) -> Json<toolcase_supervisor::ListResult> {
    Json(state.supervisor.list().await)
}

// ── Filesystem routes ───────────────────────────────────────────────────────

pub async fn fs_read(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<fs::ReadRequest>,
) -> ApiResult<fs::ReadResult> {
    Ok(Json(fs::read(&state.sandbox_root, &req, state.max_read_bytes)?))
}

pub async fn fs_write(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<fs::WriteRequest>,
) -> ApiResult<fs::WriteResult> {
    Ok(Json(fs::write(&state.sandbox_root, &req)?))
}

pub async fn fs_list(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<fs::ListRequest>,
) -> ApiResult<fs::ListResult> {
    Ok(Json(fs::list(&state.sandbox_root, &req)?))
}

// ── Search and archive routes ───────────────────────────────────────────────

pub async fn search_text(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<search::SearchRequest>,
) -> ApiResult<search::SearchResult> {
    Ok(Json(search::text(&state.sandbox_root, &req)?))
}

pub async fn archive_pack(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<archive::PackRequest>,
) -> ApiResult<archive::PackResult> {
    Ok(Json(archive::pack(&state.sandbox_root, &req)?))
}

pub async fn archive_unpack(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<archive::UnpackRequest>,
) -> ApiResult<archive::UnpackResult> {
    Ok(Json(archive::unpack(&state.sandbox_root, &req)?))
}
