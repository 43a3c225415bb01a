//! JSON-RPC dispatch for the stdio bridge. One message is handled to
//! completion before the next is read, so no interleaving can occur.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use {
    serde_json::{Value, json},
    tokio::io::{AsyncBufRead, AsyncWrite},
    tracing::{debug, info, warn},
};

use crate::{
    backend::Backend,
    error::Result,
    framing::{read_message, write_message},
    types::{
        BACKEND_FAILURE, INVALID_PARAMS, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
        McpToolDef, PROTOCOL_VERSION, RegisteredTool, SERVER_NAME,
    },
};

/// Paths in the backend catalog that are plumbing, not tools.
const HIDDEN_PATHS: &[&str] = &["/health", "/tools/list", "/openapi.json"];

pub struct McpBridge {
    backend: Backend,
    cache: HashMap<String, RegisteredTool>,
    cache_at: Option<Instant>,
    cache_ttl: Duration,
}

impl McpBridge {
    pub fn new(backend: Backend, cache_ttl_s: f64) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
            cache_at: None,
            cache_ttl: Duration::from_secs_f64(cache_ttl_s.max(0.0)),
        }
    }

    /// Handle one message. `None` means nothing is written back (the
    /// message was a notification).
    pub async fn handle(&mut self, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = req.id.clone().unwrap_or(Value::Null);
        match req.method.as_str() {
            "initialize" => Some(JsonRpcResponse::result(id, self.initialize_result())),
            "notifications/initialized" => None,
            "tools/list" => Some(JsonRpcResponse::result(id, self.tools_list().await)),
            "tools/call" => Some(self.tools_call(req.params.as_ref(), id).await),
            "ping" | "shutdown" => Some(JsonRpcResponse::result(id, json!({}))),
            other => {
                if req.is_notification() {
                    debug!(method = other, "dropping unknown notification");
                    return None;
                }
                Some(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    "Method not found",
                    Some(json!({"method": other})),
                ))
            },
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "experimental": {
                    "resources": {"enabled": false},
                    "prompts": {"enabled": false},
                },
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    /// `tools/list` always refreshes so clients see the live catalog.
    async fn tools_list(&mut self) -> Value {
        self.refresh_tools(true).await;
        let mut tools: Vec<McpToolDef> = self
            .cache
            .values()
            .filter(|tool| !HIDDEN_PATHS.contains(&tool.path.as_str()))
            .map(|tool| McpToolDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool
                    .request_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        json!({"tools": tools})
    }

    async fn tools_call(&mut self, params: Option<&Value>, id: Value) -> JsonRpcResponse {
        let params = params.cloned().unwrap_or_else(|| json!({}));
        if let Some(reason) = validate_call_params(&params) {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "Invalid params",
                Some(json!({"reason": reason})),
            );
        }

        self.refresh_tools(false).await;
        let name = params["name"].as_str().unwrap_or_default().to_string();
        let Some(tool) = self.cache.get(&name).cloned() else {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "Tool not found",
                Some(json!({"name": name})),
            );
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let result = self.backend.call_tool(&tool, &arguments).await;
        if result["ok"] == json!(false) {
            return JsonRpcResponse::error(
                id,
                BACKEND_FAILURE,
                "Backend HTTP failure",
                Some(json!({"tool": name, "backend": result})),
            );
        }

        let text = result.to_string();
        JsonRpcResponse::result(id, json!({"content": [{"type": "text", "text": text}]}))
    }

    async fn refresh_tools(&mut self, force: bool) {
        let stale = self.cache.is_empty()
            || self.cache_ttl.is_zero()
            || self
                .cache_at
                .is_none_or(|at| at.elapsed() >= self.cache_ttl);
        if force || stale {
            self.cache = self.backend.fetch_tools().await;
            self.cache_at = Some(Instant::now());
            debug!(tools = self.cache.len(), "tool cache refreshed");
        }
    }
}

fn validate_call_params(params: &Value) -> Option<String> {
    match params.get("name") {
        Some(Value::String(name)) if !name.is_empty() => {},
        _ => return Some("tools/call params must include a non-empty string `name`.".into()),
    }
    match params.get("arguments") {
        None | Some(Value::Null) | Some(Value::Object(_)) => None,
        Some(_) => Some("tools/call `arguments` must be an object when provided.".into()),
    }
}

/// Serve framed JSON-RPC until EOF or `shutdown`. Unparseable bodies end
/// the loop, matching the framing contract.
pub async fn run_stdio<R, W>(bridge: &mut McpBridge, reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(base_url = bridge.backend.base_url(), "bridge serving stdio");
    while let Some(body) = read_message(reader).await? {
        let req: JsonRpcRequest = match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "unparseable message body, stopping");
                break;
            },
        };
        let is_shutdown = req.method == "shutdown";
        if let Some(response) = bridge.handle(&req).await {
            write_message(writer, &serde_json::to_vec(&response)?).await?;
        }
        if is_shutdown {
            break;
        }
    }
    Ok(())
}

/// Validated connection settings plus a live health probe, for
/// `bridge --print-config`.
pub async fn print_config(backend: &Backend) -> Value {
    let health = backend.request_json("GET", "/health", None).await;
    let base_url = backend.base_url();
    json!({
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": PROTOCOL_VERSION,
        "baseUrl": base_url,
        "healthUrl": format!("{base_url}/health"),
        "toolsUrl": format!("{base_url}/tools/list"),
        "health": health,
        "bridgeCommand": {
            "command": "toolcase",
            "args": ["bridge"],
            "env": {"TOOLCASE_BASE_URL": base_url},
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request(id: u64, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(id)),
            method: method.into(),
            params,
        }
    }

    fn notification(method: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    fn catalog_body() -> Value {
        json!({
            "ok": true,
            "tools": [
                {"name": "health", "method": "GET", "path": "/health", "description": "Health check"},
                {
                    "name": "exec.run",
                    "method": "POST",
                    "path": "/exec/run",
                    "description": "Run a command",
                    "request_schema": {"type": "object", "properties": {"cmd": {}}},
                },
                {"name": "process.list", "method": "POST", "path": "/process/list", "description": "List"},
            ],
        })
    }

    async fn bridge_for(server: &mockito::ServerGuard, ttl_s: f64) -> McpBridge {
        let backend = Backend::new(&server.url(), Duration::from_secs(2)).unwrap();
        McpBridge::new(backend, ttl_s)
    }

    #[tokio::test]
    async fn test_initialize_reports_identity() {
        let server = mockito::Server::new_async().await;
        let mut bridge = bridge_for(&server, 5.0).await;

        let resp = bridge.handle(&request(1, "initialize", None)).await.unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "toolcase");
        assert_eq!(result["capabilities"]["experimental"]["prompts"]["enabled"], false);
    }

    #[tokio::test]
    async fn test_tools_list_filters_plumbing_paths() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tools/list")
            .with_header("content-type", "application/json")
            .with_body(catalog_body().to_string())
            .create_async()
            .await;

        let mut bridge = bridge_for(&server, 5.0).await;
        let resp = bridge.handle(&request(2, "tools/list", None)).await.unwrap();
        let tools = resp.result.unwrap()["tools"].clone();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["exec.run", "process.list"]);
        // Schema-less tools advertise an open object.
        assert_eq!(tools[1]["inputSchema"], json!({"type": "object"}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_tools_call_happy_path() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tools/list")
            .with_body(catalog_body().to_string())
            .create_async()
            .await;
        let call = server
            .mock("POST", "/exec/run")
            .match_body(mockito::Matcher::PartialJson(json!({"cmd": "echo hi"})))
            .with_body(json!({"ok": true, "exit_code": 0, "stdout": "hi\n"}).to_string())
            .create_async()
            .await;

        let mut bridge = bridge_for(&server, 5.0).await;
        let resp = bridge
            .handle(&request(
                3,
                "tools/call",
                Some(json!({"name": "exec.run", "arguments": {"cmd": "echo hi"}})),
            ))
            .await
            .unwrap();

        let content = resp.result.unwrap()["content"].clone();
        assert_eq!(content[0]["type"], "text");
        let inner: Value = serde_json::from_str(content[0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(inner["stdout"], "hi\n");
        call.assert_async().await;
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tools/list")
            .with_body(catalog_body().to_string())
            .create_async()
            .await;

        let mut bridge = bridge_for(&server, 5.0).await;
        let resp = bridge
            .handle(&request(4, "tools/call", Some(json!({"name": "nope"}))))
            .await
            .unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.message, "Tool not found");
        assert_eq!(error.data.unwrap()["name"], "nope");
    }

    #[tokio::test]
    async fn test_tools_call_invalid_params() {
        let server = mockito::Server::new_async().await;
        let mut bridge = bridge_for(&server, 5.0).await;

        let resp = bridge
            .handle(&request(5, "tools/call", Some(json!({"name": ""}))))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);

        let resp = bridge
            .handle(&request(
                6,
                "tools/call",
                Some(json!({"name": "exec.run", "arguments": [1, 2]})),
            ))
            .await
            .unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert!(error.data.unwrap()["reason"]
            .as_str()
            .unwrap()
            .contains("arguments"));
    }

    #[tokio::test]
    async fn test_tools_call_backend_failure_maps_to_32010() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tools/list")
            .with_body(catalog_body().to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/exec/run")
            .with_status(403)
            .with_body(
                json!({"ok": false, "error": "policy_denied", "reason": "command 'reboot' is denied"})
                    .to_string(),
            )
            .create_async()
            .await;

        let mut bridge = bridge_for(&server, 5.0).await;
        let resp = bridge
            .handle(&request(
                7,
                "tools/call",
                Some(json!({"name": "exec.run", "arguments": {"cmd": "reboot"}})),
            ))
            .await
            .unwrap();

        let error = resp.error.unwrap();
        assert_eq!(error.code, BACKEND_FAILURE);
        assert_eq!(error.message, "Backend HTTP failure");
        let data = error.data.unwrap();
        assert_eq!(data["tool"], "exec.run");
        assert_eq!(data["backend"]["response"]["error"], "policy_denied");
    }

    #[tokio::test]
    async fn test_backend_timeout_maps_to_32010_and_loop_survives() {
        // Bound but never accepted, so the tool call stalls until the
        // client timeout fires.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let backend = Backend::new(&url, Duration::from_millis(200)).unwrap();
        let mut bridge = McpBridge::new(backend, 3600.0);
        bridge.cache.insert(
            "exec.run".into(),
            RegisteredTool {
                name: "exec.run".into(),
                method: "POST".into(),
                path: "/exec/run".into(),
                description: "Run a command".into(),
                request_schema: None,
            },
        );
        bridge.cache_at = Some(Instant::now());

        let resp = bridge
            .handle(&request(
                7,
                "tools/call",
                Some(json!({"name": "exec.run", "arguments": {"cmd": "true"}})),
            ))
            .await
            .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, BACKEND_FAILURE);
        let data = err.data.unwrap();
        assert_eq!(data["backend"]["error"], "backend_timeout");

        // The failure is a response, not a loop exit.
        let resp = bridge.handle(&request(8, "ping", None)).await.unwrap();
        assert!(resp.error.is_none());
        assert_eq!(resp.id, json!(8));
    }

    #[tokio::test]
    async fn test_tool_cache_honors_ttl() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/tools/list")
            .with_body(catalog_body().to_string())
            .expect(1)
            .create_async()
            .await;
        let call = server
            .mock("POST", "/exec/run")
            .with_body(json!({"ok": true}).to_string())
            .expect(2)
            .create_async()
            .await;

        // Long TTL: the second call must reuse the cached catalog.
        let mut bridge = bridge_for(&server, 600.0).await;
        for id in 0..2 {
            let resp = bridge
                .handle(&request(
                    id,
                    "tools/call",
                    Some(json!({"name": "exec.run", "arguments": {"cmd": "true"}})),
                ))
                .await
                .unwrap();
            assert!(resp.error.is_none());
        }
        list.assert_async().await;
        call.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_method_with_id() {
        let server = mockito::Server::new_async().await;
        let mut bridge = bridge_for(&server, 5.0).await;
        let resp = bridge.handle(&request(9, "bogus/method", None)).await.unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.data.unwrap()["method"], "bogus/method");
    }

    #[tokio::test]
    async fn test_notifications_are_silent() {
        let server = mockito::Server::new_async().await;
        let mut bridge = bridge_for(&server, 5.0).await;
        assert!(bridge.handle(&notification("notifications/initialized")).await.is_none());
        assert!(bridge.handle(&notification("totally/unknown")).await.is_none());
    }

    #[tokio::test]
    async fn test_framed_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tools/list")
            .with_body(catalog_body().to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/health")
            .with_body(json!({"ok": true, "name": "toolcase"}).to_string())
            .create_async()
            .await;

        let mut bridge = bridge_for(&server, 5.0).await;

        // Three requests plus one notification, framed into one input buffer.
        let mut input = Vec::new();
        for body in [
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "health", "arguments": {}}}),
        ] {
            write_message(&mut input, body.to_string().as_bytes())
                .await
                .unwrap();
        }

        let mut reader = tokio::io::BufReader::new(input.as_slice());
        let mut output = Vec::new();
        run_stdio(&mut bridge, &mut reader, &mut output).await.unwrap();

        let mut out_reader = tokio::io::BufReader::new(output.as_slice());
        let mut ids = Vec::new();
        while let Some(body) = read_message(&mut out_reader).await.unwrap() {
            let resp: JsonRpcResponse = serde_json::from_slice(&body).unwrap();
            assert!(resp.error.is_none());
            ids.push(resp.id);
        }
        // Three responses, in request order, and none for the notification.
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_print_config_includes_health_probe() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_body(json!({"ok": true, "name": "toolcase"}).to_string())
            .create_async()
            .await;

        let backend = Backend::new(&server.url(), Duration::from_secs(2)).unwrap();
        let config = print_config(&backend).await;
        assert_eq!(config["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(config["health"]["ok"], true);
        assert!(config["toolsUrl"].as_str().unwrap().ends_with("/tools/list"));
    }
}
