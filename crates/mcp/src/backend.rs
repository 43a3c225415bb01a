//! HTTP client for the tool gateway. Transport failures never bubble up as
//! errors; they are folded into `{ok: false, ...}` payloads so the bridge
//! can report them over JSON-RPC instead of dying.

use std::{collections::HashMap, time::Duration};

use {
    serde_json::{Value, json},
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    error::{Error, Result},
    types::RegisteredTool,
};

pub struct Backend {
    base_url: String,
    client: reqwest::Client,
}

impl Backend {
    /// Validate the base URL (http/https with a host, trailing slashes
    /// stripped) and build a client with a finite per-call timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url.trim())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidBaseUrl(
                "base URL must start with http:// or https://".into(),
            ));
        }
        if parsed.host_str().is_none() {
            return Err(Error::InvalidBaseUrl(
                "base URL must include a host (and optional port)".into(),
            ));
        }
        let mut normalized = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.authority()
        );
        let path = parsed.path().trim_end_matches('/');
        normalized.push_str(path);

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: normalized,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One JSON round trip. All failure modes come back as `{ok: false}`
    /// payloads; a timeout is distinguished so callers can tell a slow
    /// backend from a broken one.
    pub async fn request_json(&self, method: &str, path: &str, payload: Option<&Value>) -> Value {
        let url = format!("{}{path}", self.base_url);
        let mut request = match method {
            "GET" => self.client.get(&url),
            _ => self.client.post(&url),
        };
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(url, "backend request timed out");
                return json!({"ok": false, "error": "backend_timeout", "reason": e.to_string()});
            },
            Err(e) => {
                warn!(url, error = %e, "backend request failed");
                return json!({"ok": false, "error": e.to_string()});
            },
        };

        let status = response.status();
        let raw = match response.text().await {
            Ok(raw) => raw,
            Err(e) => return json!({"ok": false, "error": e.to_string()}),
        };

        if !status.is_success() {
            // Error bodies are still useful payloads when they parse.
            return match serde_json::from_str::<Value>(&raw) {
                Ok(parsed) => json!({
                    "ok": false,
                    "error": "http_error",
                    "status": status.as_u16(),
                    "response": parsed,
                }),
                Err(_) => json!({
                    "ok": false,
                    "error": "http_error",
                    "status": status.as_u16(),
                    "response": raw,
                }),
            };
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) if parsed.is_object() => parsed,
            _ => json!({"ok": false, "error": "invalid_backend_response", "raw": raw}),
        }
    }

    /// Fetch the backend catalog as a name-keyed map. A failed fetch yields
    /// an empty map, matching the cache's "nothing known" state.
    pub async fn fetch_tools(&self) -> HashMap<String, RegisteredTool> {
        let response = self.request_json("GET", "/tools/list", None).await;
        let mut tools = HashMap::new();
        if response["ok"] == json!(true)
            && let Some(entries) = response["tools"].as_array()
        {
            for entry in entries {
                match serde_json::from_value::<RegisteredTool>(entry.clone()) {
                    Ok(tool) => {
                        tools.insert(tool.name.clone(), tool);
                    },
                    Err(e) => debug!(error = %e, "skipping malformed tool definition"),
                }
            }
        }
        tools
    }

    pub async fn call_tool(&self, tool: &RegisteredTool, arguments: &Value) -> Value {
        let payload = (tool.method != "GET").then_some(arguments);
        self.request_json(&tool.method, &tool.path, payload).await
    }
}
