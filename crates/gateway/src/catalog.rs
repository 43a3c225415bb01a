//! Static registry of the tools this gateway serves. `GET /tools/list`
//! returns it verbatim; the stdio bridge mirrors it as MCP tools.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
};

/// One advertised tool: how to call it over HTTP and what the request body
/// looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub method: String,
    pub path: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<Value>,
}

fn tool(name: &str, method: &str, path: &str, description: &str, schema: Option<Value>) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        method: method.into(),
        path: path.into(),
        description: description.into(),
        request_schema: schema,
    }
}

/// JSON-schema object with the given properties and required keys.
fn schema(properties: Value, required: &[&str]) -> Option<Value> {
    Some(json!({
        "type": "object",
        "properties": properties,
        "required": required,
    }))
}

pub fn tool_catalog() -> Vec<ToolDefinition> {
    let cmd_schema = json!({
        "cmd": {
            "description": "Command as a shell-style string or argv array",
            "anyOf": [
                {"type": "string"},
                {"type": "array", "items": {"type": "string"}}
            ]
        },
        "cwd": {"type": ["string", "null"]},
        "env": {"type": ["object", "null"], "additionalProperties": {"type": "string"}},
    });
    let mut exec_props = cmd_schema.clone();
    exec_props["timeout_s"] = json!({"type": "integer", "minimum": 1});
    let mut start_props = cmd_schema;
    start_props["capture_output"] = json!({"type": "boolean", "default": true});

    vec![
        tool("health", "GET", "/health", "Health check", None),
        tool(
            "exec.run",
            "POST",
            "/exec/run",
            "Run a command to completion",
            Some(json!({"type": "object", "properties": exec_props, "required": ["cmd"]})),
        ),
        tool(
            "fs.read",
            "POST",
            "/fs/read",
            "Read a file",
            schema(
                json!({
                    "path": {"type": "string"},
                    "max_bytes": {"type": ["integer", "null"], "minimum": 1},
                }),
                &["path"],
            ),
        ),
        tool(
            "fs.write",
            "POST",
            "/fs/write",
            "Write a file",
            schema(
                json!({
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "mode": {"type": "string", "enum": ["overwrite", "append"]},
                }),
                &["path", "content"],
            ),
        ),
        tool(
            "fs.list",
            "POST",
            "/fs/list",
            "List directory contents",
            schema(
                json!({
                    "path": {"type": "string", "default": "."},
                    "max_entries": {"type": ["integer", "null"], "minimum": 1},
                }),
                &[],
            ),
        ),
        tool(
            "search.text",
            "POST",
            "/search/text",
            "Regex search over files",
            schema(
                json!({
                    "pattern": {"type": "string"},
                    "path": {"type": "string", "default": "."},
                    "case_sensitive": {"type": ["boolean", "null"]},
                    "max_results": {"type": ["integer", "null"], "minimum": 1},
                }),
                &["pattern"],
            ),
        ),
        tool(
            "process.start",
            "POST",
            "/process/start",
            "Start a supervised process",
            Some(json!({"type": "object", "properties": start_props, "required": ["cmd"]})),
        ),
        tool(
            "process.status",
            "POST",
            "/process/status",
            "Process status",
            schema(json!({"pid": {"type": "integer"}}), &["pid"]),
        ),
        tool(
            "process.kill",
            "POST",
            "/process/kill",
            "Terminate a supervised process",
            schema(
                json!({
                    "pid": {"type": "integer"},
                    "force": {"type": "boolean", "default": false},
                    "timeout_s": {"type": "integer", "default": 5},
                }),
                &["pid"],
            ),
        ),
        tool(
            "process.read",
            "POST",
            "/process/read",
            "Read captured process output",
            schema(
                json!({
                    "pid": {"type": "integer"},
                    "stream": {"type": "string", "enum": ["stdout", "stderr"], "default": "stdout"},
                    "max_bytes": {"type": "integer", "default": 20000},
                    "tail": {"type": "boolean", "default": true},
                }),
                &["pid"],
            ),
        ),
        tool(
            "process.list",
            "POST",
            "/process/list",
            "List supervised processes",
            None,
        ),
        tool(
            "archive.pack",
            "POST",
            "/archive/pack",
            "Pack a directory into a tar.gz archive",
            schema(
                json!({
                    "src": {"type": "string"},
                    "dest": {"type": "string"},
                    "overwrite": {"type": "boolean", "default": false},
                }),
                &["src", "dest"],
            ),
        ),
        tool(
            "archive.unpack",
            "POST",
            "/archive/unpack",
            "Extract a tar.gz archive",
            schema(
                json!({
                    "src": {"type": "string"},
                    "dest": {"type": "string"},
                    "overwrite": {"type": "boolean", "default": false},
                }),
                &["src", "dest"],
            ),
        ),
    ]
}
