//! Calling tools on Model Context Protocol servers over stdio.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::McpServerConfig;

const PROTOCOL_VERSION: &str = "2024-11-05";
pub const EMPTY_TOOL_OUTPUT: &str = "(no text output from MCP tool)";

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server '{server}' is not configured")]
    UnknownServer { server: String },

    #[error("failed to start MCP server '{server}': {source}")]
    Launch {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error talking to MCP server '{server}': {source}")]
    Io {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("MCP server '{server}' closed the connection before responding")]
    Closed { server: String },

    #[error("invalid response from MCP server '{server}': {message}")]
    Protocol { server: String, message: String },

    #[error("MCP error from '{server}': [{code}] {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP tool '{tool}' on '{server}' reported an error: {message}")]
    ToolFailed {
        server: String,
        tool: String,
        message: String,
    },
}

pub trait McpGateway: Send + Sync {
    /// Calls `tool` on `server` and returns its text output.
    fn call(&self, server: &str, tool: &str, arguments: Value) -> Result<String, McpError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Spawns the configured server for each call and speaks newline-delimited JSON-RPC 2.0.
#[derive(Debug, Clone)]
pub struct StdioMcpGateway {
    servers: BTreeMap<String, McpServerConfig>,
    workspace: PathBuf,
}

impl StdioMcpGateway {
    #[must_use]
    pub fn new(servers: BTreeMap<String, McpServerConfig>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            servers,
            workspace: workspace.into(),
        }
    }
}

impl McpGateway for StdioMcpGateway {
    fn call(&self, server: &str, tool: &str, arguments: Value) -> Result<String, McpError> {
        let config = self
            .servers
            .get(server)
            .ok_or_else(|| McpError::UnknownServer {
                server: server.to_string(),
            })?;

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| McpError::Launch {
                server: server.to_string(),
                source,
            })?;

        let result = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => {
                let mut session = StdioSession {
                    server,
                    stdin,
                    lines: BufReader::new(stdout).lines(),
                    next_id: 0,
                };
                session.call_tool(tool, arguments)
            }
            _ => Err(McpError::Protocol {
                server: server.to_string(),
                message: "server stdio was not captured".to_string(),
            }),
        };

        shutdown(&mut child);
        result
    }
}

struct StdioSession<'a> {
    server: &'a str,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl StdioSession<'_> {
    fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<String, McpError> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "coding-agent", "version": env!("CARGO_PKG_VERSION")}
            }),
        )?;
        self.send(None, "notifications/initialized", None)?;
        let result = self.request(
            "tools/call",
            json!({"name": tool, "arguments": arguments}),
        )?;
        text_output(self.server, tool, result)
    }

    fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(Some(id), method, Some(params))?;

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(source)) => return Err(self.io(source)),
                None => {
                    return Err(McpError::Closed {
                        server: self.server.to_string(),
                    })
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(&line).map_err(|error| self.protocol(error))?;
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                debug!(server = self.server, "skipping unrelated MCP message");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(|error| self.protocol(error))?;
            if let Some(error) = response.error {
                return Err(McpError::Rpc {
                    server: self.server.to_string(),
                    code: error.code,
                    message: error.message,
                });
            }
            return response.result.ok_or_else(|| McpError::Protocol {
                server: self.server.to_string(),
                message: format!("no result for {method}"),
            });
        }
    }

    fn send(&mut self, id: Option<u64>, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request).map_err(|error| self.protocol(error))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(|source| self.io(source))
    }

    fn io(&self, source: io::Error) -> McpError {
        McpError::Io {
            server: self.server.to_string(),
            source,
        }
    }

    fn protocol(&self, error: serde_json::Error) -> McpError {
        McpError::Protocol {
            server: self.server.to_string(),
            message: error.to_string(),
        }
    }
}

fn shutdown(child: &mut Child) {
    drop(child.stdin.take());
    let _ = child.kill();
    let _ = child.wait();
}

fn text_output(server: &str, tool: &str, result: Value) -> Result<String, McpError> {
    let result: CallToolResult =
        serde_json::from_value(result).map_err(|error| McpError::Protocol {
            server: server.to_string(),
            message: error.to_string(),
        })?;

    let text = result
        .content
        .iter()
        .filter(|item| item.content_type == "text")
        .filter_map(|item| item.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error {
        return Err(McpError::ToolFailed {
            server: server.to_string(),
            tool: tool.to_string(),
            message: text,
        });
    }
    if text.is_empty() {
        return Ok(EMPTY_TOOL_OUTPUT.to_string());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::{text_output, McpError, EMPTY_TOOL_OUTPUT};

    #[test]
    fn text_items_are_joined_and_other_items_ignored() {
        let output = text_output(
            "fs",
            "read",
            json!({"content": [
                {"type": "text", "text": "one"},
                {"type": "image", "data": "aGk="},
                {"type": "text", "text": "two"}
            ]}),
        )
        .expect("text output");
        assert_eq!(output, "one\ntwo");
    }

    #[test]
    fn empty_and_error_results_are_distinguished() {
        assert_eq!(
            text_output("fs", "read", json!({"content": []})).expect("empty output"),
            EMPTY_TOOL_OUTPUT
        );
        assert_matches!(
            text_output(
                "fs",
                "read",
                json!({"content": [{"type": "text", "text": "denied"}], "isError": true})
            ),
            Err(McpError::ToolFailed { message, .. }) if message == "denied"
        );
    }
}
