//! Request/response surface for a host application shell
//!
//! [`TunnelService`] wraps a [`TunnelManager`] in the three calls a host UI
//! makes (start, stop, query) and answers with plain result values. The
//! JSON form ([`TunnelService::handle_json`]) lets a host drive the agent
//! over any line-oriented channel; the manager knows nothing about it.

use crate::tunnel::{StartOutcome, StopOutcome, TunnelManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Error code for a missing or unusable share link
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";

/// Outcome of a start or stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub message: String,
}

impl CommandResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            error_code: None,
            message: message.into(),
        }
    }

    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

/// Host request, tagged by method name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRequest")]
pub enum Request {
    StartVpnService { config_link: Option<String> },
    StopVpnService,
    IsVpnRunning,
}

/// Wire form of a [`Request`]; `args` may be absent or null
#[derive(Deserialize)]
struct RawRequest {
    method: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Default, Deserialize)]
struct StartArgs {
    #[serde(rename = "configLink", default)]
    config_link: Option<String>,
}

impl TryFrom<RawRequest> for Request {
    type Error = String;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        match raw.method.as_str() {
            "startVpnService" => {
                let args = if raw.args.is_null() {
                    StartArgs::default()
                } else {
                    StartArgs::deserialize(raw.args)
                        .map_err(|e| format!("invalid startVpnService args: {}", e))?
                };
                Ok(Request::StartVpnService {
                    config_link: args.config_link,
                })
            }
            "stopVpnService" => Ok(Request::StopVpnService),
            "isVpnRunning" => Ok(Request::IsVpnRunning),
            other => Err(format!("unknown method {:?}", other)),
        }
    }
}

/// Reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Success { value: serde_json::Value },
    Error { code: String, message: String },
    NotImplemented { method: String },
}

impl From<CommandResult> for Response {
    fn from(result: CommandResult) -> Self {
        if result.success {
            Response::Success {
                value: serde_json::Value::String(result.message),
            }
        } else {
            Response::Error {
                code: result.error_code.unwrap_or_default(),
                message: result.message,
            }
        }
    }
}

/// Host-facing wrapper around a [`TunnelManager`]
#[derive(Debug, Clone)]
pub struct TunnelService {
    manager: Arc<TunnelManager>,
}

impl TunnelService {
    pub fn new(manager: Arc<TunnelManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<TunnelManager> {
        &self.manager
    }

    /// Start the tunnel for a share link
    pub fn start_tunnel(&self, uri: Option<&str>) -> CommandResult {
        let uri = match uri.map(str::trim) {
            Some(uri) if !uri.is_empty() => uri,
            _ => return CommandResult::error(CONFIG_ERROR, "Config link is missing."),
        };

        match self.manager.start(uri) {
            Ok(StartOutcome::Started {
                local_addr,
                endpoint,
            }) => CommandResult::ok(format!(
                "Tunnel started on {} via {}",
                local_addr, endpoint
            )),
            Ok(StartOutcome::AlreadyRunning { local_addr, .. }) => {
                CommandResult::ok(format!("Tunnel already running on {}", local_addr))
            }
            Err(e) if e.is_permission() => {
                CommandResult::error(e.code(), "User denied tunnel permission.")
            }
            Err(e) => CommandResult::error(e.code(), e.to_string()),
        }
    }

    pub fn stop_tunnel(&self) -> CommandResult {
        match self.manager.stop() {
            StopOutcome::Stopped => CommandResult::ok("Tunnel stopped."),
            StopOutcome::AlreadyStopped => CommandResult::ok("Tunnel was not running."),
        }
    }

    pub fn query_status(&self) -> bool {
        self.manager.status()
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::StartVpnService { config_link } => {
                self.start_tunnel(config_link.as_deref()).into()
            }
            Request::StopVpnService => self.stop_tunnel().into(),
            Request::IsVpnRunning => Response::Success {
                value: serde_json::Value::Bool(self.query_status()),
            },
        }
    }

    /// Handle one JSON-encoded request and encode the reply
    pub fn handle_json(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(e) => {
                debug!("Unhandled request {:?}: {}", line, e);
                Response::NotImplemented {
                    method: method_name(line).unwrap_or_default(),
                }
            }
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(
                r#"{{"status":"error","code":"INTERNAL","message":"{}"}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

/// Best-effort `method` field of a request that did not parse
fn method_name(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("method")?.as_str().map(str::to_string)
}
