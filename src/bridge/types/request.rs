use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::{DEFAULT_USER_ID, Result};

/// Version of the request schema, sent as `v` in every payload.
pub const SCHEMA_VERSION: u64 = 1;

/// Field carrying the correlation id in requests and responses.
pub const REQUEST_ID_FIELD: &str = "request_id";

pub const DEFAULT_MODEL: &str = "gemini";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const NATURAL_LANGUAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// The kinds of request the bridge can send.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RequestKind {
    BashCommand,
    NaturalLanguage,
    ExecuteCommand,
    JoinWorkspace,
}

impl RequestKind {
    /// Event the request is emitted on.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::BashCommand => "bash_command",
            Self::NaturalLanguage => "natural_language",
            Self::ExecuteCommand => "execute_command",
            Self::JoinWorkspace => "join_workspace",
        }
    }

    /// Event the server answers on, `None` for fire-and-forget requests.
    #[must_use]
    pub const fn response_event(self) -> Option<&'static str> {
        match self {
            Self::BashCommand | Self::ExecuteCommand => Some("command_result"),
            Self::NaturalLanguage => Some("assistant_response"),
            Self::JoinWorkspace => None,
        }
    }

    #[must_use]
    pub const fn default_timeout(self) -> Duration {
        match self {
            Self::NaturalLanguage => NATURAL_LANGUAGE_TIMEOUT,
            Self::BashCommand | Self::ExecuteCommand | Self::JoinWorkspace => COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn timeout_message(self) -> &'static str {
        match self {
            Self::NaturalLanguage => "Natural language processing timed out",
            Self::BashCommand | Self::ExecuteCommand | Self::JoinWorkspace => {
                "Command execution timed out"
            }
        }
    }

    /// Message used when the server reports failure without an `error` string.
    #[must_use]
    pub const fn failure_message(self) -> &'static str {
        match self {
            Self::NaturalLanguage => "Natural language processing failed",
            Self::BashCommand | Self::ExecuteCommand | Self::JoinWorkspace => {
                "Command execution failed"
            }
        }
    }

    /// Whether the request may wait in the command queue while disconnected.
    #[must_use]
    pub const fn is_queueable(self) -> bool {
        matches!(self, Self::BashCommand)
    }
}

/// Run a shell command in the user's workspace, answered by `command_result`.
///
/// # Example
///
/// ```
/// use codestorm_bridge::bridge::types::CommandRequest;
///
/// let request = CommandRequest::builder().command("ls -la").build();
/// assert_eq!(request.user_id, "default");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Builder)]
#[builder(on(String, into))]
pub struct CommandRequest {
    pub command: String,
    #[builder(default = DEFAULT_USER_ID.to_owned())]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    /// Working directory relative to the workspace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Natural-language instruction for the assistant, answered by `assistant_response`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Builder)]
#[builder(on(String, into))]
pub struct NaturalLanguageRequest {
    pub text: String,
    #[builder(default = DEFAULT_MODEL.to_owned())]
    pub model: String,
    #[builder(default = DEFAULT_USER_ID.to_owned())]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Command typed into a specific terminal session.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Builder)]
#[builder(on(String, into))]
pub struct ExecuteCommandRequest {
    pub command: String,
    pub terminal_id: String,
    #[builder(default = DEFAULT_USER_ID.to_owned())]
    pub user_id: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Builder)]
#[builder(on(String, into))]
pub struct JoinWorkspaceRequest {
    pub workspace_id: String,
}

/// A request on the socket, validated before it is emitted.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    BashCommand(CommandRequest),
    NaturalLanguage(NaturalLanguageRequest),
    ExecuteCommand(ExecuteCommandRequest),
    JoinWorkspace(JoinWorkspaceRequest),
}

impl Request {
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::BashCommand(_) => RequestKind::BashCommand,
            Self::NaturalLanguage(_) => RequestKind::NaturalLanguage,
            Self::ExecuteCommand(_) => RequestKind::ExecuteCommand,
            Self::JoinWorkspace(_) => RequestKind::JoinWorkspace,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::BashCommand(request) => {
                require("command", &request.command)?;
                require("user_id", &request.user_id)?;
                if let Some(terminal_id) = &request.terminal_id {
                    require("terminal_id", terminal_id)?;
                }
            }
            Self::NaturalLanguage(request) => {
                require("text", &request.text)?;
                require("model", &request.model)?;
                require("user_id", &request.user_id)?;
            }
            Self::ExecuteCommand(request) => {
                require("command", &request.command)?;
                require("terminal_id", &request.terminal_id)?;
                require("user_id", &request.user_id)?;
            }
            Self::JoinWorkspace(request) => require("workspace_id", &request.workspace_id)?,
        }

        Ok(())
    }

    /// The JSON body emitted on the wire: the request fields plus the schema
    /// version and, when given, the correlation id.
    pub fn to_payload(&self, request_id: Option<&str>) -> Result<Value> {
        let value = match self {
            Self::BashCommand(request) => serde_json::to_value(request)?,
            Self::NaturalLanguage(request) => serde_json::to_value(request)?,
            Self::ExecuteCommand(request) => serde_json::to_value(request)?,
            Self::JoinWorkspace(request) => serde_json::to_value(request)?,
        };

        let Value::Object(mut fields) = value else {
            return Err(Error::validation(format!(
                "{} payload must serialize to an object",
                self.kind()
            )));
        };

        fields.insert("v".to_owned(), Value::from(SCHEMA_VERSION));
        if let Some(id) = request_id {
            fields.insert(REQUEST_ID_FIELD.to_owned(), Value::from(id));
        }

        Ok(Value::Object(fields))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

impl From<CommandRequest> for Request {
    fn from(request: CommandRequest) -> Self {
        Self::BashCommand(request)
    }
}

impl From<NaturalLanguageRequest> for Request {
    fn from(request: NaturalLanguageRequest) -> Self {
        Self::NaturalLanguage(request)
    }
}

impl From<ExecuteCommandRequest> for Request {
    fn from(request: ExecuteCommandRequest) -> Self {
        Self::ExecuteCommand(request)
    }
}

impl From<JoinWorkspaceRequest> for Request {
    fn from(request: JoinWorkspaceRequest) -> Self {
        Self::JoinWorkspace(request)
    }
}

/// Reads the correlation id from a response payload, if any.
pub(crate) fn request_id_of(payload: &Value) -> Option<&str> {
    payload.get(REQUEST_ID_FIELD).and_then(Value::as_str)
}

/// `true` when the payload reports success.
pub(crate) fn is_success(payload: &Value) -> bool {
    payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// The server's `error` string, or `fallback` when it is missing or empty.
pub(crate) fn error_message(payload: &Value, fallback: &str) -> String {
    payload
        .get("error")
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or(fallback)
        .to_owned()
}
