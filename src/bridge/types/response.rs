use serde::Deserialize;
use serde_json::Value;

use crate::Result;
use crate::serde_helpers::deserialize_with_warnings;
use crate::ws::Event;

/// Payload of a `command_result` event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    /// Process exit status
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub terminal_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Payload of an `assistant_response` event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// What the assistant did, e.g. `createFile`, `executeCommand`, `generic`
    #[serde(default, rename = "type")]
    pub response_type: Option<String>,
    #[serde(default)]
    pub file_info: Option<FileRef>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "request_id")]
    pub request_id: Option<String>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileRef {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A file in the workspace was created, modified or deleted.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileChange {
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl FileChange {
    /// The changed path, from either `file.path` or `file_path`.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.file
            .as_ref()
            .map(|file| file.path.as_str())
            .or(self.file_path.as_deref())
    }

    /// Changes addressed to another user are only relevant when broadcast.
    #[must_use]
    pub fn is_relevant_to(&self, user_id: &str) -> bool {
        self.broadcast || self.user_id.as_deref().is_none_or(|owner| owner == user_id)
    }
}

/// The server asks clients to refresh their file listing.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileSync {
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// A command finished somewhere in the user's workspace.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandExecuted {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// A file-modifying shell command ran; the server names what it touched.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileCommand {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default, rename = "type")]
    pub change_type: Option<String>,
    #[serde(default)]
    pub file: Option<FileTarget>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl FileCommand {
    /// The touched path, falling back to the command text when none was sent.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match &self.file {
            Some(FileTarget::Path(path)) => Some(path),
            Some(FileTarget::File(file)) => Some(&file.path),
            None => self.command.as_deref(),
        }
    }
}

/// A file given either as a bare path or as a file object.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FileTarget {
    Path(String),
    File(FileRef),
}

/// Unsolicited server events.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    FileChange(FileChange),
    FileSync(FileSync),
    CommandExecuted(CommandExecuted),
    FileCommand(FileCommand),
}

impl Notification {
    pub const FILE_CHANGE: &'static str = "file_change";
    pub const FILE_SYNC: &'static str = "file_sync";
    pub const COMMAND_EXECUTED: &'static str = "command_executed";
    pub const FILE_COMMAND: &'static str = "file_command";

    /// Parses `event` if it is a notification; other events yield `Ok(None)`.
    pub fn from_event(event: &Event) -> Result<Option<Self>> {
        let notification = match event.name.as_str() {
            Self::FILE_CHANGE => Self::FileChange(parse(&event.data)?),
            Self::FILE_SYNC => Self::FileSync(parse(&event.data)?),
            Self::COMMAND_EXECUTED => Self::CommandExecuted(parse(&event.data)?),
            Self::FILE_COMMAND => Self::FileCommand(parse(&event.data)?),
            _ => return Ok(None),
        };

        Ok(Some(notification))
    }

    /// Whether a client acting as `user_id` should see this notification.
    #[must_use]
    pub fn is_relevant_to(&self, user_id: &str) -> bool {
        match self {
            Self::FileChange(change) => change.is_relevant_to(user_id),
            Self::FileSync(_) | Self::CommandExecuted(_) | Self::FileCommand(_) => true,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T> {
    deserialize_with_warnings(data.clone())
}
