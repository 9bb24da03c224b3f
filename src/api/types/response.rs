use std::collections::HashMap;

use bon::Builder;
use serde::Deserialize;

use super::EntryKind;

/// Response of `GET /api/status`.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    /// `online` when the API is healthy.
    pub status: String,
    pub message: Option<String>,
    /// Server time in seconds since the Unix epoch.
    pub timestamp: Option<f64>,
}

/// Response of `GET /api/ping`.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct PingResponse {
    pub status: String,
    pub message: Option<String>,
}

/// Response of `GET /api/health`.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Option<f64>,
    pub version: Option<String>,
    /// Per-provider state, e.g. `"gemini": "ok"` or `"openai": "not configured"`.
    #[serde(default)]
    #[builder(default)]
    pub apis: HashMap<String, String>,
    #[serde(default)]
    #[builder(default)]
    pub chat_api_available: bool,
    #[serde(default)]
    #[builder(default)]
    pub available_models: Vec<String>,
    pub error: Option<String>,
}

/// Response of `POST /api/process_instructions`.
///
/// Either `command` is set, or `error` explains what is missing from the
/// instruction (with `needs_more_info` set).
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct ProcessInstructionsResponse {
    pub command: Option<String>,
    pub original_instruction: Option<String>,
    pub model_used: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub needs_more_info: bool,
}

/// Response of `GET /api/files`.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct FilesResponse {
    pub success: bool,
    #[serde(default)]
    #[builder(default)]
    pub files: Vec<FileEntry>,
    pub directory: Option<String>,
    pub error: Option<String>,
}

/// One entry of a directory listing.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the workspace root
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    #[builder(default)]
    pub size: u64,
    /// Modification time in seconds since the Unix epoch
    pub modified: Option<f64>,
    #[serde(default)]
    #[builder(default)]
    pub extension: String,
}

/// Response of `POST /api/file/delete`.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct DeleteFileResponse {
    pub success: bool,
    pub message: Option<String>,
    pub file_path: Option<String>,
    pub is_directory: Option<bool>,
    pub error: Option<String>,
}
