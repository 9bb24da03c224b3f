use bon::Builder;
use serde::Serialize;

/// Body of `POST /api/process_instructions`.
///
/// # Example
///
/// ```
/// use codestorm_bridge::api::types::ProcessInstructionsRequest;
///
/// let request = ProcessInstructionsRequest::builder()
///     .instruction("listar archivos")
///     .command_only(true)
///     .build();
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Builder)]
#[builder(on(String, into))]
pub struct ProcessInstructionsRequest {
    pub instruction: String,
    /// Assistant model; the server picks its own default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Ask for the bare command without the echoed instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_only: Option<bool>,
}

/// Query of `GET /api/files`.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Builder)]
#[builder(on(String, into))]
pub struct FilesRequest {
    /// Directory relative to the workspace root, `.` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Body of `POST /api/file/delete`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Builder)]
#[builder(on(String, into))]
pub struct DeleteFileRequest {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}
