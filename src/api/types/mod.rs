use serde::Deserialize;

pub mod request;
pub mod response;

pub use request::{DeleteFileRequest, FilesRequest, ProcessInstructionsRequest};
pub use response::{
    DeleteFileResponse, FileEntry, FilesResponse, HealthResponse, PingResponse,
    ProcessInstructionsResponse, StatusResponse,
};

/// What a workspace listing entry is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum EntryKind {
    File,
    Directory,
    /// Unknown kind from the API (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}
