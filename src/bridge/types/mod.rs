pub mod request;
pub mod response;

pub(crate) use request::{error_message, is_success, request_id_of};
pub use request::{
    CommandRequest, DEFAULT_MODEL, ExecuteCommandRequest, JoinWorkspaceRequest,
    NaturalLanguageRequest, REQUEST_ID_FIELD, Request, RequestKind, SCHEMA_VERSION,
};
pub use response::{
    AssistantResponse, CommandExecuted, CommandResult, FileChange, FileCommand, FileRef, FileSync,
    FileTarget, Notification,
};
