use std::time::Duration;

use reqwest::{
    Client as ReqwestClient, Method,
    header::{HeaderMap, HeaderValue},
};
use url::Url;

use super::types::{
    DeleteFileRequest, DeleteFileResponse, FilesRequest, FilesResponse, HealthResponse,
    PingResponse, ProcessInstructionsRequest, ProcessInstructionsResponse, StatusResponse,
};
use crate::error::Error;
use crate::{Result, ToQueryParams as _};

/// Client for the backend's REST API.
///
/// # Example
///
/// ```no_run
/// use codestorm_bridge::api::Client;
///
/// # async fn example() -> codestorm_bridge::Result<()> {
/// let client = Client::new("http://localhost:5000")?;
///
/// let health = client.health().await?;
/// println!("models: {:?}", health.available_models);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Client {
    /// Creates a new API client for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host URL is invalid or the HTTP client fails to build.
    pub fn new(host: &str) -> Result<Client> {
        Self::build(host, None)
    }

    /// Creates a client whose every request is abandoned after `timeout`.
    pub fn with_timeout(host: &str, timeout: Duration) -> Result<Client> {
        Self::build(host, Some(timeout))
    }

    fn build(host: &str, timeout: Option<Duration>) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("codestorm_bridge"));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

        let mut builder = ReqwestClient::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            host: Url::parse(host)?,
            client: builder.build()?,
        })
    }

    /// Returns the host URL for the client.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    #[must_use]
    fn client(&self) -> &ReqwestClient {
        &self.client
    }

    /// Primary liveness endpoint.
    pub async fn status(&self) -> Result<StatusResponse> {
        let request = self
            .client()
            .request(Method::GET, format!("{}api/status", self.host()))
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Secondary liveness endpoint.
    pub async fn ping(&self) -> Result<PingResponse> {
        let request = self
            .client()
            .request(Method::GET, format!("{}api/ping", self.host()))
            .build()?;

        crate::request(&self.client, request).await
    }

    /// `HEAD /`: succeeds when the server answers with any 2xx status.
    ///
    /// The body is never read, so this also succeeds when the API routes are
    /// broken but the server itself is up.
    pub async fn root_alive(&self) -> Result<()> {
        let request = self
            .client()
            .request(Method::HEAD, self.host().as_str())
            .build()?;
        let method = request.method().clone();
        let path = request.url().path().to_owned();

        let response = self.client.execute(request).await?;
        let status_code = response.status();
        if status_code.is_success() {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(status = %status_code, "root endpoint is not healthy");

        Err(Error::status(status_code, method, path, String::new()))
    }

    /// Service health and the assistant models it has credentials for.
    pub async fn health(&self) -> Result<HealthResponse> {
        let request = self
            .client()
            .request(Method::GET, format!("{}api/health", self.host()))
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Translates a natural-language instruction into a shell command without
    /// executing it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use codestorm_bridge::api::{Client, types::ProcessInstructionsRequest};
    ///
    /// # async fn example() -> codestorm_bridge::Result<()> {
    /// let client = Client::new("http://localhost:5000")?;
    /// let request = ProcessInstructionsRequest::builder()
    ///     .instruction("crear carpeta docs")
    ///     .build();
    ///
    /// let response = client.process_instructions(&request).await?;
    /// match (response.command, response.error) {
    ///     (Some(command), _) => println!("$ {command}"),
    ///     (None, Some(missing)) => println!("need more info: {missing}"),
    ///     (None, None) => {}
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn process_instructions(
        &self,
        request: &ProcessInstructionsRequest,
    ) -> Result<ProcessInstructionsResponse> {
        if request.instruction.trim().is_empty() {
            return Err(Error::validation("instruction must not be empty"));
        }

        let request = self
            .client()
            .request(
                Method::POST,
                format!("{}api/process_instructions", self.host()),
            )
            .json(request)
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Lists a directory of the user's workspace.
    pub async fn files(&self, request: &FilesRequest) -> Result<FilesResponse> {
        let request = self
            .client()
            .request(
                Method::GET,
                format!("{}api/files{}", self.host(), request.query_params()),
            )
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Deletes a file or directory from the user's workspace.
    pub async fn delete_file(&self, request: &DeleteFileRequest) -> Result<DeleteFileResponse> {
        if request.file_path.trim().is_empty() {
            return Err(Error::validation("file_path must not be empty"));
        }

        let request = self
            .client()
            .request(Method::POST, format!("{}api/file/delete", self.host()))
            .json(request)
            .build()?;

        crate::request(&self.client, request).await
    }
}
