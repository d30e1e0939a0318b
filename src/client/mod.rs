pub mod types;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::guard::SessionAuthority;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;
use tracing::debug;
use types::*;

/// HTTP client for the status, cancel and trigger endpoints.
///
/// Replies come back unclassified; deciding whether a status code means
/// "retry", "stop" or "log out" is the fetch guard's job.
pub struct OperationClient {
    api_root: String,
    fallback_token: Option<String>,
    session: Arc<dyn SessionAuthority>,
    http_client: reqwest::Client,
}

impl OperationClient {
    pub fn new(config: &TrackerConfig, session: Arc<dyn SessionAuthority>) -> TrackerResult<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            api_root: config.api_root().to_string(),
            fallback_token: config.auth_token.clone(),
            session,
            http_client: builder.build()?,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_root, path);
        let request = self.http_client.request(method, url);
        match self.session.auth_token().or_else(|| self.fallback_token.clone()) {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> TrackerResult<ApiReply> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiReply { status, body })
    }

    /// Fetch the current status of one operation
    pub async fn fetch_status(&self, kind: OperationKind, id: &str) -> TrackerResult<ApiReply> {
        let path = kind.status_path(id);
        debug!(%kind, id, %path, "fetching operation status");
        self.send(self.request(Method::GET, &path)).await
    }

    /// Ask the server to abort one operation
    pub async fn cancel(&self, kind: OperationKind, id: &str) -> TrackerResult<ApiReply> {
        let path = kind
            .cancel_path(id)
            .ok_or_else(|| TrackerError::UnsupportedOperation(format!("{} operations cannot be canceled", kind)))?;
        debug!(%kind, id, %path, "requesting cancel");
        self.send(self.request(Method::DELETE, &path)).await
    }

    /// Start a new operation
    pub async fn trigger(&self, kind: OperationKind, request: &TriggerRequest) -> TrackerResult<ApiReply> {
        let path = kind.trigger_path(request.target.as_deref());
        debug!(%kind, name = %request.name, %path, "triggering operation");
        self.send(self.request(Method::POST, &path).json(request)).await
    }
}
