use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of server-side job, which decides the endpoints used to drive it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Backup,
    Restore,
    ImageRewrite,
    ProviderReconcile,
}

impl OperationKind {
    pub fn status_path(&self, id: &str) -> String {
        match self {
            OperationKind::Backup => format!("/api/v1/snapshot/{}", id),
            OperationKind::Restore => format!("/api/v1/snapshot/{}/restore-status", id),
            OperationKind::ImageRewrite => format!("/api/v1/image-rewrite/{}/status", id),
            OperationKind::ProviderReconcile => format!("/api/v1/snapshots/settings/reconcile/{}", id),
        }
    }

    /// `None` when the platform offers no way to abort this kind of job
    pub fn cancel_path(&self, id: &str) -> Option<String> {
        match self {
            OperationKind::Backup => Some(format!("/api/v1/snapshot/{}", id)),
            OperationKind::Restore => Some(format!("/api/v1/snapshot/{}/restore", id)),
            OperationKind::ImageRewrite => Some(format!("/api/v1/image-rewrite/{}", id)),
            OperationKind::ProviderReconcile => None,
        }
    }

    pub fn trigger_path(&self, target: Option<&str>) -> String {
        match (self, target) {
            (OperationKind::Backup, _) => "/api/v1/snapshot/backup".to_string(),
            (OperationKind::Restore, Some(backup)) => format!("/api/v1/snapshot/{}/restore", backup),
            (OperationKind::Restore, None) => "/api/v1/snapshot/restore".to_string(),
            (OperationKind::ImageRewrite, _) => "/api/v1/image-rewrite".to_string(),
            (OperationKind::ProviderReconcile, _) => "/api/v1/snapshots/settings/reconcile".to_string(),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
            OperationKind::ImageRewrite => "image-rewrite",
            OperationKind::ProviderReconcile => "provider-reconcile",
        };
        f.write_str(name)
    }
}

/// Status payload as returned by a status-fetch endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawOperationPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "status")]
    pub phase: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<RawMessage>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub warnings: Vec<RawMessage>,
    #[serde(default, alias = "subUnits", deserialize_with = "null_as_empty")]
    pub volumes: Vec<RawSubUnit>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RawMessage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawSubUnit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub completion_percent: Option<f64>,
    #[serde(default)]
    pub time_remaining_seconds: Option<u64>,
}

/// `{ "error": "..." }` body carried by non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Body sent to a trigger endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TriggerRequest {
    /// Name the operation will be known by until the server assigns an id
    pub name: String,
    /// Backup to restore from, app to back up, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TriggerRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Trigger endpoints return an id, a name, or (legacy flows) nothing at all
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Unclassified HTTP reply: status plus raw body
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: String,
}

impl ApiReply {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The `error` field of a structured error body, if there is one
    pub fn error_message(&self) -> Option<String> {
        serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .map(|b| b.error)
            .filter(|m| !m.trim().is_empty())
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
