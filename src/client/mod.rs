//! HTTP client for the board API.
//!
//! `TrackrClient` is constructed explicitly with a base URL and the caller's
//! user id; there is no global client. The `BoardApi` trait is the seam the
//! drag session talks through, so tests can substitute an in-process fake.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::board::api::USER_HEADER;
use crate::board::models::*;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// The calls a board view needs from the server.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn move_application(
        &self,
        application_id: &str,
        stage_id: &str,
        position: i64,
    ) -> Result<Application, ClientError>;

    async fn list_applications(
        &self,
        workspace_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<Application>, ClientError>;

    async fn get_board(&self, pipeline_id: &str) -> Result<BoardView, ClientError>;
}

#[derive(Debug, Clone)]
pub struct TrackrClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl TrackrClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, user_id)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    /// A client acting as another user, sharing the connection pool.
    pub fn as_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            user_id: user_id.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let req = if self.user_id.is_empty() {
            req
        } else {
            req.header(USER_HEADER, &self.user_id)
        };
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            tracing::debug!(status = status.as_u16(), %message, "board api error");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        self.send(self.http.get(self.url("/health"))).await
    }

    pub async fn register_user(&self, email: &str, name: Option<&str>) -> Result<User, ClientError> {
        self.send(
            self.http
                .post(self.url("/api/users"))
                .json(&json!({"email": email, "name": name})),
        )
        .await
    }

    pub async fn create_workspace(&self, name: &str) -> Result<Workspace, ClientError> {
        self.send(
            self.http
                .post(self.url("/api/workspaces"))
                .json(&json!({"name": name})),
        )
        .await
    }

    pub async fn create_pipeline(
        &self,
        workspace_id: &str,
        name: &str,
        is_default: bool,
    ) -> Result<Pipeline, ClientError> {
        self.send(
            self.http
                .post(self.url(&format!("/api/workspaces/{}/pipelines", workspace_id)))
                .json(&json!({"name": name, "isDefault": is_default})),
        )
        .await
    }

    pub async fn list_stages(&self, pipeline_id: &str) -> Result<Vec<Stage>, ClientError> {
        self.send(
            self.http
                .get(self.url(&format!("/api/pipelines/{}/stages", pipeline_id))),
        )
        .await
    }

    pub async fn create_application(
        &self,
        workspace_id: &str,
        pipeline_id: &str,
        stage_id: &str,
        company: &str,
        role: &str,
    ) -> Result<Application, ClientError> {
        self.send(
            self.http
                .post(self.url(&format!("/api/workspaces/{}/applications", workspace_id)))
                .json(&json!({
                    "pipelineId": pipeline_id,
                    "stageId": stage_id,
                    "company": company,
                    "role": role,
                })),
        )
        .await
    }

    pub async fn list_activities(&self, application_id: &str) -> Result<Vec<Activity>, ClientError> {
        self.send(self.http.get(self.url(&format!(
            "/api/applications/{}/activities",
            application_id
        ))))
        .await
    }
}

#[async_trait]
impl BoardApi for TrackrClient {
    async fn move_application(
        &self,
        application_id: &str,
        stage_id: &str,
        position: i64,
    ) -> Result<Application, ClientError> {
        self.send(
            self.http
                .patch(self.url(&format!("/api/applications/{}/move", application_id)))
                .json(&json!({"stageId": stage_id, "position": position})),
        )
        .await
    }

    async fn list_applications(
        &self,
        workspace_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<Application>, ClientError> {
        self.send(
            self.http
                .get(self.url(&format!("/api/workspaces/{}/applications", workspace_id)))
                .query(&[("pipelineId", pipeline_id)]),
        )
        .await
    }

    async fn get_board(&self, pipeline_id: &str) -> Result<BoardView, ClientError> {
        self.send(
            self.http
                .get(self.url(&format!("/api/pipelines/{}/board", pipeline_id))),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = TrackrClient::new("http://localhost:3141/", "u1");
        assert_eq!(client.url("/health"), "http://localhost:3141/health");
    }

    #[test]
    fn test_as_user_keeps_base_url() {
        let client = TrackrClient::new("http://localhost:3141", "");
        let other = client.as_user("u2");
        assert_eq!(other.user_id, "u2");
        assert_eq!(other.base_url, "http://localhost:3141");
    }

    #[test]
    fn test_api_error_display_and_status() {
        let err = ClientError::Api {
            status: 404,
            message: "Application x not found".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404: Application x not found");
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let client = TrackrClient::new("http://127.0.0.1:9", "u1");
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
