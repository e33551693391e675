use crate::error::BackendError;
use crate::models::{
    AgentUrlResponse, BriefingResponse, CreditRequestResponse, EndSessionRequest,
    EndSessionResponse, ErrorBody, PracticeSession, Project, ProjectInput, UserProfile,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

// The scoring backend, reduced to the operations the client consumes. The call
// controller depends on this trait rather than on `BackendClient`, so its tests
// run against `MockBackend` without a server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_profile(&self, token: &SecretString) -> Result<UserProfile, BackendError>;

    async fn list_projects(&self, token: &SecretString) -> Result<Vec<Project>, BackendError>;

    async fn get_project(
        &self,
        token: &SecretString,
        project_id: &str,
    ) -> Result<Project, BackendError>;

    async fn create_project(
        &self,
        token: &SecretString,
        input: ProjectInput,
    ) -> Result<Project, BackendError>;

    async fn rename_project(
        &self,
        token: &SecretString,
        project_id: &str,
        title: &str,
    ) -> Result<(), BackendError>;

    async fn delete_project(&self, token: &SecretString, project_id: &str)
    -> Result<(), BackendError>;

    /// Natural-language summary of past performance, fed to the agent.
    async fn fetch_briefing(
        &self,
        token: &SecretString,
        project_id: &str,
    ) -> Result<String, BackendError>;

    /// A signed `wss://` URL for one conversation with the agent.
    async fn fetch_agent_url(&self, token: &SecretString) -> Result<SecretString, BackendError>;

    async fn end_session(
        &self,
        token: &SecretString,
        project_id: &str,
        request: &EndSessionRequest,
    ) -> Result<EndSessionResponse, BackendError>;

    async fn get_session(
        &self,
        token: &SecretString,
        project_id: &str,
        session_id: &str,
    ) -> Result<PracticeSession, BackendError>;

    /// Files a top-up request for an admin to approve. Returns the request id.
    async fn request_credits(
        &self,
        token: &SecretString,
        requested_credits: u32,
    ) -> Result<String, BackendError>;
}

/// HTTP implementation of [`Backend`].
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(request: RequestBuilder, token: &SecretString) -> Result<Response, BackendError> {
        let response = request.bearer_auth(token.expose_secret()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::from_status(
            status.as_u16(),
            error_message(&body, status.canonical_reason()),
        ))
    }

    async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
        token: &SecretString,
    ) -> Result<T, BackendError> {
        let response = Self::send(request, token).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// Pulls the backend's `{"error": "..."}` message out of a failed response.
fn error_message(body: &str, fallback: Option<&str>) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                fallback.unwrap_or("request failed").to_string()
            } else {
                body.trim().to_string()
            }
        })
}

#[async_trait]
impl Backend for BackendClient {
    async fn fetch_profile(&self, token: &SecretString) -> Result<UserProfile, BackendError> {
        Self::send_json(self.client.get(self.url("/api/user/profile")), token).await
    }

    async fn list_projects(&self, token: &SecretString) -> Result<Vec<Project>, BackendError> {
        Self::send_json(self.client.get(self.url("/api/projects")), token).await
    }

    async fn get_project(
        &self,
        token: &SecretString,
        project_id: &str,
    ) -> Result<Project, BackendError> {
        let url = self.url(&format!("/api/projects/{project_id}"));
        Self::send_json(self.client.get(url), token).await
    }

    async fn create_project(
        &self,
        token: &SecretString,
        input: ProjectInput,
    ) -> Result<Project, BackendError> {
        let form = match input {
            ProjectInput::Text(text) => {
                if text.trim().is_empty() {
                    return Err(BackendError::InvalidInput(
                        "briefing text must not be empty".to_string(),
                    ));
                }
                reqwest::multipart::Form::new().text("text", text)
            }
            ProjectInput::Pdf { file_name, bytes } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/pdf")?;
                reqwest::multipart::Form::new().part("file", part)
            }
        };
        let request = self.client.post(self.url("/api/projects")).multipart(form);
        Self::send_json(request, token).await
    }

    async fn rename_project(
        &self,
        token: &SecretString,
        project_id: &str,
        title: &str,
    ) -> Result<(), BackendError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(BackendError::InvalidInput(
                "a valid title is required".to_string(),
            ));
        }
        let url = self.url(&format!("/api/projects/{project_id}"));
        let request = self
            .client
            .put(url)
            .json(&serde_json::json!({ "title": title }));
        Self::send(request, token).await.map(|_| ())
    }

    async fn delete_project(
        &self,
        token: &SecretString,
        project_id: &str,
    ) -> Result<(), BackendError> {
        let url = self.url(&format!("/api/projects/{project_id}"));
        Self::send(self.client.delete(url), token).await.map(|_| ())
    }

    async fn fetch_briefing(
        &self,
        token: &SecretString,
        project_id: &str,
    ) -> Result<String, BackendError> {
        let url = self.url(&format!("/api/projects/{project_id}/briefing"));
        let response: BriefingResponse = Self::send_json(self.client.get(url), token).await?;
        Ok(response.briefing)
    }

    async fn fetch_agent_url(&self, token: &SecretString) -> Result<SecretString, BackendError> {
        let response: AgentUrlResponse =
            Self::send_json(self.client.get(self.url("/api/ai/get-agent-url")), token).await?;
        Ok(SecretString::from(response.signed_url))
    }

    async fn end_session(
        &self,
        token: &SecretString,
        project_id: &str,
        request: &EndSessionRequest,
    ) -> Result<EndSessionResponse, BackendError> {
        let url = self.url(&format!("/api/projects/{project_id}/sessions/end"));
        Self::send_json(self.client.post(url).json(request), token).await
    }

    async fn get_session(
        &self,
        token: &SecretString,
        project_id: &str,
        session_id: &str,
    ) -> Result<PracticeSession, BackendError> {
        let url = self.url(&format!("/api/projects/{project_id}/sessions/{session_id}"));
        Self::send_json(self.client.get(url), token).await
    }

    async fn request_credits(
        &self,
        token: &SecretString,
        requested_credits: u32,
    ) -> Result<String, BackendError> {
        if requested_credits == 0 {
            return Err(BackendError::InvalidInput(
                "requested credits must be positive".to_string(),
            ));
        }
        let request = self
            .client
            .post(self.url("/api/user/request-credits"))
            .json(&serde_json::json!({ "requested_credits": requested_credits }));
        let response: CreditRequestResponse = Self::send_json(request, token).await?;
        Ok(response.request_id)
    }
}
