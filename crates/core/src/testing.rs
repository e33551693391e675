//! Shared fixtures for unit tests.

use crate::backend::Backend;
use crate::context::{StaticCredential, UserContext, UserIdentity};
use crate::error::BackendError;
use crate::models::{
    EndSessionRequest, EndSessionResponse, PracticeSession, Project, ProjectInput, UseCase,
    UserProfile,
};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn profile(credits: i64) -> UserProfile {
    UserProfile {
        uid: "u1".into(),
        email: Some("ada@example.com".into()),
        display_name: Some("Ada".into()),
        credits,
        is_admin: false,
        created_at: None,
    }
}

pub fn context(credits: i64) -> UserContext {
    UserContext::new(
        Some(UserIdentity {
            uid: "u1".into(),
            display_name: Some("Ada".into()),
        }),
        Arc::new(StaticCredential::new(SecretString::from("id-token".to_string()))),
    )
    .with_profile(profile(credits))
}

pub fn project() -> Project {
    Project {
        project_id: "p1".into(),
        user_id: Some("u1".into()),
        title: "Backend engineer interview".into(),
        detected_use_case: Some(UseCase::JobInterview),
        original_briefing_text: Some("Rust, distributed systems".into()),
        key_points: Some("5 years Rust; led storage team".into()),
        short_description: Some("Interview for a backend role.".into()),
        created_at: None,
        practice_sessions: HashMap::new(),
    }
}

/// Backend whose `end_session` takes `delay` to answer. Counts the calls it sees.
pub struct SlowBackend {
    delay: Duration,
    remaining_credits: i64,
    end_session_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl SlowBackend {
    pub fn new(delay: Duration, remaining_credits: i64) -> Self {
        Self {
            delay,
            remaining_credits,
            end_session_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
        }
    }

    pub fn end_session_calls(&self) -> usize {
        self.end_session_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for SlowBackend {
    async fn fetch_profile(&self, _token: &SecretString) -> Result<UserProfile, BackendError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(profile(self.remaining_credits))
    }

    async fn list_projects(&self, _token: &SecretString) -> Result<Vec<Project>, BackendError> {
        Ok(vec![project()])
    }

    async fn get_project(
        &self,
        _token: &SecretString,
        _project_id: &str,
    ) -> Result<Project, BackendError> {
        Ok(project())
    }

    async fn create_project(
        &self,
        _token: &SecretString,
        _input: ProjectInput,
    ) -> Result<Project, BackendError> {
        Ok(project())
    }

    async fn rename_project(
        &self,
        _token: &SecretString,
        _project_id: &str,
        _title: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete_project(
        &self,
        _token: &SecretString,
        _project_id: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn fetch_briefing(
        &self,
        _token: &SecretString,
        _project_id: &str,
    ) -> Result<String, BackendError> {
        Ok("First session.".into())
    }

    async fn fetch_agent_url(&self, _token: &SecretString) -> Result<SecretString, BackendError> {
        Ok(SecretString::from("wss://agent.example/convai?token=t".to_string()))
    }

    async fn end_session(
        &self,
        _token: &SecretString,
        _project_id: &str,
        request: &EndSessionRequest,
    ) -> Result<EndSessionResponse, BackendError> {
        self.end_session_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(EndSessionResponse {
            status: "success".into(),
            message: None,
            session_id: "s1".into(),
            credits_deducted: (request.duration_seconds.saturating_sub(59).div_ceil(60) * 3) as i64,
            remaining_credits: self.remaining_credits,
        })
    }

    async fn get_session(
        &self,
        _token: &SecretString,
        _project_id: &str,
        session_id: &str,
    ) -> Result<PracticeSession, BackendError> {
        Err(BackendError::NotFound(session_id.to_string()))
    }

    async fn request_credits(
        &self,
        _token: &SecretString,
        _requested_credits: u32,
    ) -> Result<String, BackendError> {
        Ok("r1".into())
    }
}
