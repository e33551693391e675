//! Documents exchanged with the scoring backend.
//!
//! These records are owned by the backend; the client only reads them, except
//! for the few request bodies at the bottom of this file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The signed-in user's profile, including the authoritative credit balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Scenario the backend detected from the uploaded briefing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UseCase {
    #[serde(rename = "Job Interview")]
    JobInterview,
    #[serde(rename = "Investor Pitch")]
    InvestorPitch,
    #[serde(rename = "Academic Presentation")]
    AcademicPresentation,
    #[serde(other)]
    Other,
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UseCase::JobInterview => "Job Interview",
            UseCase::InvestorPitch => "Investor Pitch",
            UseCase::AcademicPresentation => "Academic Presentation",
            UseCase::Other => "General",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "detectedUseCase")]
    pub detected_use_case: Option<UseCase>,
    #[serde(default, rename = "originalBriefingText")]
    pub original_briefing_text: Option<String>,
    #[serde(default)]
    pub key_points: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "practiceSessions")]
    pub practice_sessions: HashMap<String, PracticeSession>,
}

impl Project {
    /// Sessions ordered newest first; undated sessions sort last.
    pub fn sessions_newest_first(&self) -> Vec<&PracticeSession> {
        let mut sessions: Vec<&PracticeSession> = self.practice_sessions.values().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn description(&self) -> &str {
        self.short_description.as_deref().unwrap_or_default()
    }

    /// Key points if the backend extracted them, otherwise the raw briefing text.
    pub fn key_points_text(&self) -> &str {
        self.key_points
            .as_deref()
            .or(self.original_briefing_text.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSession {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "durationSeconds")]
    pub duration_seconds: u64,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

/// Scores and coaching notes computed by the backend. Scores are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub communication_score: f64,
    pub content_mastery_score: f64,
    pub engagement_delivery_score: f64,
    pub resilience_score: f64,
    #[serde(default)]
    pub qualitative_strengths: String,
    #[serde(default)]
    pub qualitative_improvements: String,
    #[serde(default)]
    pub context_specific_feedback: String,
}

impl Feedback {
    pub fn average_score(&self) -> f64 {
        (self.communication_score
            + self.content_mastery_score
            + self.engagement_delivery_score
            + self.resilience_score)
            / 4.0
    }
}

/// Body of `POST /api/projects/{id}/sessions/end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    pub duration_seconds: u64,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub session_id: String,
    pub credits_deducted: i64,
    pub remaining_credits: i64,
}

/// Source material for a new project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectInput {
    Text(String),
    Pdf { file_name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BriefingResponse {
    pub briefing: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AgentUrlResponse {
    pub signed_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreditRequestResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_document_decodes() {
        let json = r#"{
            "projectId": "p1",
            "userId": "u1",
            "title": "Series A pitch deck",
            "detectedUseCase": "Investor Pitch",
            "key_points": "ARR 1.2M, 40% MoM",
            "short_description": "Pitch deck for a seed-stage startup.",
            "createdAt": "2024-05-01T10:00:00Z",
            "practiceSessions": {
                "s1": {
                    "sessionId": "s1",
                    "createdAt": "2024-05-02T10:00:00Z",
                    "durationSeconds": 240,
                    "transcript": "[..] Agent: Hello",
                    "feedback": {
                        "communicationScore": 80, "contentMasteryScore": 70,
                        "engagementDeliveryScore": 90, "resilienceScore": 60,
                        "qualitativeStrengths": "Clear story",
                        "qualitativeImprovements": "Numbers",
                        "contextSpecificFeedback": "Defend CAC"
                    }
                },
                "s2": { "sessionId": "s2", "createdAt": "2024-05-03T10:00:00Z", "durationSeconds": 60, "transcript": "x" }
            }
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.detected_use_case, Some(UseCase::InvestorPitch));
        assert_eq!(project.key_points_text(), "ARR 1.2M, 40% MoM");
        let sessions = project.sessions_newest_first();
        assert_eq!(sessions[0].session_id, "s2");
        let feedback = sessions[1].feedback.as_ref().unwrap();
        assert_eq!(feedback.average_score(), 75.0);
    }

    #[test]
    fn unknown_use_case_maps_to_other() {
        let project: Project =
            serde_json::from_str(r#"{"projectId":"p","detectedUseCase":"General"}"#).unwrap();
        assert_eq!(project.detected_use_case, Some(UseCase::Other));
        assert!(project.practice_sessions.is_empty());
    }

    #[test]
    fn end_session_body_uses_camel_case() {
        let body = EndSessionRequest {
            duration_seconds: 130,
            transcript: "hello".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "durationSeconds": 130, "transcript": "hello" })
        );
    }

    #[test]
    fn profile_decodes_backend_shape() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"uid":"u1","email":"a@b.c","displayName":"Ada","credits":27,"is_admin":false,"createdAt":"2024-05-01T10:00:00.123456Z"}"#,
        )
        .unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert_eq!(profile.credits, 27);
    }
}
