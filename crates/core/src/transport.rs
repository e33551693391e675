use crate::transcript::Speaker;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;

pub const VAR_USER_NAME: &str = "user_name";
pub const VAR_CREDIT_BALANCE: &str = "credit_balance";
pub const VAR_MEMORY_SUMMARY: &str = "memory_summary";
pub const VAR_PROJECT_TITLE: &str = "project_title";
pub const VAR_PROJECT_DESCRIPTION: &str = "project_description";
pub const VAR_PROJECT_KEY_POINTS: &str = "project_key_points";
pub const VAR_AGENT_PERSONA: &str = "agent_persona";

/// Where the transport should connect.
#[derive(Clone)]
pub enum ConnectionTarget {
    /// A pre-authorized URL issued by the backend for a single conversation.
    SignedUrl(SecretString),
    AgentId(String),
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::SignedUrl(_) => f.write_str("SignedUrl([REDACTED])"),
            ConnectionTarget::AgentId(id) => f.debug_tuple("AgentId").field(id).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartSession {
    pub target: ConnectionTarget,
    pub dynamic_variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Notifications raised by a running transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { conversation_id: Option<String> },
    Message { source: Speaker, text: String },
    Error { message: String },
    Disconnected { reason: Option<String> },
}

/// A transport event tagged with the call it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub call_id: u64,
    pub event: TransportEvent,
}

/// Handed to the transport when a session starts. Every event it sends is
/// tagged with that session's call id, so late events from an old session
/// cannot touch a newer one.
#[derive(Debug, Clone)]
pub struct EventSink {
    call_id: u64,
    tx: mpsc::Sender<CallEvent>,
}

impl EventSink {
    pub fn new(call_id: u64, tx: mpsc::Sender<CallEvent>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub async fn send(&self, event: TransportEvent) -> Result<()> {
        self.tx
            .send(CallEvent {
                call_id: self.call_id,
                event,
            })
            .await
            .map_err(|_| anyhow::anyhow!("call controller is gone"))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The real-time voice connection to the agent.
///
/// `start_session` returns once the connection attempt is under way; the
/// outcome arrives on the sink as `Connected`, `Error` or `Disconnected`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn start_session(&self, request: StartSession, events: EventSink) -> Result<()>;

    /// Best effort. Must be safe to call when no session is running.
    async fn end_session(&self) -> Result<()>;

    fn status(&self) -> ConnectionStatus;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MicrophoneAccess: Send + Sync {
    /// Fails when no input device can be opened.
    async fn request_access(&self) -> Result<()>;
}
