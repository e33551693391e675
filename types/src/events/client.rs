use crate::audio::Base64EncodedAudioBytes;
use std::collections::BTreeMap;

/// `conversation_initiation_client_data` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConversationInitiationClientDataEvent {
    /// Values substituted into `{{placeholders}}` of the agent prompt.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dynamic_variables: BTreeMap<String, String>,
}

impl ConversationInitiationClientDataEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dynamic_variable(mut self, key: &str, value: &str) -> Self {
        self.dynamic_variables
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_dynamic_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.dynamic_variables.extend(variables);
        self
    }

    pub fn dynamic_variables(&self) -> &BTreeMap<String, String> {
        &self.dynamic_variables
    }
}

/// `pong` event, the reply to a server `ping`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PongEvent {
    event_id: u64,
}

impl PongEvent {
    pub fn new(event_id: u64) -> Self {
        Self { event_id }
    }

    pub fn event_id(&self) -> u64 {
        self.event_id
    }
}

/// `user_message` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserMessageEvent {
    text: String,
}

impl UserMessageEvent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// `contextual_update` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextualUpdateEvent {
    text: String,
}

impl ContextualUpdateEvent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A chunk of microphone audio. Sent without a `type` field.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserAudioChunk {
    user_audio_chunk: Base64EncodedAudioBytes,
}

impl UserAudioChunk {
    pub fn new(audio: Base64EncodedAudioBytes) -> Self {
        Self {
            user_audio_chunk: audio,
        }
    }

    pub fn audio(&self) -> &str {
        &self.user_audio_chunk
    }
}
