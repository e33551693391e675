use crate::audio::{AudioFormat, Base64EncodedAudioBytes};

/// `error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorEvent {
    pub fn new(message: &str) -> Self {
        Self {
            error_type: None,
            message: Some(message.to_string()),
        }
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown agent error")
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct InitiationMetadata {
    conversation_id: String,
    #[serde(default)]
    agent_output_audio_format: AudioFormat,
    #[serde(default)]
    user_input_audio_format: AudioFormat,
}

/// `conversation_initiation_metadata` event, the first frame of every conversation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationInitiationMetadataEvent {
    conversation_initiation_metadata_event: InitiationMetadata,
}

impl ConversationInitiationMetadataEvent {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_initiation_metadata_event: InitiationMetadata {
                conversation_id: conversation_id.to_string(),
                agent_output_audio_format: AudioFormat::default(),
                user_input_audio_format: AudioFormat::default(),
            },
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_initiation_metadata_event.conversation_id
    }

    pub fn agent_output_audio_format(&self) -> AudioFormat {
        self.conversation_initiation_metadata_event
            .agent_output_audio_format
    }

    pub fn user_input_audio_format(&self) -> AudioFormat {
        self.conversation_initiation_metadata_event
            .user_input_audio_format
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct UserTranscription {
    user_transcript: String,
}

/// `user_transcript` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserTranscriptEvent {
    user_transcription_event: UserTranscription,
}

impl UserTranscriptEvent {
    pub fn new(transcript: &str) -> Self {
        Self {
            user_transcription_event: UserTranscription {
                user_transcript: transcript.to_string(),
            },
        }
    }

    pub fn transcript(&self) -> &str {
        &self.user_transcription_event.user_transcript
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AgentResponseBody {
    agent_response: String,
}

/// `agent_response` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentResponseEvent {
    agent_response_event: AgentResponseBody,
}

impl AgentResponseEvent {
    pub fn new(response: &str) -> Self {
        Self {
            agent_response_event: AgentResponseBody {
                agent_response: response.to_string(),
            },
        }
    }

    pub fn response(&self) -> &str {
        &self.agent_response_event.agent_response
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AgentResponseCorrectionBody {
    original_agent_response: String,
    corrected_agent_response: String,
}

/// `agent_response_correction` event, sent when the user barges in and the spoken
/// response was cut short
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentResponseCorrectionEvent {
    agent_response_correction_event: AgentResponseCorrectionBody,
}

impl AgentResponseCorrectionEvent {
    pub fn original(&self) -> &str {
        &self
            .agent_response_correction_event
            .original_agent_response
    }

    pub fn corrected(&self) -> &str {
        &self
            .agent_response_correction_event
            .corrected_agent_response
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AudioBody {
    audio_base_64: Base64EncodedAudioBytes,
    #[serde(default)]
    event_id: u64,
}

/// `audio` event carrying a chunk of agent speech
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioEvent {
    audio_event: AudioBody,
}

impl AudioEvent {
    pub fn audio(&self) -> &str {
        &self.audio_event.audio_base_64
    }

    pub fn event_id(&self) -> u64 {
        self.audio_event.event_id
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct InterruptionBody {
    #[serde(default)]
    event_id: u64,
}

/// `interruption` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InterruptionEvent {
    interruption_event: InterruptionBody,
}

impl InterruptionEvent {
    pub fn event_id(&self) -> u64 {
        self.interruption_event.event_id
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct PingBody {
    event_id: u64,
    #[serde(default)]
    ping_ms: Option<u64>,
}

/// `ping` event; must be answered with a `pong` carrying the same id
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PingEvent {
    ping_event: PingBody,
}

impl PingEvent {
    pub fn new(event_id: u64) -> Self {
        Self {
            ping_event: PingBody {
                event_id,
                ping_ms: None,
            },
        }
    }

    pub fn event_id(&self) -> u64 {
        self.ping_event.event_id
    }

    pub fn ping_ms(&self) -> Option<u64> {
        self.ping_event.ping_ms
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct VadScoreBody {
    vad_score: f32,
}

/// `vad_score` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VadScoreEvent {
    vad_score_event: VadScoreBody,
}

impl VadScoreEvent {
    pub fn score(&self) -> f32 {
        self.vad_score_event.vad_score
    }
}
