pub mod client;
pub mod server;

use client::*;
use server::*;

/// Typed messages sent to the agent. Microphone audio is not tagged on the wire
/// and travels as [`client::UserAudioChunk`] instead.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation_initiation_client_data")]
    ConversationInitiationClientData(ConversationInitiationClientDataEvent),
    #[serde(rename = "pong")]
    Pong(PongEvent),
    #[serde(rename = "user_message")]
    UserMessage(UserMessageEvent),
    #[serde(rename = "user_activity")]
    UserActivity,
    #[serde(rename = "contextual_update")]
    ContextualUpdate(ContextualUpdateEvent),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Emitted locally when the socket closes; never sent by the agent.
    #[serde(rename = "close")]
    Close { reason: Option<String> },
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "conversation_initiation_metadata")]
    ConversationInitiationMetadata(ConversationInitiationMetadataEvent),
    #[serde(rename = "user_transcript")]
    UserTranscript(UserTranscriptEvent),
    #[serde(rename = "agent_response")]
    AgentResponse(AgentResponseEvent),
    #[serde(rename = "agent_response_correction")]
    AgentResponseCorrection(AgentResponseCorrectionEvent),
    #[serde(rename = "audio")]
    Audio(AudioEvent),
    #[serde(rename = "interruption")]
    Interruption(InterruptionEvent),
    #[serde(rename = "ping")]
    Ping(PingEvent),
    #[serde(rename = "vad_score")]
    VadScore(VadScoreEvent),
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;

    #[test]
    fn decodes_initiation_metadata() {
        let json = r#"{
            "type": "conversation_initiation_metadata",
            "conversation_initiation_metadata_event": {
                "conversation_id": "conv_123",
                "agent_output_audio_format": "pcm_16000",
                "user_input_audio_format": "pcm_16000"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::ConversationInitiationMetadata(e) => {
                assert_eq!(e.conversation_id(), "conv_123");
                assert_eq!(e.agent_output_audio_format(), AudioFormat::Pcm(16000));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_transcripts_and_responses() {
        let user: ServerEvent = serde_json::from_str(
            r#"{"type":"user_transcript","user_transcription_event":{"user_transcript":"Hi there"}}"#,
        )
        .unwrap();
        assert!(matches!(user, ServerEvent::UserTranscript(ref e) if e.transcript() == "Hi there"));

        let agent: ServerEvent = serde_json::from_str(
            r#"{"type":"agent_response","agent_response_event":{"agent_response":"Tell me about yourself."}}"#,
        )
        .unwrap();
        assert!(
            matches!(agent, ServerEvent::AgentResponse(ref e) if e.response() == "Tell me about yourself.")
        );
    }

    #[test]
    fn unknown_event_types_are_tolerated() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"internal_tentative_agent_response","x":1}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn initiation_data_carries_dynamic_variables() {
        let event = ClientEvent::ConversationInitiationClientData(
            ConversationInitiationClientDataEvent::new()
                .with_dynamic_variable("user_name", "Ada")
                .with_dynamic_variable("credit_balance", "12"),
        );
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation_initiation_client_data");
        assert_eq!(json["dynamic_variables"]["user_name"], "Ada");
        assert_eq!(json["dynamic_variables"]["credit_balance"], "12");
    }

    #[test]
    fn audio_chunk_is_untagged() {
        let json = serde_json::to_value(UserAudioChunk::new("AAAA".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({ "user_audio_chunk": "AAAA" }));
    }
}
