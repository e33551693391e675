use crate::config::INPUT_CHUNK_SIZE;
use anyhow::{Context, Result};
use async_trait::async_trait;
use convai_realtime::types::ServerEvent;
use convai_realtime::{ConvaiClient, ServerRx};
use rehearse_core::transport::{
    ConnectionStatus, ConnectionTarget, EventSink, StartSession, TransportEvent, VoiceTransport,
};
use rehearse_core::Speaker;
use rehearse_native_utils::audio::{self, AGENT_PCM16_SAMPLE_RATE};
use rubato::Resampler;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Work for the playback task that feeds the speakers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playback {
    /// A conversation started; its audio arrives at `sample_rate`.
    Start { sample_rate: u32 },
    /// Base64 PCM16 from the agent.
    Audio(String),
    /// The user talked over the agent. Drop queued speech.
    Interrupt,
}

/// The audio plumbing shared between the cpal callbacks and a voice session.
#[derive(Clone)]
pub struct AudioLink {
    /// Mono samples at `input_sample_rate`, pushed by the input stream callback.
    pub microphone: Arc<AsyncMutex<mpsc::Receiver<Vec<f32>>>>,
    pub input_sample_rate: f64,
    pub playback: mpsc::Sender<Playback>,
    /// Set by the output callback while agent speech is playing.
    pub agent_speaking: Arc<AtomicBool>,
}

struct ActiveSession<C> {
    client: Arc<AsyncMutex<C>>,
    cancel: CancellationToken,
}

impl<C> Drop for ActiveSession<C> {
    fn drop(&mut self) {
        // Stops the pump and microphone tasks if a start is abandoned midway.
        self.cancel.cancel();
    }
}

/// [`VoiceTransport`] over the conversational-agent WebSocket.
pub struct ConvaiTransport {
    base_url: Option<String>,
    audio: AudioLink,
    status: Arc<Mutex<ConnectionStatus>>,
    active: AsyncMutex<Option<ActiveSession<convai_realtime::Client>>>,
}

impl ConvaiTransport {
    pub fn new(audio: AudioLink) -> Self {
        Self {
            base_url: None,
            audio,
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            active: AsyncMutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    fn client_config(&self, target: ConnectionTarget) -> convai_realtime::Config {
        let mut builder = convai_realtime::Config::builder();
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        match target {
            ConnectionTarget::SignedUrl(url) => builder.with_signed_url(url),
            ConnectionTarget::AgentId(id) => builder.with_agent_id(&id),
        }
        .build()
    }
}

fn set_status(status: &Mutex<ConnectionStatus>, value: ConnectionStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

#[async_trait]
impl VoiceTransport for ConvaiTransport {
    async fn start_session(&self, request: StartSession, events: EventSink) -> Result<()> {
        self.end_session().await?;
        set_status(&self.status, ConnectionStatus::Connecting);

        let config = self.client_config(request.target);
        let client = match convai_realtime::connect_with_config(1024, config).await {
            Ok(client) => client,
            Err(e) => {
                set_status(&self.status, ConnectionStatus::Disconnected);
                return Err(e.context("failed to connect to the agent"));
            }
        };
        tracing::info!("connected to agent for call {}", events.call_id());

        let session = launch(
            client,
            request.dynamic_variables,
            events,
            self.audio.clone(),
            self.status.clone(),
        )
        .await;
        match session {
            Ok(session) => {
                *self.active.lock().await = Some(session);
                Ok(())
            }
            Err(e) => {
                set_status(&self.status, ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    async fn end_session(&self) -> Result<()> {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.cancel.cancel();
            active.client.lock().await.close();
            tracing::info!("voice session closed");
        }
        set_status(&self.status, ConnectionStatus::Disconnected);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sends the initiation data and spawns the event pump and microphone uplink.
async fn launch<C: ConvaiClient + 'static>(
    client: C,
    dynamic_variables: BTreeMap<String, String>,
    events: EventSink,
    audio: AudioLink,
    status: Arc<Mutex<ConnectionStatus>>,
) -> Result<ActiveSession<C>> {
    // Subscribe first so the initiation metadata cannot be missed.
    let server_rx = client.server_events()?;
    client
        .initiate_conversation(dynamic_variables)
        .await
        .context("failed to send conversation initiation data")?;

    let client = Arc::new(AsyncMutex::new(client));
    let cancel = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));

    tokio::spawn(pump_server_events(
        client.clone(),
        server_rx,
        events,
        audio.playback.clone(),
        ready.clone(),
        status,
        cancel.clone(),
    ));
    tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(e) = stream_microphone(client, audio, ready, cancel).await {
                tracing::error!("microphone uplink stopped: {:#}", e);
            }
        }
    });

    Ok(ActiveSession { client, cancel })
}

/// What the call controller needs to hear about a server event, if anything.
pub fn to_transport_event(event: &ServerEvent) -> Option<TransportEvent> {
    match event {
        ServerEvent::ConversationInitiationMetadata(meta) => Some(TransportEvent::Connected {
            conversation_id: Some(meta.conversation_id().to_string()),
        }),
        ServerEvent::UserTranscript(data) => {
            let text = data.transcript().trim();
            (!text.is_empty()).then(|| TransportEvent::Message {
                source: Speaker::User,
                text: text.to_string(),
            })
        }
        ServerEvent::AgentResponse(data) => {
            let text = data.response().trim();
            (!text.is_empty()).then(|| TransportEvent::Message {
                source: Speaker::Agent,
                text: text.to_string(),
            })
        }
        ServerEvent::Error(e) => Some(TransportEvent::Error {
            message: e.message().to_string(),
        }),
        ServerEvent::Close { reason } => Some(TransportEvent::Disconnected {
            reason: reason.clone(),
        }),
        _ => None,
    }
}

async fn pump_server_events<C: ConvaiClient + 'static>(
    client: Arc<AsyncMutex<C>>,
    mut server_rx: ServerRx,
    events: EventSink,
    playback: mpsc::Sender<Playback>,
    ready: Arc<AtomicBool>,
    status: Arc<Mutex<ConnectionStatus>>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = server_rx.recv() => received,
        };
        let event = match received {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("event pump lagged, skipped {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => ServerEvent::Close { reason: None },
        };

        match &event {
            ServerEvent::ConversationInitiationMetadata(meta) => {
                let format = meta.agent_output_audio_format();
                tracing::info!(
                    "conversation {} started, agent audio {}",
                    meta.conversation_id(),
                    format
                );
                ready.store(true, Ordering::SeqCst);
                set_status(&status, ConnectionStatus::Connected);
                if let Err(e) = playback.try_send(Playback::Start {
                    sample_rate: format.sample_rate(),
                }) {
                    tracing::warn!("failed to reset playback: {:?}", e);
                }
            }
            ServerEvent::Ping(ping) => {
                if let Err(e) = client.lock().await.pong(ping.event_id()).await {
                    tracing::warn!("failed to answer ping {}: {:#}", ping.event_id(), e);
                }
            }
            ServerEvent::Audio(chunk) => {
                if let Err(e) = playback.try_send(Playback::Audio(chunk.audio().to_string())) {
                    tracing::warn!("failed to queue agent audio: {:?}", e);
                }
            }
            ServerEvent::Interruption(_) => {
                tracing::debug!("agent interrupted");
                if let Err(e) = playback.try_send(Playback::Interrupt) {
                    tracing::warn!("failed to flush playback: {:?}", e);
                }
            }
            ServerEvent::AgentResponseCorrection(correction) => {
                tracing::debug!(
                    "agent response truncated to {:?}",
                    correction.corrected()
                );
            }
            ServerEvent::UserTranscript(data) => tracing::info!("User said: {:?}", data.transcript()),
            ServerEvent::AgentResponse(data) => tracing::info!("Agent said: {:?}", data.response()),
            ServerEvent::VadScore(vad) => tracing::trace!("vad score {}", vad.score()),
            _ => {}
        }

        let closing = matches!(event, ServerEvent::Close { .. });
        if closing {
            set_status(&status, ConnectionStatus::Disconnected);
        }
        if let Some(transport_event) = to_transport_event(&event) {
            if events.send(transport_event).await.is_err() {
                tracing::warn!("call controller dropped, stopping event pump");
                break;
            }
        }
        if closing {
            break;
        }
    }
}

/// Resamples microphone audio to the agent's rate and streams it up. Audio is
/// held back until the conversation starts and while the agent is speaking.
async fn stream_microphone<C: ConvaiClient + 'static>(
    client: Arc<AsyncMutex<C>>,
    audio: AudioLink,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut microphone = audio.microphone.lock().await;
    let mut resampler =
        audio::create_resampler(audio.input_sample_rate, AGENT_PCM16_SAMPLE_RATE, INPUT_CHUNK_SIZE)?;
    let mut buffer: VecDeque<f32> = VecDeque::with_capacity(INPUT_CHUNK_SIZE * 2);

    loop {
        let samples = tokio::select! {
            _ = cancel.cancelled() => break,
            samples = microphone.recv() => match samples {
                Some(samples) => samples,
                None => break,
            },
        };
        if !ready.load(Ordering::SeqCst) || audio.agent_speaking.load(Ordering::SeqCst) {
            buffer.clear();
            continue;
        }
        buffer.extend(samples);

        let mut resampled: Vec<f32> = Vec::new();
        while buffer.len() >= INPUT_CHUNK_SIZE {
            let chunk: Vec<f32> = buffer.drain(..INPUT_CHUNK_SIZE).collect();
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(out) => {
                    if let Some(channel) = out.first() {
                        resampled.extend_from_slice(channel);
                    }
                }
                Err(e) => tracing::warn!("failed to resample microphone audio: {}", e),
            }
        }
        if !resampled.is_empty() {
            client
                .lock()
                .await
                .append_user_audio(audio::encode_f32(&resampled))
                .await
                .context("failed to send microphone audio")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convai_realtime::types::events::server::{
        AgentResponseEvent, ConversationInitiationMetadataEvent, ErrorEvent, PingEvent,
        UserTranscriptEvent,
    };
    use mockall::mock;
    use rehearse_core::transport::CallEvent;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    mock! {
        pub Agent {}
        #[async_trait]
        impl ConvaiClient for Agent {
            async fn initiate_conversation(&self, dynamic_variables: BTreeMap<String, String>) -> Result<()>;
            async fn append_user_audio(&self, audio: String) -> Result<()>;
            async fn pong(&self, event_id: u64) -> Result<()>;
            fn server_events(&self) -> Result<ServerRx>;
            fn close(&mut self);
        }
    }

    fn audio_link() -> (AudioLink, mpsc::Sender<Vec<f32>>, mpsc::Receiver<Playback>) {
        let (mic_tx, mic_rx) = mpsc::channel(16);
        let (playback_tx, playback_rx) = mpsc::channel(16);
        let link = AudioLink {
            microphone: Arc::new(AsyncMutex::new(mic_rx)),
            input_sample_rate: 48000.0,
            playback: playback_tx,
            agent_speaking: Arc::new(AtomicBool::new(false)),
        };
        (link, mic_tx, playback_rx)
    }

    #[test]
    fn blank_transcripts_are_not_forwarded() {
        let event = ServerEvent::UserTranscript(UserTranscriptEvent::new("   "));
        assert_eq!(to_transport_event(&event), None);
        let event = ServerEvent::AgentResponse(AgentResponseEvent::new(" Hi there "));
        assert_eq!(
            to_transport_event(&event),
            Some(TransportEvent::Message {
                source: Speaker::Agent,
                text: "Hi there".into()
            })
        );
        let event = ServerEvent::Error(ErrorEvent::new("quota exceeded"));
        assert_eq!(
            to_transport_event(&event),
            Some(TransportEvent::Error {
                message: "quota exceeded".into()
            })
        );
        assert_eq!(to_transport_event(&ServerEvent::Unknown), None);
    }

    #[tokio::test]
    async fn session_forwards_events_and_answers_pings() {
        let (server_tx, server_rx) = broadcast::channel(16);
        let ponged = Arc::new(AtomicU64::new(0));

        let mut agent = MockAgent::new();
        agent.expect_server_events().return_once(move || Ok(server_rx));
        agent
            .expect_initiate_conversation()
            .withf(|vars| vars.get("agent_persona").is_some_and(|p| p.contains("hiring manager")))
            .times(1)
            .returning(|_| Ok(()));
        agent.expect_pong().returning({
            let ponged = ponged.clone();
            move |id| {
                ponged.store(id, Ordering::SeqCst);
                Ok(())
            }
        });
        agent.expect_append_user_audio().returning(|_| Ok(()));

        let (link, _mic_tx, mut playback_rx) = audio_link();
        let status = Arc::new(Mutex::new(ConnectionStatus::Connecting));
        let (events_tx, mut events_rx) = mpsc::channel::<CallEvent>(16);
        let vars = BTreeMap::from([(
            "agent_persona".to_string(),
            "You are a seasoned hiring manager".to_string(),
        )]);

        let session = launch(agent, vars, EventSink::new(4, events_tx), link, status.clone())
            .await
            .unwrap();

        for event in [
            ServerEvent::ConversationInitiationMetadata(ConversationInitiationMetadataEvent::new(
                "conv_1",
            )),
            ServerEvent::Ping(PingEvent::new(7)),
            ServerEvent::UserTranscript(UserTranscriptEvent::new("I led the storage team.")),
            ServerEvent::AgentResponse(AgentResponseEvent::new("What did you ship?")),
            ServerEvent::Close {
                reason: Some("agent hung up".into()),
            },
        ] {
            server_tx.send(event).unwrap();
        }

        let mut received = Vec::new();
        while received.len() < 4 {
            let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.call_id, 4);
            received.push(event.event);
        }
        assert_eq!(
            received,
            vec![
                TransportEvent::Connected {
                    conversation_id: Some("conv_1".into())
                },
                TransportEvent::Message {
                    source: Speaker::User,
                    text: "I led the storage team.".into()
                },
                TransportEvent::Message {
                    source: Speaker::Agent,
                    text: "What did you ship?".into()
                },
                TransportEvent::Disconnected {
                    reason: Some("agent hung up".into())
                },
            ]
        );
        assert_eq!(ponged.load(Ordering::SeqCst), 7);
        assert_eq!(
            playback_rx.recv().await,
            Some(Playback::Start { sample_rate: 16000 })
        );
        assert_eq!(
            *status.lock().unwrap(),
            ConnectionStatus::Disconnected
        );
        session.cancel.cancel();
    }
}
