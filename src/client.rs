use crate::types;
use crate::types::audio::Base64EncodedAudioBytes;
use crate::types::events::client::{
    ContextualUpdateEvent, ConversationInitiationClientDataEvent, PongEvent, UserAudioChunk,
    UserMessageEvent,
};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;

mod config;
mod consts;
mod stats;
mod utils;

pub use config::{Config, ConfigBuilder, Target};
pub use stats::Stats;

type ClientTx = tokio::sync::mpsc::Sender<Outbound>;
type ServerTx = tokio::sync::broadcast::Sender<types::ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<types::ServerEvent>;

/// Frames queued for the writer task.
#[derive(Debug)]
enum Outbound {
    Event(types::ClientEvent),
    Audio(UserAudioChunk),
}

impl Outbound {
    fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Outbound::Event(event) => serde_json::to_string(event),
            Outbound::Audio(chunk) => serde_json::to_string(chunk),
        }
    }
}

// Holds the channel capacity, the writer/broadcast transmitters, configuration,
// and stats guarded by a Mutex.
pub struct Client {
    capacity: usize,
    config: Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    fn new(capacity: usize, config: Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<Outbound>(self.capacity);
        let (s_tx, _) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());

        // Writer: drains queued frames until every sender is dropped, then closes the socket.
        tokio::spawn(async move {
            while let Some(frame) = c_rx.recv().await {
                match frame.to_json() {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                    }
                }
            }
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!("close frame not sent: {}", e);
            }
        });

        let stats = self.stats.clone();
        // Reader: decodes agent frames and broadcasts them. Always finishes with a `close`.
        tokio::spawn(async move {
            let mut close_reason: Option<String> = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<types::ServerEvent>(&text) {
                        Ok(event) => {
                            if let Ok(mut guard) = stats.lock() {
                                match &event {
                                    types::ServerEvent::AgentResponse(_) => {
                                        guard.record_agent_response()
                                    }
                                    types::ServerEvent::UserTranscript(_) => {
                                        guard.record_user_transcript()
                                    }
                                    types::ServerEvent::Audio(_) => guard.record_audio_received(),
                                    _ => {}
                                }
                            }
                            if let types::ServerEvent::Unknown = event {
                                tracing::debug!("ignoring unknown event: {}", text);
                                continue;
                            }
                            if let Err(e) = s_tx.send(event) {
                                tracing::debug!("no subscribers for event: {}", e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        close_reason = reason.map(|frame| frame.reason.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            if let Err(e) = s_tx.send(types::ServerEvent::Close {
                reason: close_reason,
            }) {
                tracing::debug!("close event had no subscribers: {}", e);
            }
        });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.c_tx.is_some()
    }

    /// Subscribe to events coming from the agent.
    pub fn server_events(&self) -> Result<ServerRx> {
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    pub fn stats(&self) -> Result<Stats> {
        if let Ok(stats_guard) = self.stats.lock() {
            Ok(stats_guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }

    async fn send(&self, frame: Outbound) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(frame).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    /// Sends the initiation frame that fills the agent prompt's dynamic variables.
    pub async fn initiate_conversation(
        &self,
        dynamic_variables: BTreeMap<String, String>,
    ) -> Result<()> {
        let event = types::ClientEvent::ConversationInitiationClientData(
            ConversationInitiationClientDataEvent::new().with_dynamic_variables(dynamic_variables),
        );
        self.send(Outbound::Event(event)).await
    }

    pub async fn append_user_audio(&self, audio: Base64EncodedAudioBytes) -> Result<()> {
        self.send(Outbound::Audio(UserAudioChunk::new(audio))).await?;
        if let Ok(mut guard) = self.stats.lock() {
            guard.record_audio_sent();
        }
        Ok(())
    }

    pub async fn pong(&self, event_id: u64) -> Result<()> {
        self.send(Outbound::Event(types::ClientEvent::Pong(PongEvent::new(
            event_id,
        ))))
        .await
    }

    pub async fn send_user_message(&self, text: &str) -> Result<()> {
        self.send(Outbound::Event(types::ClientEvent::UserMessage(
            UserMessageEvent::new(text),
        )))
        .await
    }

    pub async fn send_contextual_update(&self, text: &str) -> Result<()> {
        self.send(Outbound::Event(types::ClientEvent::ContextualUpdate(
            ContextualUpdateEvent::new(text),
        )))
        .await
    }

    pub async fn send_user_activity(&self) -> Result<()> {
        self.send(Outbound::Event(types::ClientEvent::UserActivity))
            .await
    }

    /// Stops the writer, which sends a close frame. The reader then emits `close`.
    pub fn close(&mut self) {
        if self.c_tx.take().is_some() {
            tracing::info!("closing conversation socket");
        }
    }
}

/// The subset of [`Client`] a voice session drives. Adapters depend on this
/// rather than on `Client` so they can be exercised against a mock.
#[async_trait]
pub trait ConvaiClient: Send + Sync {
    async fn initiate_conversation(&self, dynamic_variables: BTreeMap<String, String>)
    -> Result<()>;
    async fn append_user_audio(&self, audio: Base64EncodedAudioBytes) -> Result<()>;
    async fn pong(&self, event_id: u64) -> Result<()>;
    fn server_events(&self) -> Result<ServerRx>;
    fn close(&mut self);
}

#[async_trait]
impl ConvaiClient for Client {
    async fn initiate_conversation(
        &self,
        dynamic_variables: BTreeMap<String, String>,
    ) -> Result<()> {
        Client::initiate_conversation(self, dynamic_variables).await
    }

    async fn append_user_audio(&self, audio: Base64EncodedAudioBytes) -> Result<()> {
        Client::append_user_audio(self, audio).await
    }

    async fn pong(&self, event_id: u64) -> Result<()> {
        Client::pong(self, event_id).await
    }

    fn server_events(&self) -> Result<ServerRx> {
        Client::server_events(self)
    }

    fn close(&mut self) {
        Client::close(self)
    }
}

pub async fn connect_with_config(capacity: usize, config: Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

/// Connects with default settings to the given signed URL.
pub async fn connect(signed_url: secrecy::SecretString) -> Result<Client> {
    let config = Config::builder().with_signed_url(signed_url).build();
    connect_with_config(1024, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frames_serialize_without_type() {
        let frame = Outbound::Audio(UserAudioChunk::new("UklGRg==".to_string()));
        assert_eq!(frame.to_json().unwrap(), r#"{"user_audio_chunk":"UklGRg=="}"#);
    }

    #[test]
    fn pong_frames_echo_event_id() {
        let frame = Outbound::Event(types::ClientEvent::Pong(PongEvent::new(7)));
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "pong", "event_id": 7 }));
    }

    #[tokio::test]
    async fn sending_before_connect_fails() {
        let client = Client::new(8, Config::builder().with_agent_id("a").build());
        assert!(!client.is_connected());
        assert!(client.pong(1).await.is_err());
        assert!(client.server_events().is_err());
    }
}
