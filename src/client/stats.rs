#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    agent_responses: u64,
    user_transcripts: u64,
    audio_chunks_sent: u64,
    audio_chunks_received: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_agent_response(&mut self) {
        self.agent_responses += 1;
    }

    pub(crate) fn record_user_transcript(&mut self) {
        self.user_transcripts += 1;
    }

    pub(crate) fn record_audio_sent(&mut self) {
        self.audio_chunks_sent += 1;
    }

    pub(crate) fn record_audio_received(&mut self) {
        self.audio_chunks_received += 1;
    }

    pub fn agent_responses(&self) -> u64 {
        self.agent_responses
    }

    pub fn user_transcripts(&self) -> u64 {
        self.user_transcripts
    }

    pub fn audio_chunks_sent(&self) -> u64 {
        self.audio_chunks_sent
    }

    pub fn audio_chunks_received(&self) -> u64 {
        self.audio_chunks_received
    }
}
