use crate::client::consts::{BASE_URL, ELEVENLABS_API_KEY};
use secrecy::SecretString;

/// Where a conversation connects to.
#[derive(Clone)]
pub enum Target {
    /// A pre-signed `wss://` URL issued by the backend. Carries its own credentials.
    SignedUrl(SecretString),
    /// A public agent id, optionally authenticated with an API key.
    AgentId(String),
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::SignedUrl(_) => f.write_str("SignedUrl([REDACTED])"),
            Target::AgentId(id) => f.debug_tuple("AgentId").field(id).finish(),
        }
    }
}

pub struct Config {
    base_url: String,
    target: Option<Target>,
    api_key: Option<SecretString>,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_signed_url(mut self, signed_url: SecretString) -> Self {
        self.config.target = Some(Target::SignedUrl(signed_url));
        self
    }

    pub fn with_agent_id(mut self, agent_id: &str) -> Self {
        self.config.target = Some(Target::AgentId(agent_id.to_string()));
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = Some(SecretString::from(api_key.to_string()));
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    // Defaults to the public endpoint; the API key is picked up from the environment
    // and only used when connecting by agent id.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            target: None,
            api_key: std::env::var(ELEVENLABS_API_KEY)
                .ok()
                .filter(|key| !key.is_empty())
                .map(SecretString::from),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
