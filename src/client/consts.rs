pub const ELEVENLABS_API_KEY: &str = "ELEVENLABS_API_KEY";

pub const BASE_URL: &str = "wss://api.elevenlabs.io/v1";
pub const CONVERSATION_PATH: &str = "/convai/conversation";

pub const API_KEY_HEADER: &str = "xi-api-key";
