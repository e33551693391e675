use crate::client::config::{Config, Target};
use crate::client::consts::{API_KEY_HEADER, CONVERSATION_PATH};
use anyhow::Result;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> Result<Request> {
    match config.target() {
        Some(Target::SignedUrl(url)) => Ok(url.expose_secret().into_client_request()?),
        Some(Target::AgentId(agent_id)) => {
            let mut request = format!(
                "{}{}?agent_id={}",
                config.base_url(),
                CONVERSATION_PATH,
                agent_id
            )
            .into_client_request()?;
            if let Some(api_key) = config.api_key() {
                request
                    .headers_mut()
                    .insert(API_KEY_HEADER, api_key.expose_secret().parse()?);
            }
            Ok(request)
        }
        None => Err(anyhow::anyhow!(
            "no conversation target configured (signed url or agent id)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn signed_url_is_used_verbatim() {
        let config = Config::builder()
            .with_signed_url(SecretString::from(
                "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=a&conversation_signature=s"
                    .to_string(),
            ))
            .build();
        let request = build_request(&config).unwrap();
        assert_eq!(request.uri().query(), Some("agent_id=a&conversation_signature=s"));
        assert!(request.headers().get(API_KEY_HEADER).is_none());
    }

    #[test]
    fn agent_id_request_carries_api_key() {
        let config = Config::builder()
            .with_base_url("wss://example.test/v1/")
            .with_agent_id("agent_42")
            .with_api_key("xi-secret")
            .build();
        let request = build_request(&config).unwrap();
        assert_eq!(request.uri().host(), Some("example.test"));
        assert_eq!(request.uri().path(), "/v1/convai/conversation");
        assert_eq!(request.headers()[API_KEY_HEADER], "xi-secret");
    }

    #[test]
    fn missing_target_is_an_error() {
        let config = Config::builder().build();
        assert!(build_request(&config).is_err());
    }
}
