use anyhow::{Context, Result};
use async_trait::async_trait;
use rehearse_core::MicrophoneAccess;

/// Checks the capture device through cpal. Desktop hosts have no permission
/// prompt, so access means the device opens with a usable input config.
pub struct CpalMicrophone {
    device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl MicrophoneAccess for CpalMicrophone {
    async fn request_access(&self) -> Result<()> {
        let device = self.device.clone();
        let name = tokio::task::spawn_blocking(move || {
            rehearse_native_utils::device::probe_input(device.as_deref())
        })
        .await
        .context("microphone probe panicked")??;
        tracing::debug!("microphone access granted on {}", name);
        Ok(())
    }
}
