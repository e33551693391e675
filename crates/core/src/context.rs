use crate::backend::Backend;
use crate::error::{BackendError, CredentialError};
use crate::models::UserProfile;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::SecretString;
use std::sync::{Arc, RwLock};

/// Issues bearer credentials for the signed-in user.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<SecretString, CredentialError>;
}

/// A token handed over by configuration, e.g. an ID token minted elsewhere.
pub struct StaticCredential {
    token: SecretString,
}

impl StaticCredential {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_token(&self) -> Result<SecretString, CredentialError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: String,
    pub display_name: Option<String>,
}

/// Who the user is, how to authenticate as them, and their cached profile.
///
/// The cached credit balance is only ever replaced with values the backend
/// returned; nothing in the client computes a balance locally.
#[derive(Clone)]
pub struct UserContext {
    identity: Option<UserIdentity>,
    credentials: Arc<dyn CredentialProvider>,
    profile: Arc<RwLock<Option<UserProfile>>>,
}

impl UserContext {
    pub fn new(identity: Option<UserIdentity>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            identity,
            credentials,
            profile: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_profile(self, profile: UserProfile) -> Self {
        self.replace_profile(profile);
        self
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub async fn bearer_token(&self) -> Result<SecretString, CredentialError> {
        self.credentials.bearer_token().await
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.read().ok().and_then(|guard| guard.clone())
    }

    /// Cached balance, if a profile has been loaded.
    pub fn credits(&self) -> Option<i64> {
        self.profile
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|p| p.credits))
    }

    /// Profile display name, falling back to the identity's name.
    pub fn display_name(&self) -> String {
        self.profile()
            .and_then(|p| p.display_name)
            .or_else(|| self.identity.as_ref().and_then(|i| i.display_name.clone()))
            .unwrap_or_else(|| "there".to_string())
    }

    pub fn replace_profile(&self, profile: UserProfile) {
        match self.profile.write() {
            Ok(mut guard) => *guard = Some(profile),
            Err(e) => tracing::error!("profile cache poisoned: {}", e),
        }
    }

    /// Applies the `remainingCredits` reported by the backend after a save.
    pub fn apply_remaining_credits(&self, remaining: i64) {
        match self.profile.write() {
            Ok(mut guard) => {
                if let Some(profile) = guard.as_mut() {
                    profile.credits = remaining;
                }
            }
            Err(e) => tracing::error!("profile cache poisoned: {}", e),
        }
    }

    /// Fetches the profile from the backend and caches it.
    pub async fn refresh_profile(&self, backend: &dyn Backend) -> Result<UserProfile, RefreshError> {
        let token = self.bearer_token().await?;
        let profile = backend.fetch_profile(&token).await?;
        self.replace_profile(profile.clone());
        Ok(profile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
