//! IdentityService - Per-Session Identity
//!
//! ## Responsibilities
//!
//! - Anonymous sign-in producing an opaque user id
//! - Fail-fast identity check before any pin write
//!
//! Missing identity blocks writes only; map viewing keeps working.

use crate::error::{Error, Result};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Signed-in identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub anonymous: bool,
}

/// IdentityService instance
pub struct IdentityService {
    anonymous_enabled: bool,
    current: RwLock<Option<Identity>>,
}

impl IdentityService {
    pub fn new(anonymous_enabled: bool) -> Self {
        Self {
            anonymous_enabled,
            current: RwLock::new(None),
        }
    }

    /// Sign in anonymously; keeps an existing identity
    pub async fn sign_in_anonymously(&self) -> Result<Identity> {
        if !self.anonymous_enabled {
            tracing::error!("Anonymous sign-in rejected: provider disabled");
            return Err(Error::Authentication(
                "Anonymous authentication is not enabled".to_string(),
            ));
        }

        let mut current = self.current.write().await;
        if let Some(identity) = current.as_ref() {
            return Ok(identity.clone());
        }

        let identity = Identity {
            user_id: Uuid::new_v4().simple().to_string(),
            anonymous: true,
        };
        *current = Some(identity.clone());

        tracing::info!(user_id = %identity.user_id, "Authentication successful");
        Ok(identity)
    }

    pub async fn current(&self) -> Option<Identity> {
        self.current.read().await.clone()
    }

    /// Identity required for a write
    pub async fn require(&self) -> Result<Identity> {
        self.current()
            .await
            .ok_or_else(|| Error::Authentication("Not signed in".to_string()))
    }

    pub async fn sign_out(&self) {
        if let Some(identity) = self.current.write().await.take() {
            tracing::info!(user_id = %identity.user_id, "Signed out");
        }
    }
}

impl Default for IdentityService {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_require_before_sign_in_fails() {
        let identity = IdentityService::default();
        assert!(matches!(identity.require().await, Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_sign_in_is_stable() {
        let identity = IdentityService::default();
        let first = identity.sign_in_anonymously().await.unwrap();
        let second = identity.sign_in_anonymously().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(identity.require().await.unwrap().user_id, first.user_id);
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let identity = IdentityService::new(false);
        let err = identity.sign_in_anonymously().await.unwrap_err();
        assert!(err.to_string().contains("Anonymous authentication is not enabled"));
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn test_sign_out_blocks_writes() {
        let identity = IdentityService::default();
        identity.sign_in_anonymously().await.unwrap();
        identity.sign_out().await;
        assert!(identity.require().await.is_err());
    }
}
