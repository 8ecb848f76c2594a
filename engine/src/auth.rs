//! Authentication boundary.

use crate::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// The signed-in user on whose behalf remote writes are made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Supplies the current identity, if any.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_identity(&self) -> Option<Identity>;
}

/// An identity held in memory and swapped on sign-in / sign-out.
#[derive(Debug, Default)]
pub struct StaticAuth {
    identity: RwLock<Option<Identity>>,
}

impl StaticAuth {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_and_out() {
        let auth = StaticAuth::signed_out();
        assert_eq!(auth.current_identity().await, None);

        auth.sign_in(Identity::new("u-1").with_token("jwt"));
        let identity = auth.current_identity().await.unwrap();
        assert_eq!(identity.user_id, "u-1");
        assert_eq!(identity.access_token.as_deref(), Some("jwt"));

        auth.sign_out();
        assert_eq!(auth.current_identity().await, None);
    }
}
