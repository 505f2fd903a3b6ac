//! Identity boundary.
//!
//! Resolving a caller to a [`UserId`] happens here and nowhere else. Every
//! service below takes the resolved id explicitly.

use async_trait::async_trait;
use lifeline_core::{LifelineError, LifelineResult, UserId};
use std::collections::HashMap;
use std::fmt;

/// Opaque caller credential, e.g. a bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the caller. Unknown or expired credentials are `Unauthenticated`.
    async fn current_user_id(&self, credential: &Credential) -> LifelineResult<UserId>;
}

/// Fixed token-to-user map.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<Credential, UserId>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, credential: Credential, user_id: UserId) -> Self {
        self.users.insert(credential, user_id);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn current_user_id(&self, credential: &Credential) -> LifelineResult<UserId> {
        self.users.get(credential).copied().ok_or_else(|| {
            tracing::debug!("Rejected unknown credential");
            LifelineError::Unauthenticated
        })
    }
}
