//! Bearer token authentication for the import routes
//!
//! Authentication is a capability the routes consume: given a request,
//! determine the acting user or reject it. With no tokens configured every
//! request acts anonymously.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Resolves the acting user of a request
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means the request acts anonymously
    async fn authenticate(&self, parts: &Parts) -> Result<Option<String>>;
}

/// Accepts every request anonymously
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authenticate(&self, _parts: &Parts) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Static bearer tokens. Only SHA-256 digests of the tokens are kept.
pub struct BearerTokens {
    users_by_digest: HashMap<String, String>,
}

impl BearerTokens {
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        let users_by_digest = tokens
            .iter()
            .map(|(token, user)| (digest(token), user.clone()))
            .collect();
        Self { users_by_digest }
    }

    fn user_for(&self, token: &str) -> Option<&str> {
        self.users_by_digest.get(&digest(token)).map(String::as_str)
    }
}

#[async_trait]
impl Authenticator for BearerTokens {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<String>> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?
            .to_str()
            .map_err(|_| Error::Unauthorized("malformed authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("expected a bearer token".to_string()))?;

        self.user_for(token)
            .map(|user| Some(user.to_string()))
            .ok_or_else(|| Error::Unauthorized("unknown token".to_string()))
    }
}

/// Authenticator matching the configuration
pub fn from_config(config: &AuthConfig) -> Box<dyn Authenticator> {
    if config.enabled() {
        tracing::info!("Bearer token authentication enabled ({} tokens)", config.tokens.len());
        Box::new(BearerTokens::new(&config.tokens))
    } else {
        tracing::warn!("No API tokens configured, import routes are unauthenticated");
        Box::new(NoAuth)
    }
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Acting user of a request, extracted from the `Authorization` header
#[derive(Debug, Clone, Default)]
pub struct Actor {
    user: Option<String>,
}

impl Actor {
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn into_user(self) -> Option<String> {
        self.user
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = state.authenticator().authenticate(parts).await?;
        Ok(Actor { user })
    }
}
