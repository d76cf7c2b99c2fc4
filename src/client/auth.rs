//! Request authorization
//!
//! Credential acquisition and refresh happen outside this crate; an
//! [`AuthProvider`] only attaches an already-obtained credential to each
//! outgoing request.

use super::ClientError;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use std::fmt;

/// Attaches credentials to outgoing requests
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError>;
}

/// Sends requests without credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl AuthProvider for Anonymous {
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        Ok(request)
    }
}

/// Static OAuth bearer token
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Result<Self, ClientError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ClientError::AuthError("bearer token is empty".into()));
        }
        Ok(Self { token })
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl AuthProvider for BearerToken {
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        Ok(request.bearer_auth(&self.token))
    }
}
