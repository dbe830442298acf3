//! credentials and providers
//!
//! Credentials are fetched anew for every request, so short-lived
//! session credentials rotate without any coordination with in-flight
//! requests: a request is always signed self-consistently with the
//! credentials it fetched.

use crate::errors::{S3Error, S3Result};

use std::env;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use zeroize::ZeroizeOnDrop;

/// An AWS access key pair, with an optional STS session token.
///
/// The secret key is zeroed on drop and redacted from `Debug` output.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Credentials {
    /// access key id
    access_key: String,
    /// secret access key
    secret_key: String,
    /// session token, present for temporary credentials
    session_token: Option<String>,
}

impl Credentials {
    /// Constructs credentials from an access/secret key pair.
    ///
    /// # Errors
    /// Returns [`S3Error::Credential`] if either key is empty.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
    ) -> S3Result<Self> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(S3Error::Credential(
                "provider returned an empty access or secret key".into(),
            ));
        }
        Ok(Self {
            access_key,
            secret_key,
            session_token,
        })
    }

    /// access key id
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// secret access key
    #[must_use]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// session token, if any
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Capability yielding credentials for request signing.
///
/// The middleware holds one provider handle and calls it once per
/// request; implementations may cache, refresh, or assume roles behind
/// this interface.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Yields a credential set for the next request.
    async fn credentials(&self) -> S3Result<Credentials>;
}

/// Provider returning a fixed credential set.
#[derive(Debug)]
pub struct StaticCredentialsProvider {
    /// the fixed credentials
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    /// Wraps fixed credentials as a provider.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credentials(&self) -> S3Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Provider reading the conventional `AWS_*` environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialsProvider;

impl EnvCredentialsProvider {
    /// Constructs the environment provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialsProvider for EnvCredentialsProvider {
    async fn credentials(&self) -> S3Result<Credentials> {
        let access_key = env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| S3Error::Credential("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_key = env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| S3Error::Credential("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty());
        Credentials::new(access_key, secret_key, session_token)
    }
}

/// Provider chain: the first provider that yields credentials wins.
pub struct ChainCredentialsProvider {
    /// providers in priority order
    providers: Vec<Arc<dyn CredentialsProvider>>,
}

impl ChainCredentialsProvider {
    /// Builds a chain from providers in priority order.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn CredentialsProvider>>) -> Self {
        Self { providers }
    }
}

impl Debug for ChainCredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainCredentialsProvider")
            .field("providers", &self.providers.len())
            .finish()
    }
}

#[async_trait]
impl CredentialsProvider for ChainCredentialsProvider {
    async fn credentials(&self) -> S3Result<Credentials> {
        for provider in &self.providers {
            if let Ok(creds) = provider.credentials().await {
                return Ok(creds);
            }
        }
        Err(S3Error::Credential(
            "no provider in the chain yielded credentials".into(),
        ))
    }
}
