//! Credentials, derived authorization state, and the token collaborator.
//!
//! # Design
//! `Authenticator` is plain synchronous state: credentials plus the header
//! values derived from them. Anything that needs the network (fetching a Data
//! API session token) happens outside it, through a [`TokenProvider`], and
//! the result is stored back with [`Authenticator::store_token`]. A generation
//! counter guards against a token fetched for old credentials being stored
//! after the credentials were replaced.

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{require_env, ClientConfig, ProtocolVariant};
use crate::error::{check_status, ApiError, Result};
use crate::http::{HttpMethod, Transport};
use crate::request::RequestBuilder;

/// Header FileMaker uses to echo a freshly issued Data API token.
pub const TOKEN_HEADER: &str = "X-FM-Data-Access-Token";

/// Username and password for the hosted database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `FMPRO_USERNAME` and `FMPRO_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            require_env("FMPRO_USERNAME")?,
            require_env("FMPRO_PASSWORD")?,
        ))
    }

    /// `Basic <base64(username:password)>` as in RFC 7617.
    pub fn basic_header(&self) -> String {
        let encoded = general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Current credentials and the authorization values derived from them.
#[derive(Debug, Clone)]
pub struct Authenticator {
    variant: ProtocolVariant,
    credentials: Credentials,
    basic_header: String,
    bearer_token: Option<String>,
    generation: u64,
}

impl Authenticator {
    pub fn new(variant: ProtocolVariant, credentials: Credentials) -> Self {
        let basic_header = credentials.basic_header();
        Self {
            variant,
            credentials,
            basic_header,
            bearer_token: None,
            generation: 0,
        }
    }

    /// Replace the credentials and recompute the basic header. Any cached
    /// bearer token is dropped without a network call.
    pub fn update_credentials(&mut self, username: &str, password: &str) {
        self.credentials = Credentials::new(username, password);
        self.basic_header = self.credentials.basic_header();
        self.bearer_token = None;
        self.generation += 1;
    }

    /// `Bearer <token>` once a Data API token is held, `Basic <base64>` otherwise.
    pub fn current_authorization_header(&self) -> String {
        match (&self.bearer_token, self.variant.uses_bearer_token()) {
            (Some(token), true) => format!("Bearer {token}"),
            _ => self.basic_header.clone(),
        }
    }

    pub fn basic_header(&self) -> &str {
        &self.basic_header
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// Identifies the credentials a token fetch was started with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store a token fetched for credentials `generation`. Returns `false` and
    /// discards the token when the credentials changed in the meantime.
    pub fn store_token(&mut self, generation: u64, token: String) -> bool {
        if generation != self.generation {
            return false;
        }
        self.bearer_token = Some(token);
        true
    }

    pub fn clear_token(&mut self) -> Option<String> {
        self.bearer_token.take()
    }
}

/// Exchanges credentials for a Data API bearer token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fails with [`ApiError::Authentication`] when the server rejects the credentials.
    async fn fetch_token(&self, config: &ClientConfig, credentials: &Credentials) -> Result<String>;
}

#[async_trait]
impl<P: TokenProvider + ?Sized> TokenProvider for std::sync::Arc<P> {
    async fn fetch_token(&self, config: &ClientConfig, credentials: &Credentials) -> Result<String> {
        (**self).fetch_token(config, credentials).await
    }
}

#[derive(Deserialize)]
struct SessionEnvelope {
    response: SessionResponse,
}

#[derive(Deserialize)]
struct SessionResponse {
    token: Option<String>,
}

/// Log in through `POST {base}/sessions` with Basic auth and return the issued token.
pub async fn session_login<T>(transport: &T, config: &ClientConfig, credentials: &Credentials) -> Result<String>
where
    T: Transport + ?Sized,
{
    let request = RequestBuilder::new(config.base_uri(), credentials.basic_header())
        .build_with_payload("/sessions", HttpMethod::Post, &serde_json::json!({}))?;
    debug!(url = %request.url, "requesting data api session");

    let response = transport.send(request).await?;
    match check_status(response.status, &response.body) {
        Ok(()) => {}
        Err(ApiError::Unauthorized) => {
            return Err(ApiError::Authentication(format!(
                "server rejected credentials for user {}",
                credentials.username
            )))
        }
        Err(e) => return Err(e),
    }

    let from_body = serde_json::from_slice::<SessionEnvelope>(&response.body)
        .ok()
        .and_then(|envelope| envelope.response.token);
    let token = from_body
        .or_else(|| response.header(TOKEN_HEADER).map(str::to_string))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Authentication("session response carried no token".to_string()))?;

    info!(user = %credentials.username, "data api session established");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("alice", "secret123")
    }

    #[test]
    fn basic_header_is_base64_of_user_colon_password() {
        assert_eq!(creds().basic_header(), "Basic YWxpY2U6c2VjcmV0MTIz");
    }

    #[test]
    fn odata_always_uses_basic() {
        let mut auth = Authenticator::new(ProtocolVariant::OData, creds());
        assert!(auth.store_token(0, "tok".to_string()));
        assert_eq!(auth.current_authorization_header(), "Basic YWxpY2U6c2VjcmV0MTIz");
    }

    #[test]
    fn data_api_switches_to_bearer_once_token_is_stored() {
        let mut auth = Authenticator::new(ProtocolVariant::DataApi, creds());
        assert_eq!(auth.current_authorization_header(), "Basic YWxpY2U6c2VjcmV0MTIz");

        let generation = auth.generation();
        assert!(auth.store_token(generation, "tok-1".to_string()));
        assert_eq!(auth.current_authorization_header(), "Bearer tok-1");
    }

    #[test]
    fn update_credentials_recomputes_header_and_drops_token() {
        let mut auth = Authenticator::new(ProtocolVariant::DataApi, creds());
        auth.store_token(auth.generation(), "tok-1".to_string());

        auth.update_credentials("bob", "hunter2");
        assert_eq!(auth.bearer_token(), None);
        assert_eq!(auth.current_authorization_header(), "Basic Ym9iOmh1bnRlcjI=");
        assert_eq!(auth.credentials().username, "bob");
    }

    #[test]
    fn stale_token_is_discarded() {
        let mut auth = Authenticator::new(ProtocolVariant::DataApi, creds());
        let started = auth.generation();
        auth.update_credentials("bob", "hunter2");

        assert!(!auth.store_token(started, "stale".to_string()));
        assert_eq!(auth.bearer_token(), None);
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", creds());
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("secret123"));
    }
}
