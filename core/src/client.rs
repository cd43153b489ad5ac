//! The shared request pipeline behind both protocol surfaces.
//!
//! # Design
//! `FileMakerClient` owns the config, the transport, and the authenticator.
//! A logical call goes: build (snapshotting the current authorization
//! header) → execute (send, record the body, classify the status) → decode.
//! [`with_reauth`](FileMakerClient::with_reauth) wraps a whole logical call:
//! on `Unauthorized` it refreshes the token once and re-runs the call once.
//! A second `Unauthorized` is returned to the caller.
//!
//! Each call gets its own `HttpResponse` back. The last sent request and the
//! last received body are also kept for
//! [`last_request`](FileMakerClient::last_request) and
//! [`last_response`](FileMakerClient::last_response), which are only
//! meaningful when calls are not running concurrently. Locks are never held
//! across an await.
//!
//! Request URLs are logged with the token segment of `/sessions/{token}`
//! replaced, and each attempt of a logical call runs inside a `call` span
//! carrying its `attempt` number.

use std::future::Future;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::auth::{session_login, Authenticator, Credentials, TokenProvider};
use crate::config::ClientConfig;
use crate::error::{check_status, ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::request::RequestBuilder;

pub struct FileMakerClient<T> {
    config: ClientConfig,
    transport: T,
    auth: RwLock<Authenticator>,
    token_provider: Option<Box<dyn TokenProvider>>,
    last_request: Mutex<Option<HttpRequest>>,
    last_response: Mutex<Option<Vec<u8>>>,
}

impl<T: Transport> FileMakerClient<T> {
    pub fn new(config: ClientConfig, credentials: Credentials, transport: T) -> Self {
        let auth = Authenticator::new(config.variant(), credentials);
        Self {
            config,
            transport,
            auth: RwLock::new(auth),
            token_provider: None,
            last_request: Mutex::new(None),
            last_response: Mutex::new(None),
        }
    }

    /// Replace the default session login with a custom token source.
    pub fn with_token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.token_provider = Some(Box::new(provider));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_uri(&self) -> &str {
        self.config.base_uri()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The value the next request's `Authorization` header will carry.
    pub fn authorization_header(&self) -> String {
        self.auth.read().current_authorization_header()
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.auth.read().bearer_token().map(str::to_string)
    }

    /// Replace the credentials. The basic header is recomputed immediately
    /// and any cached bearer token is dropped; no request is sent.
    pub fn update_credentials(&self, username: &str, password: &str) {
        self.auth.write().update_credentials(username, password);
        info!(user = %username, "credentials updated");
    }

    /// The most recently sent request, `Authorization` header included.
    /// Session logins made by the default token fetch are not recorded.
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.last_request.lock().clone()
    }

    /// Raw body of the most recently received response.
    pub fn last_response(&self) -> Option<Vec<u8>> {
        self.last_response.lock().clone()
    }

    /// Obtain a fresh authorization value.
    ///
    /// Data API: fetches a new bearer token through the token provider (or
    /// the `/sessions` login when none is set). OData: the basic header is
    /// derived from the credentials already, so nothing is fetched.
    pub async fn refresh_token(&self) -> Result<()> {
        if !self.config.variant().uses_bearer_token() {
            debug!("basic auth in use, nothing to refresh");
            return Ok(());
        }

        let (credentials, generation) = {
            let auth = self.auth.read();
            (auth.credentials().clone(), auth.generation())
        };

        let token = match &self.token_provider {
            Some(provider) => provider.fetch_token(&self.config, &credentials).await?,
            None => session_login(&self.transport, &self.config, &credentials).await?,
        };

        if self.auth.write().store_token(generation, token) {
            info!("bearer token refreshed");
        } else {
            debug!("credentials changed during refresh, token discarded");
        }
        Ok(())
    }

    pub(crate) fn clear_token(&self) -> Option<String> {
        self.auth.write().clear_token()
    }

    pub fn build_request(&self, path: &str, method: HttpMethod) -> Result<HttpRequest> {
        RequestBuilder::new(self.config.base_uri(), self.authorization_header()).build(path, method)
    }

    pub fn build_request_with_payload<P>(&self, path: &str, method: HttpMethod, payload: &P) -> Result<HttpRequest>
    where
        P: Serialize + ?Sized,
    {
        RequestBuilder::new(self.config.base_uri(), self.authorization_header())
            .build_with_payload(path, method, payload)
    }

    /// Send `request`, record the body, and classify the status.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = loggable_url(&request.url);
        let response = self.dispatch(request).await?;
        if let Err(e) = check_status(response.status, &response.body) {
            warn!(status = response.status, url = %url, error = %e, "request rejected");
            return Err(e);
        }
        Ok(response)
    }

    /// Send `request` and record the body without looking at the status.
    pub(crate) async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let url = loggable_url(&request.url);
        debug!(%method, url = %url, "sending request");
        *self.last_request.lock() = Some(request.clone());

        let started = Instant::now();
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%method, url = %url, error = %e, "transport failure");
                return Err(e.into());
            }
        };
        debug!(
            status = response.status,
            bytes = response.body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response received"
        );

        *self.last_response.lock() = Some(response.body.clone());
        Ok(response)
    }

    /// Build and execute a request without a body.
    pub async fn call(&self, method: HttpMethod, path: &str) -> Result<HttpResponse> {
        let request = self.build_request(path, method)?;
        self.execute(request).await
    }

    /// Build and execute a request carrying `payload` as JSON.
    pub async fn call_with<P>(&self, method: HttpMethod, path: &str, payload: &P) -> Result<HttpResponse>
    where
        P: Serialize + ?Sized,
    {
        let request = self.build_request_with_payload(path, method, payload)?;
        self.execute(request).await
    }

    /// Run a logical call, and on `Unauthorized` refresh the token and run it
    /// exactly once more.
    pub async fn with_reauth<R, F, Fut>(&self, mut op: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        match op().instrument(debug_span!("call", attempt = 1)).await {
            Err(ApiError::Unauthorized) => {
                warn!("unauthorized, refreshing credentials and retrying once");
                self.refresh_token().await?;
                op().instrument(debug_span!("call", attempt = 2)).await
            }
            result => result,
        }
    }
}

const SESSIONS_SEGMENT: &str = "/sessions/";

/// `url` with the token after `/sessions/` replaced by `<redacted>`.
fn loggable_url(url: &str) -> String {
    match url.find(SESSIONS_SEGMENT) {
        Some(at) => format!("{}<redacted>", &url[..at + SESSIONS_SEGMENT.len()]),
        None => url.to_string(),
    }
}

/// Fail with `MissingParameter(name)` when `value` is empty.
pub(crate) fn require_param(value: &str, name: &'static str) -> Result<()> {
    if value.is_empty() {
        return Err(ApiError::MissingParameter(name));
    }
    Ok(())
}
