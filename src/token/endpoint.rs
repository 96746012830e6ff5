//! Gateway token endpoint.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Token request failed: {0}")]
    Transport(String),

    #[error("Token endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Received empty token from server")]
    Empty,

    #[error("Failed to fetch token after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<TokenError> },
}

/// Issues and revokes gateway bearer tokens.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Obtain a fresh token (`GET join/`).
    async fn join(&self) -> Result<String, TokenError>;

    /// Invalidate `token` (`GET revoke/?token=…`).
    async fn revoke(&self, token: &str) -> Result<(), TokenError>;
}

/// [`TokenEndpoint`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    base: Url,
}

impl HttpTokenEndpoint {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, TokenError> {
        let base = parse_base(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TokenError::Transport(e.to_string()))?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TokenError> {
        self.base
            .join(path)
            .map_err(|e| TokenError::InvalidUrl(e.to_string()))
    }
}

/// Parse a base URL, making sure relative joins stay beneath it.
pub(crate) fn parse_base(base_url: &str) -> Result<Url, TokenError> {
    let mut base = Url::parse(base_url).map_err(|e| TokenError::InvalidUrl(e.to_string()))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn join(&self) -> Result<String, TokenError> {
        let response = self
            .http
            .get(self.endpoint("join/")?)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;
        let token = body.trim();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(token.to_string())
    }

    async fn revoke(&self, token: &str) -> Result<(), TokenError> {
        let mut url = self.endpoint("revoke/")?;
        url.query_pairs_mut().append_pair("token", token);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TokenError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
