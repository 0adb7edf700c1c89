use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ExtractError, ExtractResult};

const AMAZON_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";
const BING_TOKEN_URL_PREFIX: &str = "https://login.microsoftonline.com";
const BING_SCOPE: &str = "https://ads.microsoft.com/msads.manage offline_access";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Amazon,
    Bing,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Amazon => "amazon",
            ProviderKind::Bing => "bing",
        }
    }
}

/// Long-lived OAuth client credentials for one provider.
#[derive(Debug, Clone)]
pub struct Credential {
    pub provider: ProviderKind,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Azure AD tenant (Bing only).
    pub tenant_id: Option<String>,
    /// Bing developer token, sent on every data call.
    pub developer_token: Option<String>,
    /// Amazon region code (NA, EU, FE).
    pub region: Option<String>,
}

impl Credential {
    fn cache_key(&self) -> String {
        format!("{}/{}", self.provider.name(), self.client_id)
    }

    fn default_token_url(&self) -> String {
        match self.provider {
            ProviderKind::Amazon => AMAZON_TOKEN_URL.to_string(),
            ProviderKind::Bing => format!(
                "{}/{}/oauth2/v2.0/token",
                BING_TOKEN_URL_PREFIX,
                urlencoding::encode(self.tenant_id.as_deref().unwrap_or("common"))
            ),
        }
    }

    fn refresh_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if self.provider == ProviderKind::Bing {
            params.push(("scope", BING_SCOPE));
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub bearer: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges refresh tokens for bearer tokens and keeps them for the run.
///
/// Cached tokens are never checked for expiry: a run is expected to finish
/// well inside a token's lifetime.
pub struct TokenManager {
    client: Client,
    token_urls: HashMap<ProviderKind, String>,
    cache: HashMap<String, AccessToken>,
}

impl TokenManager {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            token_urls: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Points a provider's token exchange at a different endpoint.
    pub fn with_token_url(mut self, provider: ProviderKind, url: impl Into<String>) -> Self {
        self.token_urls.insert(provider, url.into());
        self
    }

    pub fn acquire(&mut self, credential: &Credential) -> ExtractResult<AccessToken> {
        let key = credential.cache_key();
        if let Some(token) = self.cache.get(&key) {
            debug!(
                credential = %key,
                acquired_at = %token.acquired_at,
                "using cached access token"
            );
            return Ok(token.clone());
        }

        let token = self.refresh(credential)?;
        self.cache.insert(key, token.clone());
        Ok(token)
    }

    fn refresh(&self, credential: &Credential) -> ExtractResult<AccessToken> {
        let url = self
            .token_urls
            .get(&credential.provider)
            .cloned()
            .unwrap_or_else(|| credential.default_token_url());

        info!(provider = credential.provider.name(), "refreshing access token");

        let response = self
            .client
            .post(&url)
            .form(&credential.refresh_params())
            .send()
            .map_err(|e| ExtractError::Auth(e.to_string()))?;

        let status = response.status();
        let body = response.text().unwrap_or_default();

        if !status.is_success() {
            return Err(ExtractError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ExtractError::Auth(format!("unreadable token response: {}", e)))?;

        if let Some(error) = parsed.error {
            let desc = parsed.error_description.unwrap_or_default();
            return Err(ExtractError::Auth(format!("{} - {}", error, desc)));
        }

        match parsed.access_token {
            Some(bearer) if !bearer.is_empty() => Ok(AccessToken {
                bearer,
                acquired_at: Utc::now(),
            }),
            _ => Err(ExtractError::Auth(
                "token response has no access_token".to_string(),
            )),
        }
    }
}
