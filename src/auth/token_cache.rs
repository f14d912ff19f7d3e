//! OAuth2 client-credentials token cache
//!
//! Tokens are cached per `<scheme>_<client_id>` and treated as expired one
//! minute before the provider's stated lifetime. Two concurrent misses may
//! both fetch; the later insert wins.

use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Safety margin subtracted from every lifetime
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Parameters of one token request
#[derive(Debug, Clone, Copy)]
pub struct TokenRequest<'a> {
    /// Scheme name, part of the cache key
    pub scheme: &'a str,
    /// Token endpoint
    pub token_url: &'a str,
    /// Client id
    pub client_id: &'a str,
    /// Client secret
    pub client_secret: &'a str,
    /// Space-separated scopes, omitted when `None`
    pub scopes: Option<&'a str>,
}

/// Process-wide token cache
#[derive(Debug)]
pub struct TokenCache {
    client: Client,
    tokens: DashMap<String, CachedToken>,
}

impl TokenCache {
    /// Create an empty cache that fetches with `client`
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tokens: DashMap::new(),
        }
    }

    /// A valid token for `request`, fetching one on a miss.
    ///
    /// Any fetch failure is logged and yields `None`.
    pub async fn token(&self, request: TokenRequest<'_>) -> Option<String> {
        let key = format!("{}_{}", request.scheme, request.client_id);
        if let Some(cached) = self.tokens.get(&key)
            && Instant::now() < cached.expires_at
        {
            debug!(scheme = %request.scheme, "Using cached OAuth2 token");
            return Some(cached.access_token.clone());
        }

        let fetched = self.fetch(&request).await?;
        let token = fetched.access_token.clone();
        self.tokens.insert(key, fetched);
        Some(token)
    }

    /// Number of cached entries, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    async fn fetch(&self, request: &TokenRequest<'_>) -> Option<CachedToken> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scopes) = request.scopes {
            form.push(("scope", scopes));
        }

        let response = match self
            .client
            .post(request.token_url)
            .basic_auth(request.client_id, Some(request.client_secret))
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(scheme = %request.scheme, error = %e, "OAuth2 token request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(scheme = %request.scheme, status = status.as_u16(), "OAuth2 token endpoint rejected request");
            return None;
        }

        let body: TokenResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(scheme = %request.scheme, error = %e, "OAuth2 token response unreadable");
                return None;
            }
        };
        let Some(access_token) = body.access_token.filter(|t| !t.is_empty()) else {
            warn!(scheme = %request.scheme, "OAuth2 token response has no access_token");
            return None;
        };

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));
        debug!(scheme = %request.scheme, expires_in = lifetime.as_secs(), "Fetched OAuth2 token");
        Some(CachedToken {
            access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}
