use serde::Deserialize;
use url::Url;

use crate::error::Error;

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// `OAuth2` client configuration for the stats service.
///
/// Required fields are constructor parameters — no runtime "missing field" errors.
///
/// ```rust,ignore
/// use postmaster_insights::OAuthConfig;
///
/// let config = OAuthConfig::new("my-client-id", "my-secret");
/// // Optional overrides via chaining:
/// let config = config.with_token_url("https://auth.example.com/token".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) token_url: Url,
}

/// Top-level shape of a downloaded client-secrets bundle.
#[derive(Deserialize)]
struct ClientSecretsFile {
    #[serde(alias = "installed")]
    web: ClientSecrets,
}

#[derive(Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

impl OAuthConfig {
    /// Create a new `OAuth2` configuration with the default token endpoint.
    ///
    /// # Panics
    ///
    /// Never; the default endpoint is a constant valid URL.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: DEFAULT_TOKEN_URL.parse().expect("valid default URL"),
        }
    }

    /// Parse a client-secrets JSON bundle (`{"web": {...}}` or `{"installed": {...}}`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientMisconfigured`] if the bundle is not valid JSON,
    /// lacks a client id/secret, or carries an invalid `token_uri`.
    pub fn from_client_secrets_json(json: &str) -> Result<Self, Error> {
        let file: ClientSecretsFile = serde_json::from_str(json)
            .map_err(|e| Error::ClientMisconfigured(format!("client secrets: {e}")))?;
        let secrets = file.web;
        if secrets.client_id.is_empty() || secrets.client_secret.is_empty() {
            return Err(Error::ClientMisconfigured(
                "client secrets: empty client_id or client_secret".into(),
            ));
        }

        let mut config = Self::new(secrets.client_id, secrets.client_secret);
        if let Some(uri) = secrets.token_uri {
            let url: Url = uri
                .parse()
                .map_err(|e| Error::ClientMisconfigured(format!("token_uri: {e}")))?;
            config = config.with_token_url(url);
        }
        Ok(config)
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}

/// Token response from the `OAuth2` token endpoint.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".into()),
            expires_in: None,
            refresh_token: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }
}

/// `OAuth2` token client: authorization-code exchange and refresh.
#[cfg(feature = "client")]
pub struct AuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

#[cfg(feature = "client")]
impl AuthClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Upstream`] if the token endpoint returns an error.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &Url) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        self.token_request(&params, "token exchange").await
    }

    /// Trade a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Upstream`] if the token endpoint rejects the grant.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        self.token_request(&params, "token refresh").await
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, Error> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(params)
            .send()
            .await?;

        let response = crate::upstream::ensure_success(response, operation).await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }
}

#[cfg(feature = "client")]
impl crate::traits::TokenRefresher for AuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        self.refresh_access_token(refresh_token).await
    }
}
