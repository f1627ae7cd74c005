use std::fmt::Display;
use std::str::FromStr;

use time::Duration;
use url::Url;

use crate::cache::DEFAULT_TTL;
use crate::credential::RefreshSettings;
use crate::error::Error;
use crate::oauth::OAuthConfig;
use crate::stats::StatsSettings;

/// Runtime configuration for a [`Dashboard`](crate::dashboard::Dashboard).
///
/// Required field (`oauth`) is a constructor parameter. Use
/// [`from_env()`](DashboardConfig::from_env) for convention-based setup, or
/// [`new()`](DashboardConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub(crate) oauth: OAuthConfig,
    pub(crate) api_url: Option<Url>,
    pub(crate) cache_ttl: Duration,
    pub(crate) refresh: RefreshSettings,
    pub(crate) stats: StatsSettings,
}

impl DashboardConfig {
    #[must_use]
    pub fn new(oauth: OAuthConfig) -> Self {
        Self {
            oauth,
            api_url: None,
            cache_ttl: DEFAULT_TTL,
            refresh: RefreshSettings::default(),
            stats: StatsSettings::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Client credentials
    /// Either `POSTMASTER_CLIENT_SECRETS` (path to a client-secrets JSON
    /// bundle) or both `POSTMASTER_CLIENT_ID` and `POSTMASTER_CLIENT_SECRET`.
    ///
    /// # Optional env vars
    /// - `POSTMASTER_TOKEN_URL`: Override the `OAuth2` token endpoint
    /// - `POSTMASTER_API_URL`: Override the stats API root
    /// - `POSTMASTER_CACHE_TTL_SECS`: Response cache lifetime, positive (default 900)
    /// - `POSTMASTER_REFRESH_SKEW_SECS`: Refresh this close to expiry (default 300)
    /// - `POSTMASTER_REFRESH_WAIT_SECS`: Max wait for an in-flight refresh (default 30)
    /// - `POSTMASTER_NEAREST_HORIZON_DAYS`: Latest-stat look-back (default 30)
    /// - `POSTMASTER_FETCH_CONCURRENCY`: Days fetched at once per range (default 1)
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientMisconfigured`] if client credentials are missing
    /// or unreadable, and [`Error::Config`] for any other invalid value.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env()`](DashboardConfig::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env()`](DashboardConfig::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut oauth = match lookup("POSTMASTER_CLIENT_SECRETS") {
            Some(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| {
                    Error::ClientMisconfigured(format!("POSTMASTER_CLIENT_SECRETS ({path}): {e}"))
                })?;
                OAuthConfig::from_client_secrets_json(&json)?
            }
            None => {
                let client_id = lookup("POSTMASTER_CLIENT_ID").ok_or_else(|| {
                    Error::ClientMisconfigured("POSTMASTER_CLIENT_ID is required".into())
                })?;
                let client_secret = lookup("POSTMASTER_CLIENT_SECRET").ok_or_else(|| {
                    Error::ClientMisconfigured("POSTMASTER_CLIENT_SECRET is required".into())
                })?;
                OAuthConfig::new(client_id, client_secret)
            }
        };

        if let Some(url) = parse_var::<Url>(&lookup, "POSTMASTER_TOKEN_URL")? {
            oauth = oauth.with_token_url(url);
        }

        let mut config = Self::new(oauth);

        if let Some(url) = parse_var::<Url>(&lookup, "POSTMASTER_API_URL")? {
            config = config.with_api_url(url);
        }
        if let Some(secs) = parse_var::<i64>(&lookup, "POSTMASTER_CACHE_TTL_SECS")? {
            if secs <= 0 {
                return Err(Error::Config(
                    "POSTMASTER_CACHE_TTL_SECS must be positive".into(),
                ));
            }
            config = config.with_cache_ttl(Duration::seconds(secs));
        }

        let mut refresh = RefreshSettings::default();
        if let Some(secs) = parse_var::<i64>(&lookup, "POSTMASTER_REFRESH_SKEW_SECS")? {
            refresh = refresh.with_skew(Duration::seconds(secs));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "POSTMASTER_REFRESH_WAIT_SECS")? {
            if secs == 0 {
                return Err(Error::Config(
                    "POSTMASTER_REFRESH_WAIT_SECS must be positive".into(),
                ));
            }
            refresh = refresh.with_wait_timeout(std::time::Duration::from_secs(secs));
        }

        let mut stats = StatsSettings::default();
        if let Some(days) = parse_var::<u32>(&lookup, "POSTMASTER_NEAREST_HORIZON_DAYS")? {
            stats = stats.with_horizon_days(days);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "POSTMASTER_FETCH_CONCURRENCY")? {
            stats = stats.with_fetch_concurrency(n);
        }

        Ok(config.with_refresh_settings(refresh).with_stats_settings(stats))
    }

    #[must_use]
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_settings(mut self, settings: RefreshSettings) -> Self {
        self.refresh = settings;
        self
    }

    #[must_use]
    pub fn with_stats_settings(mut self, settings: StatsSettings) -> Self {
        self.stats = settings;
        self
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    #[must_use]
    pub fn api_url(&self) -> Option<&Url> {
        self.api_url.as_ref()
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    #[must_use]
    pub fn refresh_settings(&self) -> RefreshSettings {
        self.refresh
    }

    #[must_use]
    pub fn stats_settings(&self) -> StatsSettings {
        self.stats
    }

    /// Wire the HTTP token client and stats client over `store`.
    #[cfg(feature = "client")]
    #[must_use]
    pub fn into_dashboard<S: crate::traits::CredentialStore>(
        self,
        store: S,
    ) -> crate::dashboard::Dashboard<S, crate::oauth::AuthClient, crate::upstream::PostmasterClient>
    {
        use std::sync::Arc;

        use crate::clock::SystemClock;
        use crate::credential::CredentialManager;
        use crate::stats::StatsEngine;

        let http = reqwest::Client::new();
        let credentials = CredentialManager::new(
            store,
            crate::oauth::AuthClient::new(self.oauth).with_http_client(http.clone()),
        )
        .with_settings(self.refresh);

        let mut upstream = crate::upstream::PostmasterClient::new().with_http_client(http);
        if let Some(url) = self.api_url {
            upstream = upstream.with_base_url(url);
        }
        let stats = StatsEngine::new(upstream).with_settings(self.stats);

        crate::dashboard::Dashboard::with_cache(
            credentials,
            stats,
            self.cache_ttl,
            Arc::new(SystemClock),
        )
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{name}: {e}")))
        })
        .transpose()
}
