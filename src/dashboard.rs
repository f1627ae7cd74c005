//! Request-level entry points: credential first, then a (cached) stats query.

use std::sync::Arc;

use time::{Date, Duration};
use tokio_util::sync::CancellationToken;

use crate::cache::{DEFAULT_TTL, RangeKey, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::credential::CredentialManager;
use crate::error::Error;
use crate::metrics::NormalizedMetrics;
use crate::stats::{DomainSummary, HistoricalSeries, StatsEngine};
use crate::traits::{CredentialStore, TokenRefresher, TrafficStatsSource};
use crate::types::{DateRange, DomainName, SessionId};

/// Everything a dashboard handler needs for one user session at a time.
///
/// # Example
///
/// ```rust,ignore
/// let dashboard = Dashboard::new(credentials, StatsEngine::new(PostmasterClient::new()));
///
/// async fn history(session: SessionId, domain: DomainName, start: Date, end: Date) {
///     let series = dashboard.historical_series(&session, &domain, start, end).await?;
///     // render series.labels / series.domain_reputation ...
/// }
/// ```
pub struct Dashboard<S, R, U> {
    credentials: CredentialManager<S, R>,
    stats: StatsEngine<U>,
    series_cache: ResponseCache<RangeKey, HistoricalSeries>,
    summary_cache: ResponseCache<RangeKey, DomainSummary>,
    latest_cache: ResponseCache<RangeKey, Option<NormalizedMetrics>>,
}

impl<S, R, U> Dashboard<S, R, U>
where
    S: CredentialStore,
    R: TokenRefresher,
    U: TrafficStatsSource,
{
    #[must_use]
    pub fn new(credentials: CredentialManager<S, R>, stats: StatsEngine<U>) -> Self {
        Self::with_cache(credentials, stats, DEFAULT_TTL, Arc::new(SystemClock))
    }

    /// Custom response-cache lifetime and clock.
    #[must_use]
    pub fn with_cache(
        credentials: CredentialManager<S, R>,
        stats: StatsEngine<U>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            stats,
            series_cache: ResponseCache::with_clock(ttl, Arc::clone(&clock)),
            summary_cache: ResponseCache::with_clock(ttl, Arc::clone(&clock)),
            latest_cache: ResponseCache::with_clock(ttl, clock),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialManager<S, R> {
        &self.credentials
    }

    #[must_use]
    pub fn stats(&self) -> &StatsEngine<U> {
        &self.stats
    }

    /// Verified domains of the session's account, sorted.
    ///
    /// # Errors
    ///
    /// Credential errors from [`CredentialManager::acquire`], or the upstream failure.
    pub async fn list_domains(&self, session: &SessionId) -> Result<Vec<DomainName>, Error> {
        let credential = self.credentials.acquire(session).await?;
        self.stats.list_domains(&credential.access_token).await
    }

    /// Metrics of the most recent day with data, or `None` when no day in the
    /// horizon has any.
    ///
    /// # Errors
    ///
    /// Credential errors, or a hard upstream failure while walking back.
    pub async fn latest_stat(
        &self,
        session: &SessionId,
        domain: &DomainName,
    ) -> Result<Option<NormalizedMetrics>, Error> {
        let credential = self.credentials.acquire(session).await?;
        let Some(window) = self.stats.nearest_window() else {
            return Ok(None);
        };

        self.latest_cache
            .get_or_compute(RangeKey::new(domain, window), || {
                self.stats.latest_metrics(&credential.access_token, domain)
            })
            .await
    }

    /// Gap-aware daily series from `start` to `end` inclusive.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRange`] when `end < start`, checked before any network
    /// call; otherwise credential errors.
    pub async fn historical_series(
        &self,
        session: &SessionId,
        domain: &DomainName,
        start: Date,
        end: Date,
    ) -> Result<HistoricalSeries, Error> {
        self.historical_series_cancellable(session, domain, start, end, &CancellationToken::new())
            .await
    }

    /// Like [`Dashboard::historical_series`], aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Additionally [`Error::Cancelled`]; nothing is cached in that case.
    pub async fn historical_series_cancellable(
        &self,
        session: &SessionId,
        domain: &DomainName,
        start: Date,
        end: Date,
        cancel: &CancellationToken,
    ) -> Result<HistoricalSeries, Error> {
        let range = DateRange::new(start, end)?;
        let credential = self.credentials.acquire(session).await?;

        self.series_cache
            .get_or_compute(RangeKey::new(domain, range), || {
                self.stats
                    .build_series_cancellable(&credential.access_token, domain, range, cancel)
            })
            .await
    }

    /// Sparse per-day metrics from `start` to `end` inclusive.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRange`] when `end < start`, checked before any network
    /// call; otherwise credential errors.
    pub async fn domain_summary(
        &self,
        session: &SessionId,
        domain: &DomainName,
        start: Date,
        end: Date,
    ) -> Result<DomainSummary, Error> {
        self.domain_summary_cancellable(session, domain, start, end, &CancellationToken::new())
            .await
    }

    /// Like [`Dashboard::domain_summary`], aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Additionally [`Error::Cancelled`]; nothing is cached in that case.
    pub async fn domain_summary_cancellable(
        &self,
        session: &SessionId,
        domain: &DomainName,
        start: Date,
        end: Date,
        cancel: &CancellationToken,
    ) -> Result<DomainSummary, Error> {
        let range = DateRange::new(start, end)?;
        let credential = self.credentials.acquire(session).await?;

        self.summary_cache
            .get_or_compute(RangeKey::new(domain, range), || {
                self.stats
                    .build_domain_summary(&credential.access_token, domain, range, cancel)
            })
            .await
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.series_cache.clear();
        self.summary_cache.clear();
        self.latest_cache.clear();
    }
}
