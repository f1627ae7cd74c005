//! Stats aggregation: per-day fetch, nearest-day resolution and range series.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use time::{Date, Duration, UtcOffset};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::metrics::{NormalizedMetrics, normalize};
use crate::traits::TrafficStatsSource;
use crate::types::{DateRange, DomainName};
use crate::upstream::RawTrafficStats;

/// How far back [`StatsEngine::find_nearest`] looks by default.
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

/// Stats are published with a lag; today and yesterday never have data.
const REPORTING_LAG_DAYS: i64 = 2;

/// A raw record together with the day it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedStats {
    pub date: Date,
    pub stats: RawTrafficStats,
}

/// Index-aligned daily series for charting. Every vector has `labels.len()`
/// entries; a day without data is `None` in every value series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalSeries {
    pub labels: Vec<String>,
    pub user_reported_spam: Vec<Option<f64>>,
    pub domain_reputation: Vec<Option<u8>>,
    pub ip_reputation: Vec<Option<u8>>,
    pub delivery_errors: Vec<Option<f64>>,
}

impl HistoricalSeries {
    fn with_capacity(days: usize) -> Self {
        Self {
            labels: Vec::with_capacity(days),
            user_reported_spam: Vec::with_capacity(days),
            domain_reputation: Vec::with_capacity(days),
            ip_reputation: Vec::with_capacity(days),
            delivery_errors: Vec::with_capacity(days),
        }
    }

    fn push_present(&mut self, metrics: &NormalizedMetrics) {
        self.labels.push(metrics.date.to_string());
        self.user_reported_spam.push(Some(metrics.user_reported_spam_rate));
        self.domain_reputation.push(metrics.overall_reputation.ordinal());
        self.ip_reputation.push(metrics.true_ip_reputation.ordinal());
        self.delivery_errors.push(Some(metrics.delivery_errors_rate));
    }

    fn push_absent(&mut self, date: Date) {
        self.labels.push(date.to_string());
        self.user_reported_spam.push(None);
        self.domain_reputation.push(None);
        self.ip_reputation.push(None);
        self.delivery_errors.push(None);
    }

    /// Number of days covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Sparse per-day metrics of one domain, keyed by `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain: DomainName,
    pub daily_stats: BTreeMap<String, NormalizedMetrics>,
}

#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct StatsSettings {
    pub horizon_days: u32,
    /// Days fetched concurrently while building a range; 1 is strictly sequential.
    pub fetch_concurrency: usize,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            fetch_concurrency: 1,
        }
    }
}

impl StatsSettings {
    #[must_use]
    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    #[must_use]
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }
}

enum DayOutcome {
    Present(NormalizedMetrics),
    Absent,
    Failed,
}

/// Stats queries over a [`TrafficStatsSource`]. Stateless apart from its settings.
pub struct StatsEngine<U> {
    upstream: U,
    clock: Arc<dyn Clock>,
    settings: StatsSettings,
}

impl<U: TrafficStatsSource> StatsEngine<U> {
    #[must_use]
    pub fn new(upstream: U) -> Self {
        Self {
            upstream,
            clock: Arc::new(SystemClock),
            settings: StatsSettings::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: StatsSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    #[must_use]
    pub fn settings(&self) -> StatsSettings {
        self.settings
    }

    /// Verified domains, sorted.
    ///
    /// # Errors
    ///
    /// Propagates upstream failures.
    pub async fn list_domains(&self, access_token: &str) -> Result<Vec<DomainName>, Error> {
        self.upstream.list_domains(access_token).await.map_err(|e| {
            tracing::error!(error = %e, "Domain listing failed");
            e
        })
    }

    /// One day of raw stats. `Ok(None)` when the upstream has no data for it.
    ///
    /// # Errors
    ///
    /// Hard upstream failures are logged and returned so callers can tell
    /// them apart from absence.
    pub async fn fetch_day(
        &self,
        access_token: &str,
        domain: &DomainName,
        date: Date,
    ) -> Result<Option<RawTrafficStats>, Error> {
        match self.upstream.traffic_stats(access_token, domain, date).await {
            Ok(None) => {
                tracing::debug!(domain = %domain, %date, "No stats for day");
                Ok(None)
            }
            Ok(stats) => Ok(stats),
            Err(e) => {
                tracing::warn!(error = %e, domain = %domain, %date, "Traffic stats fetch failed");
                Err(e)
            }
        }
    }

    /// The most recent day with data, walking back from two days before today.
    ///
    /// Inspects exactly `horizon_days` days at most: today−2, today−3, ….
    ///
    /// # Errors
    ///
    /// Propagates the first hard upstream failure.
    pub async fn find_nearest(
        &self,
        access_token: &str,
        domain: &DomainName,
        horizon_days: u32,
    ) -> Result<Option<DatedStats>, Error> {
        let today = self.today();
        for offset in 0..i64::from(horizon_days) {
            let date = today.saturating_sub(Duration::days(REPORTING_LAG_DAYS + offset));
            if let Some(stats) = self.fetch_day(access_token, domain, date).await? {
                return Ok(Some(DatedStats { date, stats }));
            }
        }
        tracing::debug!(domain = %domain, horizon_days, "No stats within horizon");
        Ok(None)
    }

    /// Normalized metrics of the nearest day with data within the configured horizon.
    ///
    /// # Errors
    ///
    /// See [`StatsEngine::find_nearest`].
    pub async fn latest_metrics(
        &self,
        access_token: &str,
        domain: &DomainName,
    ) -> Result<Option<NormalizedMetrics>, Error> {
        let nearest = self
            .find_nearest(access_token, domain, self.settings.horizon_days)
            .await?;
        Ok(nearest.map(|found| normalize(found.date, &found.stats)))
    }

    /// The window [`StatsEngine::find_nearest`] inspects with the configured horizon.
    #[must_use]
    pub fn nearest_window(&self) -> Option<DateRange> {
        let horizon = i64::from(self.settings.horizon_days);
        if horizon == 0 {
            return None;
        }
        let end = self.today().saturating_sub(Duration::days(REPORTING_LAG_DAYS));
        let start = end.saturating_sub(Duration::days(horizon - 1));
        DateRange::new(start, end).ok()
    }

    /// Gap-aware daily series over `range`.
    ///
    /// # Errors
    ///
    /// Never fails because of a single day; see
    /// [`StatsEngine::build_series_cancellable`].
    pub async fn build_series(
        &self,
        access_token: &str,
        domain: &DomainName,
        range: DateRange,
    ) -> Result<HistoricalSeries, Error> {
        self.build_series_cancellable(access_token, domain, range, &CancellationToken::new())
            .await
    }

    /// Like [`StatsEngine::build_series`], aborting when `cancel` fires.
    ///
    /// Days that fail upstream become gaps. Output is in ascending date order
    /// whatever the fetch concurrency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled; no partial series is returned.
    pub async fn build_series_cancellable(
        &self,
        access_token: &str,
        domain: &DomainName,
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<HistoricalSeries, Error> {
        let days = self.collect_days(access_token, domain, range, cancel).await?;

        let mut series = HistoricalSeries::with_capacity(days.len());
        for (date, outcome) in days {
            match outcome {
                DayOutcome::Present(metrics) => series.push_present(&metrics),
                DayOutcome::Absent | DayOutcome::Failed => series.push_absent(date),
            }
        }
        Ok(series)
    }

    /// Per-day metrics over `range`, omitting days without data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled.
    pub async fn build_domain_summary(
        &self,
        access_token: &str,
        domain: &DomainName,
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<DomainSummary, Error> {
        let days = self.collect_days(access_token, domain, range, cancel).await?;

        let daily_stats = days
            .into_iter()
            .filter_map(|(date, outcome)| match outcome {
                DayOutcome::Present(metrics) => Some((date.to_string(), metrics)),
                DayOutcome::Absent | DayOutcome::Failed => None,
            })
            .collect();

        Ok(DomainSummary {
            domain: domain.clone(),
            daily_stats,
        })
    }

    async fn collect_days(
        &self,
        access_token: &str,
        domain: &DomainName,
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Date, DayOutcome)>, Error> {
        let fetches = futures::stream::iter(range.days())
            .map(|date| async move {
                let outcome = match self.fetch_day(access_token, domain, date).await {
                    Ok(Some(stats)) => DayOutcome::Present(normalize(date, &stats)),
                    Ok(None) => DayOutcome::Absent,
                    Err(_) => DayOutcome::Failed,
                };
                (date, outcome)
            })
            .buffered(self.settings.fetch_concurrency.max(1))
            .collect::<Vec<_>>();

        let days = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(domain = %domain, "Range build cancelled");
                return Err(Error::Cancelled);
            }
            days = fetches => days,
        };

        let failed = days
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DayOutcome::Failed))
            .count();
        if failed > 0 {
            tracing::warn!(
                domain = %domain,
                failed,
                total = days.len(),
                "Failed days treated as absent"
            );
        }
        Ok(days)
    }

    fn today(&self) -> Date {
        self.clock.now().to_offset(UtcOffset::UTC).date()
    }
}
