//! Normalization of raw daily stats into bounded, chartable metrics.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::upstream::RawTrafficStats;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Reputation category with a fixed ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reputation {
    Bad,
    Low,
    Medium,
    High,
    #[default]
    None,
}

impl Reputation {
    /// Parse an upstream category, case-insensitively. Unknown values,
    /// including `REPUTATION_CATEGORY_UNSPECIFIED`, map to [`Reputation::None`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("BAD") => Self::Bad,
            Some("LOW") => Self::Low,
            Some("MEDIUM") => Self::Medium,
            Some("HIGH") => Self::High,
            _ => Self::None,
        }
    }

    /// `BAD=1 < LOW=2 < MEDIUM=3 < HIGH=4`. `NONE` has no ordinal.
    #[must_use]
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Self::Bad => Some(1),
            Self::Low => Some(2),
            Self::Medium => Some(3),
            Self::High => Some(4),
            Self::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpReputationEntry {
    pub reputation: Reputation,
    /// First sample IP reported for this category.
    pub ip: Option<String>,
}

/// Canonical metrics for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetrics {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub spam_rate: f64,
    pub delivery_errors_rate: f64,
    pub user_reported_spam_rate: f64,
    pub overall_reputation: Reputation,
    pub true_ip_reputation: Reputation,
    pub ip_reputations: Vec<IpReputationEntry>,
}

/// Fraction in `[0, 1]` to a percentage rounded to two decimals, clamped to `[0, 100]`.
#[must_use]
pub fn percent(fraction: Option<f64>) -> f64 {
    match fraction {
        Some(f) if f.is_finite() => ((f * 10_000.0).round() / 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    }
}

/// Normalize one raw daily record. Pure and infallible.
#[must_use]
pub fn normalize(date: Date, raw: &RawTrafficStats) -> NormalizedMetrics {
    let delivery_errors: f64 = raw
        .delivery_errors
        .iter()
        .filter_map(|e| e.error_ratio)
        .filter(|r| r.is_finite())
        .sum();

    let ip_reputations: Vec<IpReputationEntry> = raw
        .ip_reputations
        .iter()
        .map(|entry| IpReputationEntry {
            reputation: Reputation::parse(entry.reputation.as_deref()),
            ip: entry.sample_ips.first().cloned(),
        })
        .collect();

    let true_ip_reputation = ip_reputations
        .iter()
        .find(|entry| entry.ip.is_some())
        .map_or(Reputation::None, |entry| entry.reputation);

    NormalizedMetrics {
        date,
        spam_rate: percent(raw.spam_ratio),
        delivery_errors_rate: percent(Some(delivery_errors)),
        user_reported_spam_rate: percent(raw.user_reported_spam_ratio),
        overall_reputation: Reputation::parse(raw.domain_reputation.as_deref()),
        true_ip_reputation,
        ip_reputations,
    }
}
