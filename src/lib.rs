#![doc = include_str!("../README.md")]

pub mod cache;
pub mod clock;
pub mod config;
pub mod credential;
pub mod dashboard;
pub mod error;
#[cfg(feature = "axum")]
pub mod http;
pub mod metrics;
pub mod oauth;
pub mod stats;
pub mod traits;
pub mod types;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use cache::{RangeKey, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DashboardConfig;
pub use credential::{Credential, CredentialManager, MemoryCredentialStore, RefreshSettings};
pub use dashboard::Dashboard;
pub use error::Error;
#[cfg(feature = "client")]
pub use oauth::AuthClient;
pub use oauth::{OAuthConfig, TokenResponse};
pub use metrics::{IpReputationEntry, NormalizedMetrics, Reputation, normalize};
pub use stats::{DatedStats, DomainSummary, HistoricalSeries, StatsEngine, StatsSettings};
pub use traits::{CredentialStore, TokenRefresher, TrafficStatsSource};
pub use types::{DateRange, DomainName, SessionId};
#[cfg(feature = "client")]
pub use upstream::PostmasterClient;
pub use upstream::RawTrafficStats;
