//! In-memory upstream used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use time::Date;

use crate::error::Error;
use crate::traits::TrafficStatsSource;
use crate::types::DomainName;
use crate::upstream::RawTrafficStats;

#[derive(Clone)]
pub(crate) enum Day {
    Present(RawTrafficStats),
    Fail,
}

#[derive(Default)]
pub(crate) struct FakeUpstream {
    days: HashMap<Date, Day>,
    delays: HashMap<Date, std::time::Duration>,
    domains: Vec<DomainName>,
    fail_listing: bool,
    calls: Mutex<Vec<Date>>,
    tokens: Mutex<Vec<String>>,
}

impl FakeUpstream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn present(mut self, date: Date, stats: RawTrafficStats) -> Self {
        self.days.insert(date, Day::Present(stats));
        self
    }

    pub(crate) fn failing(mut self, date: Date) -> Self {
        self.days.insert(date, Day::Fail);
        self
    }

    pub(crate) fn delayed(mut self, date: Date, delay: std::time::Duration) -> Self {
        self.delays.insert(date, delay);
        self
    }

    pub(crate) fn with_domains(mut self, domains: &[&str]) -> Self {
        self.domains = domains.iter().map(|d| DomainName::from(*d)).collect();
        self
    }

    pub(crate) fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Days requested so far, in request order.
    pub(crate) fn calls(&self) -> Vec<Date> {
        self.calls.lock().unwrap().clone()
    }

    /// Access tokens presented so far.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl TrafficStatsSource for FakeUpstream {
    async fn traffic_stats(
        &self,
        access_token: &str,
        _domain: &DomainName,
        date: Date,
    ) -> Result<Option<RawTrafficStats>, Error> {
        self.calls.lock().unwrap().push(date);
        self.tokens.lock().unwrap().push(access_token.to_string());
        if let Some(delay) = self.delays.get(&date) {
            tokio::time::sleep(*delay).await;
        }
        match self.days.get(&date) {
            Some(Day::Present(stats)) => Ok(Some(stats.clone())),
            Some(Day::Fail) => Err(Error::Upstream {
                operation: "traffic stats",
                status: Some(500),
                detail: "backend error".into(),
            }),
            None => Ok(None),
        }
    }

    async fn list_domains(&self, access_token: &str) -> Result<Vec<DomainName>, Error> {
        self.tokens.lock().unwrap().push(access_token.to_string());
        if self.fail_listing {
            return Err(Error::Upstream {
                operation: "list domains",
                status: Some(503),
                detail: "unavailable".into(),
            });
        }
        let mut domains = self.domains.clone();
        domains.sort();
        Ok(domains)
    }
}

/// Refresher that always succeeds with `access-refreshed-{n}`.
#[derive(Default)]
pub(crate) struct CountingRefresher {
    pub(crate) calls: std::sync::atomic::AtomicUsize,
}

impl crate::traits::TokenRefresher for CountingRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<crate::oauth::TokenResponse, Error> {
        let n = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        Ok(crate::oauth::TokenResponse::new(format!("access-refreshed-{n}")).with_expires_in(3600))
    }
}
