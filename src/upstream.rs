//! Wire model and HTTP client for the Postmaster Tools API (v1).
//!
//! Only two resources are covered: the per-day `trafficStats` of a domain and
//! the list of verified domains.

use serde::{Deserialize, Deserializer, Serialize};

/// One day of raw traffic statistics, as returned by the upstream.
///
/// Every field is optional on the wire. Numeric fields tolerate strings and
/// garbage; anything unreadable becomes `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RawTrafficStats {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain_reputation: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub spam_ratio: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub user_reported_spam_ratio: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub delivery_errors: Vec<DeliveryError>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ip_reputations: Vec<IpReputation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeliveryError {
    #[serde(default)]
    pub error_class: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub error_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IpReputation {
    #[serde(default)]
    pub reputation: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub ip_count: Option<u64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sample_ips: Vec<String>,
}

impl RawTrafficStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_domain_reputation(mut self, reputation: impl Into<String>) -> Self {
        self.domain_reputation = Some(reputation.into());
        self
    }

    #[must_use]
    pub fn with_spam_ratio(mut self, ratio: f64) -> Self {
        self.spam_ratio = Some(ratio);
        self
    }

    #[must_use]
    pub fn with_user_reported_spam_ratio(mut self, ratio: f64) -> Self {
        self.user_reported_spam_ratio = Some(ratio);
        self
    }

    #[must_use]
    pub fn with_delivery_error(mut self, error_ratio: f64) -> Self {
        self.delivery_errors.push(DeliveryError {
            error_ratio: Some(error_ratio),
            ..DeliveryError::default()
        });
        self
    }

    #[must_use]
    pub fn with_ip_reputation(mut self, reputation: impl Into<String>, sample_ips: &[&str]) -> Self {
        self.ip_reputations.push(IpReputation {
            reputation: Some(reputation.into()),
            ip_count: None,
            sample_ips: sample_ips.iter().map(|s| (*s).to_string()).collect(),
        });
        self
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite()))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(feature = "client")]
pub use client::PostmasterClient;

/// Checks HTTP response status; returns the response on success or an error with details.
#[cfg(feature = "client")]
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, crate::error::Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(crate::error::Error::Upstream {
        operation,
        status: Some(status),
        detail: body,
    })
}

#[cfg(feature = "client")]
mod client {
    use serde::Deserialize;
    use time::Date;
    use time::macros::format_description;
    use url::Url;

    use super::{RawTrafficStats, ensure_success};
    use crate::error::Error;
    use crate::traits::TrafficStatsSource;
    use crate::types::DomainName;

    const DEFAULT_API_URL: &str = "https://gmailpostmastertools.googleapis.com/v1/";

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ListDomainsPage {
        #[serde(default)]
        domains: Vec<DomainEntry>,
        #[serde(default)]
        next_page_token: Option<String>,
    }

    #[derive(Deserialize)]
    struct DomainEntry {
        name: String,
    }

    /// HTTP client for the Postmaster Tools API.
    pub struct PostmasterClient {
        base_url: Url,
        http: reqwest::Client,
    }

    impl Default for PostmasterClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PostmasterClient {
        /// # Panics
        ///
        /// Never; the default base URL is a constant valid URL.
        #[must_use]
        pub fn new() -> Self {
            Self {
                base_url: DEFAULT_API_URL.parse().expect("valid default URL"),
                http: reqwest::Client::new(),
            }
        }

        /// Override the API root (must be the `v1/` collection root).
        #[must_use]
        pub fn with_base_url(mut self, mut url: Url) -> Self {
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            self.base_url = url;
            self
        }

        /// Use a custom HTTP client (for connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        #[must_use]
        pub fn base_url(&self) -> &Url {
            &self.base_url
        }

        fn endpoint(&self, path: &str) -> Result<Url, Error> {
            self.base_url
                .join(path)
                .map_err(|e| Error::Config(format!("API URL {path}: {e}")))
        }

        async fn fetch_traffic_stats(
            &self,
            access_token: &str,
            domain: &DomainName,
            date: Date,
        ) -> Result<Option<RawTrafficStats>, Error> {
            let day = date
                .format(format_description!("[year][month][day]"))
                .map_err(|e| Error::InvalidDate(e.to_string()))?;
            let url = self.endpoint(&format!("domains/{domain}/trafficStats/{day}"))?;

            let response = self.http.get(url).bearer_auth(access_token).send().await?;

            let status = response.status().as_u16();
            if Error::is_upstream_absent_status(status) {
                tracing::debug!(domain = %domain, %date, status, "No traffic stats for day");
                return Ok(None);
            }

            let response = ensure_success(response, "traffic stats").await?;
            Ok(Some(response.json::<RawTrafficStats>().await?))
        }

        async fn fetch_domains(&self, access_token: &str) -> Result<Vec<DomainName>, Error> {
            let mut domains = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut url = self.endpoint("domains")?;
                if let Some(token) = &page_token {
                    url.query_pairs_mut().append_pair("pageToken", token);
                }

                let response = self.http.get(url).bearer_auth(access_token).send().await?;
                let response = ensure_success(response, "list domains").await?;
                let page = response.json::<ListDomainsPage>().await?;

                domains.extend(
                    page.domains
                        .iter()
                        .map(|d| DomainName::from_resource_name(&d.name)),
                );

                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            domains.sort();
            domains.dedup();
            Ok(domains)
        }
    }

    impl TrafficStatsSource for PostmasterClient {
        async fn traffic_stats(
            &self,
            access_token: &str,
            domain: &DomainName,
            date: Date,
        ) -> Result<Option<RawTrafficStats>, Error> {
            self.fetch_traffic_stats(access_token, domain, date).await
        }

        async fn list_domains(&self, access_token: &str) -> Result<Vec<DomainName>, Error> {
            self.fetch_domains(access_token).await
        }
    }
}
