use std::future::Future;

use time::Date;

use crate::credential::Credential;
use crate::error::Error;
use crate::oauth::TokenResponse;
use crate::types::{DomainName, SessionId};
use crate::upstream::RawTrafficStats;

/// Consumer-provided credential persistence, keyed by session.
///
/// Durability is entirely the implementor's concern; [`MemoryCredentialStore`]
/// keeps everything in process.
///
/// # Example
///
/// ```rust,ignore
/// impl CredentialStore for MyAppState {
///     async fn load(&self, session: &SessionId) -> Result<Option<Credential>, ...> {
///         self.db.find_credential(session).await
///     }
///
///     async fn save(&self, session: &SessionId, credential: Credential) -> Result<(), ...> {
///         self.db.upsert_credential(session, &credential).await
///     }
///
///     async fn remove(&self, session: &SessionId) -> Result<(), ...> {
///         self.db.delete_credential(session).await
///     }
/// }
/// ```
///
/// [`MemoryCredentialStore`]: crate::credential::MemoryCredentialStore
pub trait CredentialStore: Send + Sync + 'static {
    /// Look up the credential of a session.
    fn load(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Option<Credential>, Box<dyn std::error::Error + Send + Sync>>>
           + Send;

    /// Insert or replace the credential of a session.
    fn save(
        &self,
        session: &SessionId,
        credential: Credential,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send;

    /// Drop the credential of a session (logout or irrecoverable refresh failure).
    fn remove(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Performs the network refresh of an access token.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenResponse, Error>> + Send;
}

/// The upstream reputation-metrics service.
pub trait TrafficStatsSource: Send + Sync + 'static {
    /// Fetch one day of traffic stats.
    ///
    /// `Ok(None)` means the upstream has no data for that day (it answered
    /// "not found" or "bad request"); `Err` is a hard failure.
    fn traffic_stats(
        &self,
        access_token: &str,
        domain: &DomainName,
        date: Date,
    ) -> impl Future<Output = Result<Option<RawTrafficStats>, Error>> + Send;

    /// Verified domains, prefix-stripped and sorted.
    fn list_domains(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Vec<DomainName>, Error>> + Send;
}
