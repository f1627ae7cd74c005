//! Session credentials and the single-flight refresh coordinator.
//!
//! Every upstream call goes through [`CredentialManager::acquire`]. When a
//! credential is about to expire, the first caller spawns one refresh task
//! and registers its shared outcome for the session; every concurrent caller
//! awaits that same outcome. The task records its result in the
//! [`CredentialStore`] before resolving, so no waiter can observe the outcome
//! ahead of the store.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, MutexGuard, RwLock};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::oauth::TokenResponse;
use crate::traits::{CredentialStore, TokenRefresher};
use crate::types::SessionId;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Refresh once the credential is this close to expiry.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::minutes(5);

/// Upper bound on how long a caller waits for an in-flight refresh.
pub const DEFAULT_REFRESH_WAIT: std::time::Duration = std::time::Duration::from_secs(30);

/// Access/refresh token pair of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// When the token endpoint issued the access token, if known.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub issued_at: Option<OffsetDateTime>,
}

impl Credential {
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            issued_at: None,
        }
    }

    /// Build from a token endpoint response received at `now`.
    ///
    /// Refresh responses usually omit the refresh token; `previous_refresh_token`
    /// is kept in that case.
    #[must_use]
    pub fn from_token_response(
        tokens: &TokenResponse,
        now: OffsetDateTime,
        previous_refresh_token: Option<&str>,
    ) -> Self {
        let lifetime = tokens
            .expires_in
            .and_then(|s| i64::try_from(s).ok())
            .map_or(DEFAULT_TOKEN_LIFETIME, Duration::seconds);
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens
                .refresh_token
                .clone()
                .or_else(|| previous_refresh_token.map(str::to_string)),
            expires_at: now + lifetime,
            issued_at: Some(now),
        }
    }

    /// Whether the credential expires within `skew` of `now` (or already has).
    #[must_use]
    pub fn expires_within(&self, now: OffsetDateTime, skew: Duration) -> bool {
        self.expires_at - now <= skew
    }

    /// `skew`, capped at half the token lifetime when the issue time is known.
    #[must_use]
    pub fn refresh_skew(&self, skew: Duration) -> Duration {
        match self.issued_at {
            Some(issued_at) => skew.min((self.expires_at - issued_at) / 2),
            None => skew,
        }
    }

    /// Whether the credential is due for refresh at `now`.
    #[must_use]
    pub fn needs_refresh(&self, now: OffsetDateTime, skew: Duration) -> bool {
        self.expires_within(now, self.refresh_skew(skew))
    }
}

/// In-process [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<SessionId, Credential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    async fn load(
        &self,
        session: &SessionId,
    ) -> Result<Option<Credential>, Box<dyn std::error::Error + Send + Sync>> {
        let credentials = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        Ok(credentials.get(session).cloned())
    }

    async fn save(
        &self,
        session: &SessionId,
        credential: Credential,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        credentials.insert(session.clone(), credential);
        Ok(())
    }

    async fn remove(
        &self,
        session: &SessionId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        credentials.remove(session);
        Ok(())
    }
}

/// Refresh timing knobs.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct RefreshSettings {
    pub skew: Duration,
    pub wait_timeout: std::time::Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            skew: DEFAULT_REFRESH_SKEW,
            wait_timeout: DEFAULT_REFRESH_WAIT,
        }
    }
}

impl RefreshSettings {
    #[must_use]
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, wait_timeout: std::time::Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }
}

/// Why a refresh did not produce a credential. Shared by every waiter.
#[derive(Debug, Clone)]
enum RefreshFailure {
    Rejected(String),
    Misconfigured(String),
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Rejected(reason) => Self::RefreshFailed(reason),
            RefreshFailure::Misconfigured(reason) => Self::ClientMisconfigured(reason),
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, RefreshFailure>>>;

/// Per-session refresh slot; `Some` while a refresh is in flight.
type Slot = Arc<Mutex<Option<SharedRefresh>>>;

type SlotMap = Arc<std::sync::Mutex<HashMap<SessionId, Slot>>>;

enum Flight {
    Ready(Credential),
    Join(SharedRefresh),
}

/// Supplies a valid credential per session, refreshing at most once per expiry.
pub struct CredentialManager<S, R> {
    store: Arc<S>,
    refresher: Arc<R>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    slots: SlotMap,
}

impl<S: CredentialStore, R: TokenRefresher> CredentialManager<S, R> {
    #[must_use]
    pub fn new(store: S, refresher: R) -> Self {
        Self {
            store: Arc::new(store),
            refresher: Arc::new(refresher),
            clock: Arc::new(SystemClock),
            settings: RefreshSettings::default(),
            slots: SlotMap::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RefreshSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    #[must_use]
    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    /// Record the credential obtained from an authorization-code exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the credential cannot be persisted.
    pub async fn establish(
        &self,
        session: &SessionId,
        tokens: &TokenResponse,
    ) -> Result<Credential, Error> {
        let credential = Credential::from_token_response(tokens, self.clock.now(), None);
        self.store
            .save(session, credential.clone())
            .await
            .map_err(Error::store)?;
        tracing::info!(session = %session, expires_at = %credential.expires_at, "Session credential established");
        Ok(credential)
    }

    /// Drop the session credential (logout).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the store fails.
    pub async fn invalidate(&self, session: &SessionId) -> Result<(), Error> {
        self.store.remove(session).await.map_err(Error::store)
    }

    /// Whether a refresh is currently in flight for the session.
    pub async fn is_refreshing(&self, session: &SessionId) -> bool {
        let slot = lock_slots(&self.slots).get(session).cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// A currently valid credential for the session.
    ///
    /// Returns immediately unless the credential is due for refresh. Then
    /// exactly one refresh runs for all concurrent callers of the session,
    /// and each waits at most the configured bound for it.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthRequired`] if the session has no credential.
    /// - [`Error::RefreshFailed`] if the refresh was rejected; the session
    ///   credential has been removed.
    /// - [`Error::ClientMisconfigured`] if the refresher reports bad client material.
    /// - [`Error::RefreshTimeout`] if the wait bound elapsed.
    /// - [`Error::Store`] on credential store failure.
    pub async fn acquire(&self, session: &SessionId) -> Result<Credential, Error> {
        let credential = self.load(session).await?;
        if !credential.needs_refresh(self.clock.now(), self.settings.skew) {
            return Ok(credential);
        }

        let flight = match self.join_or_start(session).await? {
            Flight::Ready(credential) => return Ok(credential),
            Flight::Join(flight) => flight,
        };

        let waited = self.settings.wait_timeout;
        match tokio::time::timeout(waited, flight).await {
            Ok(outcome) => outcome.map_err(Error::from),
            Err(_) => {
                tracing::warn!(session = %session, ?waited, "Gave up waiting for credential refresh");
                Err(Error::RefreshTimeout { waited })
            }
        }
    }

    async fn load(&self, session: &SessionId) -> Result<Credential, Error> {
        self.store
            .load(session)
            .await
            .map_err(Error::store)?
            .ok_or(Error::AuthRequired)
    }

    async fn join_or_start(&self, session: &SessionId) -> Result<Flight, Error> {
        let slot = Arc::clone(lock_slots(&self.slots).entry(session.clone()).or_default());
        let mut current = slot.lock().await;
        if let Some(flight) = current.as_ref() {
            return Ok(Flight::Join(flight.clone()));
        }

        // A refresh may have completed between our first look and taking the slot.
        let credential = self.load(session).await?;
        if !credential.needs_refresh(self.clock.now(), self.settings.skew) {
            return Ok(Flight::Ready(credential));
        }

        let flight = self.spawn_refresh(session.clone(), credential, Arc::clone(&slot));
        *current = Some(flight.clone());
        Ok(Flight::Join(flight))
    }

    fn spawn_refresh(&self, session: SessionId, credential: Credential, slot: Slot) -> SharedRefresh {
        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        let clock = Arc::clone(&self.clock);
        let slots = Arc::clone(&self.slots);
        let skew = self.settings.skew;

        tracing::debug!(session = %session, "Starting credential refresh");
        let task = tokio::spawn(async move {
            let refresh = refresh_session(&*store, &*refresher, &*clock, skew, &session, credential);
            let outcome = match AssertUnwindSafe(refresh).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let failure = RefreshFailure::Rejected("token refresher panicked".into());
                    invalidate_after(&*store, &session, failure).await
                }
            };

            slot.lock().await.take();
            let mut registered = lock_slots(&slots);
            if registered.get(&session).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                registered.remove(&session);
            }
            drop(registered);
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(RefreshFailure::Rejected(format!("refresh task aborted: {e}")))
            })
        }
        .boxed()
        .shared()
    }
}

fn lock_slots(slots: &SlotMap) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

async fn refresh_session<S: CredentialStore, R: TokenRefresher>(
    store: &S,
    refresher: &R,
    clock: &dyn Clock,
    skew: Duration,
    session: &SessionId,
    credential: Credential,
) -> Result<Credential, RefreshFailure> {
    let Some(refresh_token) = credential.refresh_token.as_deref() else {
        return invalidate_after(
            store,
            session,
            RefreshFailure::Rejected("credential has no refresh token".into()),
        )
        .await;
    };

    let tokens = match refresher.refresh(refresh_token).await {
        Ok(tokens) => tokens,
        Err(Error::ClientMisconfigured(reason)) => {
            return invalidate_after(store, session, RefreshFailure::Misconfigured(reason)).await;
        }
        Err(e) => {
            return invalidate_after(store, session, RefreshFailure::Rejected(e.to_string())).await;
        }
    };

    let now = clock.now();
    let renewed = Credential::from_token_response(&tokens, now, Some(refresh_token));
    if renewed.refresh_skew(skew) < skew {
        tracing::warn!(
            session = %session,
            lifetime = %(renewed.expires_at - now),
            %skew,
            "Token lifetime is shorter than twice the refresh skew; refreshing at half-life"
        );
    }
    if let Err(e) = store.save(session, renewed.clone()).await {
        let reason = format!("could not persist refreshed credential: {e}");
        return invalidate_after(store, session, RefreshFailure::Rejected(reason)).await;
    }

    tracing::info!(session = %session, expires_at = %renewed.expires_at, "Credential refreshed");
    Ok(renewed)
}

async fn invalidate_after<S: CredentialStore>(
    store: &S,
    session: &SessionId,
    failure: RefreshFailure,
) -> Result<Credential, RefreshFailure> {
    tracing::warn!(session = %session, ?failure, "Credential refresh failed; invalidating session");
    if let Err(e) = store.remove(session).await {
        tracing::error!(session = %session, error = %e, "Failed to remove credential after refresh failure");
    }
    Err(failure)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;
    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Reject,
        Misconfigured,
        Hang,
        Panic,
        ShortLived,
    }

    struct FakeRefresher {
        calls: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(refresh_token, "refresh-0");
            match self.behavior {
                Behavior::Succeed => {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok(TokenResponse::new(format!("access-{n}")).with_expires_in(3600))
                }
                Behavior::Reject => {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Err(Error::Upstream {
                        operation: "token refresh",
                        status: Some(400),
                        detail: r#"{"error":"invalid_grant"}"#.into(),
                    })
                }
                Behavior::Misconfigured => Err(Error::ClientMisconfigured("no client secret".into())),
                Behavior::Hang => {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(TokenResponse::new("too-late"))
                }
                Behavior::Panic => panic!("refresher bug"),
                Behavior::ShortLived => Ok(TokenResponse::new(format!("access-{n}")).with_expires_in(120)),
            }
        }
    }

    /// Store whose lookups of one session stall after the first.
    struct StallingStore {
        inner: MemoryCredentialStore,
        stalled: SessionId,
        loads: AtomicUsize,
    }

    impl CredentialStore for StallingStore {
        async fn load(
            &self,
            session: &SessionId,
        ) -> Result<Option<Credential>, Box<dyn std::error::Error + Send + Sync>> {
            if *session == self.stalled && self.loads.fetch_add(1, Ordering::SeqCst) > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
            self.inner.load(session).await
        }

        async fn save(
            &self,
            session: &SessionId,
            credential: Credential,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.inner.save(session, credential).await
        }

        async fn remove(
            &self,
            session: &SessionId,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.inner.remove(session).await
        }
    }

    fn session() -> SessionId {
        SessionId::from("sess-1".to_string())
    }

    fn manager(behavior: Behavior) -> (CredentialManager<MemoryCredentialStore, FakeRefresher>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let refresher = FakeRefresher {
            calls: calls.clone(),
            behavior,
        };
        let manager = CredentialManager::new(MemoryCredentialStore::new(), refresher)
            .with_clock(Arc::new(ManualClock::new(NOW)))
            .with_settings(
                RefreshSettings::default().with_wait_timeout(std::time::Duration::from_secs(5)),
            );
        (manager, calls)
    }

    async fn seed(
        manager: &CredentialManager<MemoryCredentialStore, FakeRefresher>,
        expires_in: Duration,
        refresh_token: Option<&str>,
    ) {
        let credential = Credential::new(
            "access-0",
            refresh_token.map(str::to_string),
            NOW + expires_in,
        );
        manager.store().save(&session(), credential).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_credential_requires_auth() {
        let (manager, calls) = manager(Behavior::Succeed);
        let err = manager.acquire(&session()).await.unwrap_err();
        assert!(matches!(err, Error::AuthRequired));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fresh_credential_returned_without_refresh() {
        let (manager, calls) = manager(Behavior::Succeed);
        seed(&manager, Duration::minutes(30), Some("refresh-0")).await;

        let credential = manager.acquire(&session()).await.unwrap();
        assert_eq!(credential.access_token, "access-0");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiring_credential_is_refreshed_and_persisted() {
        let (manager, calls) = manager(Behavior::Succeed);
        seed(&manager, Duration::minutes(2), Some("refresh-0")).await;

        let credential = manager.acquire(&session()).await.unwrap();
        assert_eq!(credential.access_token, "access-1");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh-0"));
        assert_eq!(credential.expires_at, NOW + Duration::hours(1));

        let stored = manager.store().load(&session()).await.unwrap().unwrap();
        assert_eq!(stored, credential);
        assert!(!manager.is_refreshing(&session()).await);

        // The renewed credential is fresh; no second refresh.
        manager.acquire(&session()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let (manager, calls) = manager(Behavior::Succeed);
        seed(&manager, Duration::ZERO, Some("refresh-0")).await;

        let session = session();
        let results = join_all((0..32).map(|_| manager.acquire(&session))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().access_token, "access-1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_is_shared_and_invalidates_session() {
        let (manager, calls) = manager(Behavior::Reject);
        seed(&manager, Duration::minutes(-10), Some("refresh-0")).await;

        let session = session();
        let results = join_all((0..8).map(|_| manager.acquire(&session))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            match result.unwrap_err() {
                Error::RefreshFailed(reason) => assert!(reason.contains("invalid_grant")),
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(manager.store().load(&session).await.unwrap().is_none());
        assert!(matches!(
            manager.acquire(&session).await.unwrap_err(),
            Error::AuthRequired
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_refresh_token_fails_without_network() {
        let (manager, calls) = manager(Behavior::Succeed);
        seed(&manager, Duration::minutes(1), None).await;

        let err = manager.acquire(&session()).await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(manager.store().load(&session()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_misconfigured_client_surfaces_distinctly() {
        let (manager, _) = manager(Behavior::Misconfigured);
        seed(&manager, Duration::minutes(1), Some("refresh-0")).await;

        let err = manager.acquire(&session()).await.unwrap_err();
        assert!(matches!(err, Error::ClientMisconfigured(_)));
        assert!(err.is_auth_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_refresh_times_out_waiters() {
        let (manager, calls) = manager(Behavior::Hang);
        seed(&manager, Duration::minutes(1), Some("refresh-0")).await;

        let session = session();
        let results = join_all((0..4).map(|_| manager.acquire(&session))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert!(matches!(
                result.unwrap_err(),
                Error::RefreshTimeout { waited } if waited == std::time::Duration::from_secs(5)
            ));
        }
        assert!(manager.is_refreshing(&session).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_refresher_releases_slot_and_invalidates() {
        let (manager, calls) = manager(Behavior::Panic);
        seed(&manager, Duration::minutes(1), Some("refresh-0")).await;

        let session = session();
        let results = join_all((0..3).map(|_| manager.acquire(&session))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert!(matches!(result.unwrap_err(), Error::RefreshFailed(_)));
        }
        assert!(!manager.is_refreshing(&session).await);
        assert!(manager.store().load(&session).await.unwrap().is_none());
        assert!(matches!(
            manager.acquire(&session).await.unwrap_err(),
            Error::AuthRequired
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_does_not_delay_other_sessions() {
        let stalled = SessionId::from("sess-stalled".to_string());
        let store = StallingStore {
            inner: MemoryCredentialStore::new(),
            stalled: stalled.clone(),
            loads: AtomicUsize::new(0),
        };
        for s in [&stalled, &session()] {
            let credential = Credential::new("access-0", Some("refresh-0".into()), NOW + Duration::minutes(1));
            store.inner.save(s, credential).await.unwrap();
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let refresher = FakeRefresher {
            calls: calls.clone(),
            behavior: Behavior::Succeed,
        };
        let manager = CredentialManager::new(store, refresher)
            .with_clock(Arc::new(ManualClock::new(NOW)));

        let started = tokio::time::Instant::now();
        let session = session();
        let (stalled_result, other_elapsed) = tokio::join!(manager.acquire(&stalled), async {
            manager.acquire(&session).await.unwrap();
            started.elapsed()
        });

        assert!(other_elapsed < std::time::Duration::from_secs(60), "{other_elapsed:?}");
        stalled_result.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_renewal_is_not_refreshed_again() {
        let (manager, calls) = manager(Behavior::ShortLived);
        seed(&manager, Duration::minutes(1), Some("refresh-0")).await;

        let credential = manager.acquire(&session()).await.unwrap();
        assert_eq!(credential.expires_at, NOW + Duration::minutes(2));
        assert_eq!(credential.issued_at, Some(NOW));

        let again = manager.acquire(&session()).await.unwrap();
        assert_eq!(again, credential);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_establish_and_invalidate() {
        let (manager, _) = manager(Behavior::Succeed);
        let tokens = TokenResponse::new("at")
            .with_refresh_token("rt")
            .with_expires_in(120);

        let credential = manager.establish(&session(), &tokens).await.unwrap();
        assert_eq!(credential.expires_at, NOW + Duration::minutes(2));
        assert_eq!(credential.refresh_token.as_deref(), Some("rt"));

        manager.invalidate(&session()).await.unwrap();
        assert!(matches!(
            manager.acquire(&session()).await.unwrap_err(),
            Error::AuthRequired
        ));
    }

    #[test]
    fn test_expiry_threshold() {
        let credential = Credential::new("a", None, NOW + Duration::minutes(5));
        assert!(credential.expires_within(NOW, DEFAULT_REFRESH_SKEW));
        assert!(!credential.expires_within(NOW - Duration::seconds(1), DEFAULT_REFRESH_SKEW));
    }

    #[test]
    fn test_refresh_skew_capped_at_half_lifetime() {
        let mut credential = Credential::new("a", None, NOW + Duration::minutes(2));
        assert!(credential.needs_refresh(NOW, DEFAULT_REFRESH_SKEW));

        credential.issued_at = Some(NOW);
        assert_eq!(credential.refresh_skew(DEFAULT_REFRESH_SKEW), Duration::minutes(1));
        assert!(!credential.needs_refresh(NOW, DEFAULT_REFRESH_SKEW));
        assert!(credential.needs_refresh(NOW + Duration::minutes(1), DEFAULT_REFRESH_SKEW));

        credential.expires_at = NOW + Duration::hours(1);
        assert_eq!(credential.refresh_skew(DEFAULT_REFRESH_SKEW), DEFAULT_REFRESH_SKEW);
    }

    #[test]
    fn test_credential_serde_roundtrip() {
        let credential = Credential::new("a", Some("r".into()), NOW);
        let json = serde_json::to_string(&credential).unwrap();
        assert!(json.contains("2024-03-01T12:00:00Z"));
        let parsed: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, credential);
    }
}
