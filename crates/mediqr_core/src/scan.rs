//! crates/mediqr_core/src/scan.rs
//!
//! Turns decoded QR text into a login or a patient lookup.
//!
//! A resolver owns at most one scan session at a time. Starting a session
//! releases the previous one before the camera is acquired again, and the
//! camera is released on every exit path: resolution, cancellation, source
//! end, error, or the session being dropped.

use crate::domain::{PatientId, Session};
use crate::error::{CoreError, CoreResult};
use crate::identity::IdentityService;
use crate::patients::PatientRepository;
use crate::ports::{ScanEvent, ScanEventStream, ScanSource, SurfaceHandle};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

//=========================================================================================
// Public Types
//=========================================================================================

/// What the caller wants a valid token to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanContext {
    /// A patient logging in by showing their QR code.
    Login,
    /// Hospital staff opening a patient's profile read-only.
    Lookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResolution {
    LoggedIn(Session),
    PatientFound(PatientId),
}

/// How a scan session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Resolved(ScanResolution),
    Cancelled,
    /// The source stopped producing events on its own.
    SourceEnded,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long a rejection message stays visible.
    pub error_ttl: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            error_ttl: Duration::from_millis(3000),
        }
    }
}

//=========================================================================================
// Internal State
//=========================================================================================

struct ActiveScan {
    id: Uuid,
    token: CancellationToken,
}

struct TransientError {
    message: String,
    expires_at: Instant,
}

#[derive(Default)]
struct ResolverState {
    active: Option<ActiveScan>,
    error: Option<TransientError>,
}

/// Releases the source when a session exits, unless a newer session already did.
struct ReleaseGuard {
    resolver: Arc<ScanResolver>,
    id: Uuid,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let mut state = self.resolver.state();
        let still_ours = state.active.as_ref().is_some_and(|a| a.id == self.id);
        if still_ours {
            state.active = None;
            drop(state);
            self.resolver.release(self.id);
        }
    }
}

/// A started scan session: the camera is attached and events are flowing.
///
/// Dropping it releases the camera if it is still the resolver's active session.
pub struct ScanSession {
    guard: ReleaseGuard,
    token: CancellationToken,
    context: ScanContext,
    events: ScanEventStream,
}

impl ScanSession {
    pub fn id(&self) -> Uuid {
        self.guard.id
    }

    pub fn context(&self) -> ScanContext {
        self.context
    }

    /// Consumes events until the session resolves, is cancelled, or the source ends.
    ///
    /// Rejected scans are reported through `on_reject` and scanning continues.
    /// Only backend failures end the session with an error.
    pub async fn resolve<F>(mut self, mut on_reject: F) -> CoreResult<ScanOutcome>
    where
        F: FnMut(&CoreError) + Send,
    {
        let id = self.guard.id;
        let resolver = self.guard.resolver.clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!(scan_id = %id, "Scan session cancelled");
                    return Ok(ScanOutcome::Cancelled);
                }
                next = self.events.next() => next,
            };
            let Some(event) = next else {
                info!(scan_id = %id, "Scan source ended");
                return Ok(ScanOutcome::SourceEnded);
            };

            match resolver.handle_event(self.context, event).await {
                Ok(Some(resolution)) => {
                    info!(scan_id = %id, "Scan resolved");
                    return Ok(ScanOutcome::Resolved(resolution));
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    resolver.flag_error(&e);
                    on_reject(&e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The text shown to the user for a rejected scan.
pub fn rejection_message(error: &CoreError) -> String {
    match error {
        CoreError::InvalidToken(_) => {
            "Invalid MediQR code. Please scan a valid patient QR code.".to_string()
        }
        CoreError::PatientNotFound(_) => "Invalid QR code. Patient not found.".to_string(),
        other => other.to_string(),
    }
}

//=========================================================================================
// ScanResolver
//=========================================================================================

pub struct ScanResolver {
    source: Arc<dyn ScanSource>,
    identity: IdentityService,
    patients: PatientRepository,
    config: ScanConfig,
    state: Mutex<ResolverState>,
}

impl ScanResolver {
    pub fn new(
        source: Arc<dyn ScanSource>,
        identity: IdentityService,
        patients: PatientRepository,
        config: ScanConfig,
    ) -> Self {
        Self {
            source,
            identity,
            patients,
            config,
            state: Mutex::new(ResolverState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, id: Uuid) {
        match self.source.stop() {
            Ok(()) => debug!(scan_id = %id, "Scan source released"),
            Err(e) => warn!(scan_id = %id, error = %e, "Failed to release scan source"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state().active.is_some()
    }

    /// The latest rejection message, until it expires.
    pub fn current_error(&self) -> Option<String> {
        let state = self.state();
        state
            .error
            .as_ref()
            .filter(|e| Instant::now() < e.expires_at)
            .map(|e| e.message.clone())
    }

    fn flag_error(&self, error: &CoreError) {
        self.state().error = Some(TransientError {
            message: rejection_message(error),
            expires_at: Instant::now() + self.config.error_ttl,
        });
    }

    /// Ends the current scan session and releases the camera. A no-op when idle.
    pub fn cancel(&self) {
        let previous = self.state().active.take();
        if let Some(active) = previous {
            info!(scan_id = %active.id, "Cancelling scan session");
            active.token.cancel();
            self.release(active.id);
        }
    }

    /// Resolves one scan event. `Ok(None)` means keep scanning.
    ///
    /// Text without the token prefix is rejected before any store access.
    pub async fn handle_event(
        &self,
        context: ScanContext,
        event: ScanEvent,
    ) -> CoreResult<Option<ScanResolution>> {
        let text = match event {
            ScanEvent::Decoded(text) => text,
            ScanEvent::Failed(reason) => {
                debug!(%reason, "Scan frame failed");
                return Ok(None);
            }
        };

        if !PatientId::has_token_prefix(&text) {
            warn!(text = %text, "Rejected scan without MediQR prefix");
            return Err(CoreError::InvalidToken(text));
        }

        match context {
            ScanContext::Login => {
                let session = self.identity.login_with_token(&text).await?;
                Ok(Some(ScanResolution::LoggedIn(session)))
            }
            ScanContext::Lookup => {
                let id = PatientId::new(text);
                match self.patients.get_by_id(&id).await? {
                    Some(patient) => Ok(Some(ScanResolution::PatientFound(patient.id))),
                    None => Err(CoreError::PatientNotFound(id.to_string())),
                }
            }
        }
    }

    /// Starts a scan session, tearing down the previous one before the camera
    /// is acquired again.
    pub async fn begin(
        self: &Arc<Self>,
        context: ScanContext,
        surface: &SurfaceHandle,
    ) -> CoreResult<ScanSession> {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();

        let previous = self.state().active.replace(ActiveScan {
            id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            info!(scan_id = %previous.id, "Tearing down previous scan session");
            previous.token.cancel();
            self.release(previous.id);
        }
        let guard = ReleaseGuard {
            resolver: self.clone(),
            id,
        };

        let events = self.source.start(surface).await?;
        info!(scan_id = %id, ?context, surface = %surface.0, "Scan session started");
        Ok(ScanSession {
            guard,
            token,
            context,
            events,
        })
    }

    /// Starts a session and resolves it.
    pub async fn run<F>(
        self: &Arc<Self>,
        context: ScanContext,
        surface: &SurfaceHandle,
        on_reject: F,
    ) -> CoreResult<ScanOutcome>
    where
        F: FnMut(&CoreError) + Send,
    {
        self.begin(context, surface).await?.resolve(on_reject).await
    }
}

impl Drop for ScanResolver {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Gender, PatientDraft, Role};
    use crate::identity::{IdentityConfig, SessionSlots};
    use crate::ports::{KeyValueStore, PortError, PortResult};
    use crate::store::{MemoryKeyValueStore, RecordStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Counts reads so tests can assert a path never touched storage.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryKeyValueStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get(&self, key: &str) -> PortResult<Option<Bytes>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes) -> PortResult<()> {
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> PortResult<()> {
            self.inner.remove(key).await
        }
    }

    /// A camera that replays whatever the test pushes into it.
    #[derive(Default)]
    struct FakeSource {
        feed: Mutex<Option<mpsc::UnboundedSender<ScanEvent>>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_stop: bool,
    }

    impl FakeSource {
        fn push(&self, event: ScanEvent) {
            if let Some(tx) = self.feed.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }

        fn end(&self) {
            self.feed.lock().unwrap().take();
        }

        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScanSource for FakeSource {
        async fn start(&self, _surface: &SurfaceHandle) -> PortResult<ScanEventStream> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.feed.lock().unwrap() = Some(tx);
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })))
        }

        fn stop(&self) -> PortResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(PortError::ScanSource("camera busy".to_string()));
            }
            Ok(())
        }
    }

    struct Fixture {
        kv: Arc<CountingStore>,
        source: Arc<FakeSource>,
        identity: IdentityService,
        resolver: Arc<ScanResolver>,
    }

    fn fixture_with(source: FakeSource, ttl: Duration) -> Fixture {
        let kv = Arc::new(CountingStore::default());
        let store = RecordStore::new(kv.clone());
        let patients = PatientRepository::new(store.clone());
        let identity = IdentityService::new(
            store.clone(),
            patients.clone(),
            SessionSlots::new(store),
            IdentityConfig::default(),
        );
        let source = Arc::new(source);
        let resolver = Arc::new(ScanResolver::new(
            source.clone(),
            identity.clone(),
            patients,
            ScanConfig { error_ttl: ttl },
        ));
        Fixture {
            kv,
            source,
            identity,
            resolver,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeSource::default(), Duration::from_secs(3))
    }

    async fn register_alice(identity: &IdentityService) -> PatientId {
        identity
            .register(
                PatientDraft {
                    name: "Alice".to_string(),
                    age: 40,
                    gender: Gender::Female,
                    contact: "555-0142".to_string(),
                    email: "alice@x.com".to_string(),
                    address: "9 Oak Ave".to_string(),
                },
                "p1",
                Vec::new(),
            )
            .await
            .unwrap()
            .id
    }

    async fn wait_for_start(source: &FakeSource, count: usize) {
        while source.starts() < count {
            tokio::task::yield_now().await;
        }
    }

    fn surface() -> SurfaceHandle {
        SurfaceHandle("qr-reader".to_string())
    }

    #[tokio::test]
    async fn malformed_text_is_rejected_without_store_access() {
        let f = fixture();
        let err = f
            .resolver
            .handle_event(ScanContext::Lookup, ScanEvent::Decoded("NOTAVALIDCODE".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidToken(t) if t == "NOTAVALIDCODE"));
        assert_eq!(f.kv.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_frames_are_ignored() {
        let f = fixture();
        let step = f
            .resolver
            .handle_event(ScanContext::Login, ScanEvent::Failed("No QR code found".to_string()))
            .await
            .unwrap();
        assert!(step.is_none());
    }

    #[tokio::test]
    async fn login_scan_matches_token_login() {
        let f = fixture();
        let id = register_alice(&f.identity).await;
        let resolution = f
            .resolver
            .handle_event(ScanContext::Login, ScanEvent::Decoded(id.to_string()))
            .await
            .unwrap()
            .unwrap();
        let ScanResolution::LoggedIn(session) = resolution else {
            panic!("expected a login");
        };
        assert_eq!(session.role, Role::Patient);
        assert_eq!(session.patient_id, Some(id));
        assert_eq!(f.identity.current_session().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn lookup_miss_is_patient_not_found() {
        let f = fixture();
        let err = f
            .resolver
            .handle_event(ScanContext::Lookup, ScanEvent::Decoded("MEDI-ABSENT".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PatientNotFound(_)));
    }

    #[tokio::test]
    async fn lookup_session_survives_rejections_then_resolves() {
        let f = fixture();
        let id = register_alice(&f.identity).await;

        let resolver = f.resolver.clone();
        let run = tokio::spawn(async move {
            let mut rejected = Vec::new();
            let outcome = resolver
                .run(ScanContext::Lookup, &surface(), |e| rejected.push(e.to_string()))
                .await;
            (outcome, rejected)
        });

        wait_for_start(&f.source, 1).await;
        assert!(f.resolver.is_active());
        f.source.push(ScanEvent::Decoded("NOTAVALIDCODE".to_string()));
        f.source.push(ScanEvent::Failed("No QR code found".to_string()));
        f.source.push(ScanEvent::Decoded("MEDI-000000".to_string()));
        f.source.push(ScanEvent::Decoded(id.to_string()));

        let (outcome, rejected) = run.await.unwrap();
        assert_eq!(outcome.unwrap(), ScanOutcome::Resolved(ScanResolution::PatientFound(id)));
        assert_eq!(rejected.len(), 2);
        assert!(!f.resolver.is_active());
        assert_eq!(f.source.stops(), 1);
        // A lookup never changes who is logged in.
        assert!(f.identity.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejection_message_expires() {
        let f = fixture_with(FakeSource::default(), Duration::from_millis(30));
        let resolver = f.resolver.clone();
        let run = tokio::spawn(async move {
            resolver
                .run(ScanContext::Login, &surface(), |_| {})
                .await
        });

        wait_for_start(&f.source, 1).await;
        f.source.push(ScanEvent::Decoded("MEDI-NOBODY".to_string()));
        while f.resolver.current_error().is_none() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            f.resolver.current_error().as_deref(),
            Some("Invalid QR code. Patient not found.")
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(f.resolver.current_error().is_none());
        assert!(f.resolver.is_active());

        f.resolver.cancel();
        assert_eq!(run.await.unwrap().unwrap(), ScanOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_releases_once_and_is_idempotent() {
        let f = fixture();
        let resolver = f.resolver.clone();
        let run = tokio::spawn(async move {
            resolver
                .run(ScanContext::Lookup, &surface(), |_| {})
                .await
        });

        wait_for_start(&f.source, 1).await;
        f.resolver.cancel();
        f.resolver.cancel();
        assert_eq!(run.await.unwrap().unwrap(), ScanOutcome::Cancelled);
        f.resolver.cancel();
        assert_eq!(f.source.stops(), 1);
        assert!(!f.resolver.is_active());
    }

    #[tokio::test]
    async fn new_session_tears_down_previous_first() {
        let f = fixture();
        let first = {
            let resolver = f.resolver.clone();
            tokio::spawn(async move { resolver.run(ScanContext::Lookup, &surface(), |_| {}).await })
        };
        wait_for_start(&f.source, 1).await;

        let second = {
            let resolver = f.resolver.clone();
            tokio::spawn(async move { resolver.run(ScanContext::Lookup, &surface(), |_| {}).await })
        };
        wait_for_start(&f.source, 2).await;

        // The previous session was released before the camera was acquired again.
        assert_eq!(f.source.stops(), 1);
        assert_eq!(first.await.unwrap().unwrap(), ScanOutcome::Cancelled);
        assert_eq!(f.source.stops(), 1);
        assert!(f.resolver.is_active());

        f.source.end();
        assert_eq!(second.await.unwrap().unwrap(), ScanOutcome::SourceEnded);
        assert_eq!(f.source.stops(), 2);
    }

    #[tokio::test]
    async fn release_failures_are_swallowed() {
        let f = fixture_with(
            FakeSource {
                fail_stop: true,
                ..FakeSource::default()
            },
            Duration::from_secs(3),
        );
        let id = register_alice(&f.identity).await;
        let resolver = f.resolver.clone();
        let run = tokio::spawn(async move {
            resolver
                .run(ScanContext::Login, &surface(), |_| {})
                .await
        });

        wait_for_start(&f.source, 1).await;
        f.source.push(ScanEvent::Decoded(id.to_string()));
        let outcome = run.await.unwrap().unwrap();
        assert!(matches!(outcome, ScanOutcome::Resolved(ScanResolution::LoggedIn(_))));
        assert_eq!(f.source.stops(), 1);
    }

    #[tokio::test]
    async fn aborted_run_still_releases() {
        let f = fixture();
        let resolver = f.resolver.clone();
        let run = tokio::spawn(async move {
            resolver
                .run(ScanContext::Lookup, &surface(), |_| {})
                .await
        });
        wait_for_start(&f.source, 1).await;

        run.abort();
        let _ = run.await;
        assert_eq!(f.source.stops(), 1);
        assert!(!f.resolver.is_active());
    }
}
