//! Per-authority metadata cache with single-flight refresh
//!
//! Reads are lock-free snapshot loads. Every refresh runs on a spawned task
//! and is shared with all callers that ask for the same authority while it is
//! in flight, so a burst of validations after expiry or key rotation costs one
//! fetch. Dropping a caller's future never cancels the shared refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::source::{HttpMetadataSource, MetadataSource};
use super::types::Metadata;
use crate::authority::Authority;
use crate::config::ValidatorConfig;
use crate::error::{MetadataFetchError, Result};

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Arc<Metadata>, MetadataFetchError>>>;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Authorities with an installed snapshot
    pub entries: usize,
    /// Fetch attempts made against the source, retries included
    pub fetches: u64,
    /// Refreshes that ended in an error after all retries
    pub failures: u64,
    /// Refreshes currently running
    pub in_flight: usize,
}

#[derive(Default)]
struct AuthorityState {
    current: ArcSwapOption<Metadata>,
    slot: Mutex<RefreshSlot>,
}

#[derive(Default)]
struct RefreshSlot {
    in_flight: Option<SharedFetch>,
    last_attempt: Option<Instant>,
    last_failure: Option<(Instant, MetadataFetchError)>,
}

impl RefreshSlot {
    /// The running refresh, if it has not completed yet
    fn running(&mut self) -> Option<SharedFetch> {
        match &self.in_flight {
            Some(fetch) if fetch.peek().is_none() => Some(fetch.clone()),
            Some(_) => {
                self.in_flight = None;
                None
            }
            None => None,
        }
    }

    fn attempted_within(&self, interval: Duration) -> bool {
        self.last_attempt.is_some_and(|at| at.elapsed() < interval)
    }

    fn recent_failure(&self, interval: Duration) -> Option<MetadataFetchError> {
        self.last_failure
            .as_ref()
            .filter(|(at, _)| at.elapsed() < interval)
            .map(|(_, error)| error.clone())
    }
}

enum Trigger<'a> {
    /// Nothing usable is cached
    Expired,
    /// A token named a key that `seen` does not contain
    UnknownKey { seen: &'a Arc<Metadata> },
    /// Fresh snapshot close to expiry
    Proactive,
}

enum Scheduled {
    Ready(Arc<Metadata>),
    Wait(SharedFetch),
    Skipped,
}

struct Inner {
    source: Arc<dyn MetadataSource>,
    config: ValidatorConfig,
    states: DashMap<Authority, Arc<AuthorityState>>,
    fetches: AtomicU64,
    failures: AtomicU64,
}

/// Discovery metadata cache shared by all validations in a process
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("authorities", &self.inner.states.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    /// Create a cache that fetches over HTTPS
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](crate::Error::Configuration) if `config` is
    /// invalid, [`Error::MetadataFetch`](crate::Error::MetadataFetch) if the
    /// HTTP client cannot be built.
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        config.validate()?;
        let source = HttpMetadataSource::new(&config)?;
        Self::with_source(Arc::new(source), config)
    }

    /// Create a cache over a custom metadata source
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](crate::Error::Configuration) if `config` is
    /// invalid.
    pub fn with_source(source: Arc<dyn MetadataSource>, config: ValidatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                source,
                config,
                states: DashMap::new(),
                fetches: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        })
    }

    /// Configuration this cache was built with
    pub fn config(&self) -> &ValidatorConfig {
        &self.inner.config
    }

    /// Fresh metadata for `authority`, fetching if needed
    ///
    /// Waits at most the configured `fetch_deadline`.
    pub async fn get(
        &self,
        authority: &Authority,
    ) -> std::result::Result<Arc<Metadata>, MetadataFetchError> {
        self.get_with_deadline(authority, self.inner.config.fetch_deadline)
            .await
    }

    /// Fresh metadata for `authority`, waiting at most `deadline` for a fetch
    ///
    /// A deadline that passes leaves the shared refresh running; later
    /// callers pick up its result.
    pub async fn get_with_deadline(
        &self,
        authority: &Authority,
        deadline: Duration,
    ) -> std::result::Result<Arc<Metadata>, MetadataFetchError> {
        let state = self.state(authority);

        if let Some(current) = state.current.load_full()
            && current.is_fresh()
        {
            if let Some(window) = self.inner.config.refresh_ahead
                && current.expires_within(window)
            {
                self.schedule(authority, &state, Trigger::Proactive)?;
            }
            return Ok(current);
        }

        match self.schedule(authority, &state, Trigger::Expired)? {
            Scheduled::Ready(metadata) => Ok(metadata),
            Scheduled::Wait(fetch) => wait(fetch, deadline).await,
            Scheduled::Skipped => Err(MetadataFetchError::Aborted(
                "refresh was not scheduled".to_string(),
            )),
        }
    }

    /// Refresh after a token named a key missing from `seen`
    ///
    /// At most one fetch runs per authority per rotation event. If another
    /// caller already refreshed past `seen`, the newer snapshot is returned
    /// without a fetch. Inside `min_refresh_interval` of the last attempt the
    /// most recent result is returned instead of fetching again.
    pub async fn refresh_for_unknown_key(
        &self,
        authority: &Authority,
        seen: &Arc<Metadata>,
        deadline: Duration,
    ) -> std::result::Result<Arc<Metadata>, MetadataFetchError> {
        let state = self.state(authority);
        match self.schedule(authority, &state, Trigger::UnknownKey { seen })? {
            Scheduled::Ready(metadata) => Ok(metadata),
            Scheduled::Wait(fetch) => wait(fetch, deadline).await,
            Scheduled::Skipped => Ok(Arc::clone(seen)),
        }
    }

    /// Currently installed snapshot, fresh or not, without fetching
    pub fn snapshot(&self, authority: &Authority) -> Option<Arc<Metadata>> {
        self.inner
            .states
            .get(authority)
            .and_then(|state| state.current.load_full())
    }

    /// Drop the snapshot and refresh history of `authority`
    ///
    /// A refresh already in flight still completes and installs its result.
    pub fn invalidate(&self, authority: &Authority) {
        if let Some(state) = self.inner.states.get(authority) {
            state.current.store(None);
            let mut slot = state.slot.lock();
            slot.last_attempt = None;
            slot.last_failure = None;
            debug!(authority = %authority, "metadata invalidated");
        }
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for state in &self.inner.states {
            if state.current.load().is_some() {
                stats.entries += 1;
            }
            if state.slot.lock().running().is_some() {
                stats.in_flight += 1;
            }
        }
        stats
    }

    fn state(&self, authority: &Authority) -> Arc<AuthorityState> {
        if let Some(state) = self.inner.states.get(authority) {
            return Arc::clone(&state);
        }
        Arc::clone(&self.inner.states.entry(authority.clone()).or_default())
    }

    /// Decide what a trigger does, under the authority's slot lock
    fn schedule(
        &self,
        authority: &Authority,
        state: &Arc<AuthorityState>,
        trigger: Trigger<'_>,
    ) -> std::result::Result<Scheduled, MetadataFetchError> {
        let interval = self.inner.config.min_refresh_interval;
        let mut slot = state.slot.lock();

        if let Some(fetch) = slot.running() {
            return Ok(match trigger {
                Trigger::Proactive => Scheduled::Skipped,
                _ => Scheduled::Wait(fetch),
            });
        }

        match trigger {
            Trigger::Expired => {
                if let Some(current) = state.current.load_full()
                    && current.is_fresh()
                {
                    return Ok(Scheduled::Ready(current));
                }
                if let Some(error) = slot.recent_failure(interval) {
                    debug!(authority = %authority, "reusing recent metadata fetch failure");
                    return Err(error);
                }
            }
            Trigger::UnknownKey { seen } => {
                if let Some(current) = state.current.load_full()
                    && !Arc::ptr_eq(&current, seen)
                {
                    return Ok(Scheduled::Ready(current));
                }
                if slot.attempted_within(interval) {
                    debug!(authority = %authority, "unknown key refresh rate limited");
                    return match slot.recent_failure(interval) {
                        Some(error) => Err(error),
                        None => Ok(Scheduled::Skipped),
                    };
                }
            }
            Trigger::Proactive => {
                if slot.attempted_within(interval) {
                    return Ok(Scheduled::Skipped);
                }
                debug!(authority = %authority, "refreshing metadata ahead of expiry");
            }
        }

        Ok(Scheduled::Wait(self.start_refresh(authority, state, &mut slot)))
    }

    fn start_refresh(
        &self,
        authority: &Authority,
        state: &Arc<AuthorityState>,
        slot: &mut RefreshSlot,
    ) -> SharedFetch {
        let task = tokio::spawn(run_refresh(
            Arc::clone(&self.inner),
            authority.clone(),
            Arc::clone(state),
        ));

        let fetch = async move {
            task.await
                .unwrap_or_else(|e| Err(MetadataFetchError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        slot.in_flight = Some(fetch.clone());
        slot.last_attempt = Some(Instant::now());
        fetch
    }
}

async fn wait(
    fetch: SharedFetch,
    deadline: Duration,
) -> std::result::Result<Arc<Metadata>, MetadataFetchError> {
    tokio::time::timeout(deadline, fetch)
        .await
        .unwrap_or(Err(MetadataFetchError::Timeout(deadline)))
}

async fn run_refresh(
    inner: Arc<Inner>,
    authority: Authority,
    state: Arc<AuthorityState>,
) -> std::result::Result<Arc<Metadata>, MetadataFetchError> {
    let outcome = fetch_with_retries(&inner, &authority).await;

    let mut slot = state.slot.lock();
    slot.in_flight = None;
    match outcome {
        Ok(discovered) => {
            let ttl = inner.config.effective_ttl(discovered.ttl_hint);
            let metadata = Arc::new(Metadata::new(
                authority.clone(),
                discovered.issuer,
                discovered.keys,
                ttl,
            ));
            state.current.store(Some(Arc::clone(&metadata)));
            slot.last_failure = None;
            info!(
                authority = %authority,
                keys = metadata.key_count(),
                ttl_secs = ttl.as_secs(),
                "metadata refreshed"
            );
            Ok(metadata)
        }
        Err(error) => {
            inner.failures.fetch_add(1, Ordering::Relaxed);
            slot.last_failure = Some((Instant::now(), error.clone()));
            warn!(authority = %authority, error = %error, "metadata refresh failed");
            Err(error)
        }
    }
}

async fn fetch_with_retries(
    inner: &Inner,
    authority: &Authority,
) -> std::result::Result<super::DiscoveredMetadata, MetadataFetchError> {
    let config = &inner.config;
    let mut retry = 0;

    loop {
        inner.fetches.fetch_add(1, Ordering::Relaxed);
        let attempt = tokio::time::timeout(config.fetch_timeout, inner.source.fetch(authority))
            .await
            .unwrap_or(Err(MetadataFetchError::Timeout(config.fetch_timeout)));

        match attempt {
            Ok(discovered) => return Ok(discovered),
            Err(error) if error.is_retryable() && retry < config.max_retries => {
                retry += 1;
                let delay = config.backoff_for(retry);
                warn!(
                    authority = %authority,
                    attempt = retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "metadata fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
