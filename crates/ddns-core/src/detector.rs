//! IP detector
//!
//! Resolves the host's public address through an ordered chain of
//! [`IpSource`] strategies: first success wins, each attempt bounded by its
//! own timeout, no retries at this level.
//!
//! ## Caching
//!
//! Each address family has one slot holding the last successful snapshot.
//! A snapshot younger than the TTL is returned without running any
//! strategy.
//!
//! ## Coalescing
//!
//! While a family has no fresh snapshot, the first caller starts the chain
//! and parks it in the slot as a shared future; concurrent callers await the
//! same future, so one chain execution serves all of them.
//!
//! ```text
//!  caller A ──┐
//!  caller B ──┼──► slot(V4) ──► [ http ─► dns ─► interface ] ──► snapshot
//!  caller C ──┘        ▲                                            │
//!                      └──────────────── cache (TTL) ◄──────────────┘
//! ```

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DetectionPreference, EngineConfig};
use crate::error::{Error, Result};
use crate::model::{DetectionMethod, IpFamily, IpRequest, IpSnapshot};
use crate::traits::IpSource;

type ChainResult = std::result::Result<Arc<IpSnapshot>, String>;
type InFlight = Shared<BoxFuture<'static, ChainResult>>;

struct Cached {
    snapshot: Arc<IpSnapshot>,
    produced: Instant,
}

#[derive(Default)]
struct SlotState {
    latest: Option<Cached>,
    inflight: Option<InFlight>,
    /// Bumped on invalidation so a chain started earlier cannot repopulate the slot
    generation: u64,
}

struct FamilySlot {
    state: Mutex<SlotState>,
}

impl FamilySlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cached, coalescing public-address detector
pub struct IpDetector {
    sources: Vec<Arc<dyn IpSource>>,
    preference: RwLock<DetectionPreference>,
    ttl: Duration,
    strategy_timeout: Duration,
    v4: Arc<FamilySlot>,
    v6: Arc<FamilySlot>,
}

impl IpDetector {
    /// Create a detector over `sources`, tried in the given order
    pub fn new(sources: Vec<Arc<dyn IpSource>>, config: &EngineConfig) -> Self {
        Self {
            sources,
            preference: RwLock::new(DetectionPreference::Auto),
            ttl: config.ip_cache_ttl(),
            strategy_timeout: config.strategy_timeout(),
            v4: Arc::new(FamilySlot::new()),
            v6: Arc::new(FamilySlot::new()),
        }
    }

    /// Restrict the chain to one method (or all, for `Auto`)
    ///
    /// Changing the preference invalidates both cache slots.
    pub fn set_preference(&self, preference: DetectionPreference) {
        let changed = {
            let mut guard = self.preference.write().unwrap_or_else(PoisonError::into_inner);
            let changed = *guard != preference;
            *guard = preference;
            changed
        };
        if changed {
            debug!(?preference, "Detection preference changed");
            self.clear_cache();
        }
    }

    pub fn preference(&self) -> DetectionPreference {
        *self.preference.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detect the current address(es)
    ///
    /// `All` composes the two families; one family failing does not fail
    /// the request as long as the other succeeds. The failed family is then
    /// filled from its last cached snapshot, if any.
    pub async fn detect(&self, request: IpRequest) -> Result<IpSnapshot> {
        match request {
            IpRequest::Ipv4 => self.detect_family(IpFamily::V4).await.map(unwrap_arc),
            IpRequest::Ipv6 => self.detect_family(IpFamily::V6).await.map(unwrap_arc),
            IpRequest::All => {
                let (v4, v6) = tokio::join!(
                    self.detect_family(IpFamily::V4),
                    self.detect_family(IpFamily::V6)
                );
                match (v4, v6) {
                    (Ok(a), Ok(b)) => compose(Some(&a), Some(&b)),
                    (Ok(a), Err(e)) => {
                        debug!("IPv6 detection failed in combined request: {}", e);
                        compose(Some(&a), self.last(IpFamily::V6).as_deref())
                    }
                    (Err(e), Ok(b)) => {
                        debug!("IPv4 detection failed in combined request: {}", e);
                        compose(self.last(IpFamily::V4).as_deref(), Some(&b))
                    }
                    (Err(e4), Err(e6)) => Err(Error::detection_exhausted(format!(
                        "ipv4: {}; ipv6: {}",
                        e4, e6
                    ))),
                }
            }
        }
    }

    /// Detect one family, honoring the cache and coalescing concurrent callers
    pub async fn detect_family(&self, family: IpFamily) -> Result<Arc<IpSnapshot>> {
        let slot = self.slot(family);
        let fut = {
            let mut state = slot.lock();
            if let Some(cached) = &state.latest {
                if cached.produced.elapsed() < self.ttl {
                    debug!(%family, "IP cache hit");
                    return Ok(cached.snapshot.clone());
                }
            }
            match &state.inflight {
                Some(inflight) => {
                    debug!(%family, "Joining in-flight detection");
                    inflight.clone()
                }
                None => {
                    let chain = self.chain_for(family);
                    let fut = run_chain(
                        chain,
                        family,
                        self.strategy_timeout,
                        Arc::clone(slot),
                        state.generation,
                    )
                    .boxed()
                    .shared();
                    state.inflight = Some(fut.clone());
                    fut
                }
            }
        };

        fut.await.map_err(Error::detection_exhausted)
    }

    /// Last snapshots per family, regardless of age
    ///
    /// Never triggers detection. `None` if nothing was ever detected.
    pub fn current(&self) -> Option<IpSnapshot> {
        let v4 = self.last(IpFamily::V4);
        let v6 = self.last(IpFamily::V6);
        IpSnapshot::compose(v4.as_deref(), v6.as_deref())
    }

    /// Drop both cached snapshots immediately
    pub fn clear_cache(&self) {
        for slot in [&self.v4, &self.v6] {
            let mut state = slot.lock();
            state.latest = None;
            state.inflight = None;
            state.generation += 1;
        }
        info!("IP cache cleared");
    }

    fn last(&self, family: IpFamily) -> Option<Arc<IpSnapshot>> {
        self.slot(family)
            .lock()
            .latest
            .as_ref()
            .map(|c| c.snapshot.clone())
    }

    fn slot(&self, family: IpFamily) -> &Arc<FamilySlot> {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    fn chain_for(&self, family: IpFamily) -> Vec<Arc<dyn IpSource>> {
        let preference = self.preference();
        self.sources
            .iter()
            .filter(|s| s.supports(family))
            .filter(|s| match preference {
                DetectionPreference::Auto => true,
                DetectionPreference::Api => s.method() == DetectionMethod::Api,
                DetectionPreference::Dns => s.method() == DetectionMethod::Dns,
                DetectionPreference::Interface => s.method() == DetectionMethod::Interface,
            })
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for IpDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpDetector")
            .field("sources", &self.sources.iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .field("strategy_timeout", &self.strategy_timeout)
            .finish()
    }
}

async fn run_chain(
    chain: Vec<Arc<dyn IpSource>>,
    family: IpFamily,
    timeout: Duration,
    slot: Arc<FamilySlot>,
    generation: u64,
) -> ChainResult {
    let result = try_strategies(&chain, family, timeout).await;

    let mut state = slot.lock();
    if state.generation == generation {
        state.inflight = None;
        if let Ok(snapshot) = &result {
            state.latest = Some(Cached {
                snapshot: snapshot.clone(),
                produced: Instant::now(),
            });
        }
    }
    result
}

async fn try_strategies(chain: &[Arc<dyn IpSource>], family: IpFamily, timeout: Duration) -> ChainResult {
    if chain.is_empty() {
        return Err(format!("no detection strategy available for {}", family));
    }

    let mut failures = Vec::with_capacity(chain.len());
    for source in chain {
        debug!(%family, strategy = source.name(), "Trying detection strategy");
        match tokio::time::timeout(timeout, source.detect(family)).await {
            Ok(Ok(ip)) if family.matches(&ip) => {
                info!(%family, strategy = source.name(), %ip, "Public address detected");
                return Ok(Arc::new(IpSnapshot::single(ip, source.method())));
            }
            Ok(Ok(ip)) => {
                warn!(%family, strategy = source.name(), %ip, "Strategy returned wrong address family");
                failures.push(format!("{}: wrong family ({})", source.name(), ip));
            }
            Ok(Err(e)) => {
                warn!(%family, strategy = source.name(), "Strategy failed: {}", e);
                failures.push(format!("{}: {}", source.name(), e));
            }
            Err(_) => {
                warn!(%family, strategy = source.name(), ?timeout, "Strategy timed out");
                failures.push(format!("{}: timed out after {:?}", source.name(), timeout));
            }
        }
    }

    Err(format!("all strategies failed for {} ({})", family, failures.join("; ")))
}

fn compose(v4: Option<&IpSnapshot>, v6: Option<&IpSnapshot>) -> Result<IpSnapshot> {
    IpSnapshot::compose(v4, v6).ok_or_else(|| Error::detection_exhausted("no address for either family"))
}

fn unwrap_arc(snapshot: Arc<IpSnapshot>) -> IpSnapshot {
    Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone())
}
