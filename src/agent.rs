//! The offline cache agent: pre-caches on install, serves cache-first.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use reqwest::Method;

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::{Request, RequestKey, StoredResponse};
use crate::stats::{FetchStats, FetchStatsTracker};
use crate::storage::CacheStorage;

/// Lifecycle of an agent.
///
/// ```text
/// Parsed -> Installing -> Installed -> Active
///                      \-> Failed -> Installing (retry by the host)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Created, install not yet attempted.
    Parsed,
    /// Pre-cache in flight.
    Installing,
    /// Pre-cache finished; waiting to be activated.
    Installed,
    /// Pre-cache failed; the agent never intercepts.
    Failed,
    /// Intercepting requests.
    Active,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// A response delivered by [`OfflineCacheAgent::on_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub response: StoredResponse,
    pub source: ResponseSource,
}

/// Pre-caches a fixed asset list and answers requests cache-first.
///
/// The agent is shareable: wrap it in an `Arc` and call
/// [`on_fetch`](Self::on_fetch) from as many tasks as needed.
pub struct OfflineCacheAgent<S: CacheStorage, N: Network> {
    config: AgentConfig,
    storage: S,
    network: N,
    state: Mutex<AgentState>,
    stats: FetchStatsTracker,
}

impl<S: CacheStorage, N: Network> OfflineCacheAgent<S, N> {
    #[must_use]
    pub const fn new(config: AgentConfig, storage: S, network: N) -> Self {
        Self {
            config,
            storage,
            network,
            state: Mutex::new(AgentState::Parsed),
            stats: FetchStatsTracker::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    #[must_use]
    pub const fn network(&self) -> &N {
        &self.network
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        *self.lock_state()
    }

    /// Snapshot of the interception counters.
    #[must_use]
    pub fn stats(&self) -> FetchStats {
        self.stats.snapshot()
    }

    fn lock_state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the asset list into `GET` requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for an unparseable entry and
    /// [`Error::DuplicateAsset`] when two entries resolve to the same request.
    pub fn precache_requests(&self) -> Result<Vec<Request>> {
        let mut seen: HashSet<RequestKey> = HashSet::new();
        self.config
            .assets
            .iter()
            .map(|asset| {
                let request = Request::resolve(Method::GET, &self.config.origin, asset)?;
                if seen.insert(request.key()) {
                    Ok(request)
                } else {
                    Err(Error::DuplicateAsset(request.url.to_string()))
                }
            })
            .collect()
    }

    /// Handles the install event: opens the bucket and stores every asset.
    ///
    /// Either every asset ends up in the bucket or none of this run's
    /// responses do. On failure the agent moves to [`AgentState::Failed`]
    /// and the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the agent is freshly created or
    /// a previous install failed, otherwise the first fetch, status or
    /// storage error.
    pub async fn on_install(&self) -> Result<usize> {
        {
            let mut state = self.lock_state();
            match *state {
                AgentState::Parsed | AgentState::Failed => *state = AgentState::Installing,
                other => {
                    return Err(Error::InvalidState(format!(
                        "cannot install from {other:?}"
                    )));
                }
            }
        }

        log::info!(
            "Installing: pre-caching {} assets into {}",
            self.config.assets.len(),
            self.config.cache_name
        );
        let result = self.precache().await;

        let mut state = self.lock_state();
        match &result {
            Ok(count) => {
                *state = AgentState::Installed;
                self.stats.set_precached(*count as u64);
                log::info!("Installed: {count} assets cached in {}", self.config.cache_name);
            }
            Err(e) => {
                *state = AgentState::Failed;
                log::warn!("Install failed: {e}");
            }
        }
        result
    }

    async fn precache(&self) -> Result<usize> {
        let requests = self.precache_requests()?;
        self.storage.open(&self.config.cache_name).await?;

        let entries = try_join_all(requests.iter().map(|request| async move {
            let response = self.network.fetch(request).await?;
            if !response.is_success() {
                return Err(Error::BadStatus {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            Ok::<_, Error>((request.key(), response))
        }))
        .await?;

        let count = entries.len();
        self.storage.put_all(&self.config.cache_name, entries).await?;
        Ok(count)
    }

    /// Picks up an install left by a previous process.
    ///
    /// If the bucket already holds every pre-cache request, a fresh agent
    /// goes straight to [`AgentState::Active`] and `true` is returned.
    /// Otherwise the state is left untouched.
    ///
    /// # Errors
    ///
    /// Returns asset resolution or storage errors.
    pub async fn restore(&self) -> Result<bool> {
        if self.state() != AgentState::Parsed {
            return Ok(false);
        }
        let name = &self.config.cache_name;
        if !self.storage.has(name).await? {
            return Ok(false);
        }

        let stored: HashSet<RequestKey> = self.storage.keys(name).await?.into_iter().collect();
        let requests = self.precache_requests()?;
        if !requests.iter().all(|r| stored.contains(&r.key())) {
            log::debug!("Bucket {name} is incomplete, not restoring");
            return Ok(false);
        }

        let mut state = self.lock_state();
        if *state != AgentState::Parsed {
            return Ok(false);
        }
        *state = AgentState::Active;
        self.stats.set_precached(requests.len() as u64);
        log::info!("Restored {name} with {} cached assets", requests.len());
        Ok(true)
    }

    /// Moves an installed agent to [`AgentState::Active`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the agent is installed.
    pub fn activate(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            AgentState::Installed => {
                *state = AgentState::Active;
                log::info!("Activated {}", self.config.cache_name);
                Ok(())
            }
            AgentState::Active => Ok(()),
            other => Err(Error::InvalidState(format!("cannot activate from {other:?}"))),
        }
    }

    /// Handles an intercepted request: cached match first, network otherwise.
    ///
    /// The lookup spans every bucket in storage, not just this agent's.
    /// Network results are returned as-is and never written to cache.
    /// While the agent is not active the request bypasses the cache.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the lookup fails, or the network error
    /// unchanged if the live fetch fails.
    pub async fn on_fetch(&self, request: &Request) -> Result<FetchResponse> {
        if self.state() != AgentState::Active {
            self.stats.record_passthrough();
            return self.fetch_live(request).await;
        }

        if let Some(response) = self.storage.match_request(&request.key()).await? {
            self.stats.record_hit();
            log::debug!("Cache hit: {} {}", request.method, request.url);
            return Ok(FetchResponse {
                response,
                source: ResponseSource::Cache,
            });
        }

        self.stats.record_miss();
        log::debug!("Cache miss: {} {}", request.method, request.url);
        self.fetch_live(request).await
    }

    async fn fetch_live(&self, request: &Request) -> Result<FetchResponse> {
        match self.network.fetch(request).await {
            Ok(response) => Ok(FetchResponse {
                response,
                source: ResponseSource::Network,
            }),
            Err(e) => {
                self.stats.record_network_error();
                Err(e)
            }
        }
    }
}
