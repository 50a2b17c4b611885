//! Invalidatable cache of service handles for one service family.
//!
//! A [`ReferenceCache`] owns a channel and a cache created through its
//! [`Providers`]. `init`, `deinit` and `refresh` take the instance lock
//! exclusively; `execute` takes it shared, so any number of broadcasts run
//! in parallel while a refresh or teardown waits for them to finish.

use crate::config::CacheConfig;
use crate::error::{BroadcastError, Result};
use crate::handle::{CacheHandle, ChannelHandle, ServiceHandle};
use crate::providers::Providers;
use std::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Handles currently owned by the instance.
///
/// `ready` is set only after both handles exist. A handle is cleared as
/// soon as it has been destroyed, so a failed teardown can be retried for
/// whatever is left.
#[derive(Debug, Default)]
struct CacheState {
    channel: Option<ChannelHandle>,
    cache: Option<CacheHandle>,
    ready: bool,
}

impl CacheState {
    /// Both handles, if the instance is ready and neither has been destroyed.
    fn usable(&self) -> Option<(ChannelHandle, CacheHandle)> {
        match (self.ready, self.channel, self.cache) {
            (true, Some(channel), Some(cache)) => Some((channel, cache)),
            _ => None,
        }
    }

    /// Destroy the cache, then the channel.
    fn release(&mut self, providers: &Providers) -> Result<()> {
        if let Some(cache) = self.cache {
            providers
                .caches
                .destroy(cache)
                .map_err(|e| BroadcastError::CacheDestroy {
                    source: Box::new(e),
                })?;
            self.cache = None;
        }
        if let Some(channel) = self.channel {
            providers
                .channels
                .destroy(channel)
                .map_err(|e| BroadcastError::ChannelDestroy {
                    source: Box::new(e),
                })?;
            self.channel = None;
        }
        self.ready = false;
        Ok(())
    }
}

/// Handles created by an `init` that has not finished yet.
///
/// Dropping it without [`PartialInit::commit`] destroys what was created,
/// in reverse order.
struct PartialInit<'a> {
    providers: &'a Providers,
    channel: Option<ChannelHandle>,
    cache: Option<CacheHandle>,
}

impl<'a> PartialInit<'a> {
    fn new(providers: &'a Providers) -> Self {
        Self {
            providers,
            channel: None,
            cache: None,
        }
    }

    fn commit(mut self, state: &mut CacheState) {
        state.channel = self.channel.take();
        state.cache = self.cache.take();
        state.ready = state.channel.is_some() && state.cache.is_some();
    }
}

impl Drop for PartialInit<'_> {
    fn drop(&mut self) {
        let mut leftover = CacheState {
            channel: self.channel.take(),
            cache: self.cache.take(),
            ready: false,
        };
        if let Err(e) = leftover.release(self.providers) {
            warn!("Failed to release partially initialized handles: {}", e);
        }
    }
}

/// Reference cache bound to one named service.
pub struct ReferenceCache {
    service_name: String,
    exclusion: String,
    providers: Providers,
    state: RwLock<CacheState>,
}

impl ReferenceCache {
    /// Create an uninitialized cache for `service_name`.
    ///
    /// `exclusion` names the implementation that is never surfaced.
    pub fn new(
        service_name: impl Into<String>,
        exclusion: impl Into<String>,
        providers: Providers,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            exclusion: exclusion.into(),
            providers,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn exclusion(&self) -> &str {
        &self.exclusion
    }

    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .map(|state| state.usable().is_some())
            .unwrap_or(false)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, CacheState>> {
        self.state.write().map_err(|_| BroadcastError::LockPoisoned {
            what: "reference cache",
        })
    }

    fn not_ready(&self) -> BroadcastError {
        BroadcastError::NotReady {
            service: self.service_name.clone(),
        }
    }

    /// Create the channel, register the exclusion entry and create the cache.
    ///
    /// On failure nothing stays allocated and the instance remains not
    /// ready. Calling it on a ready instance does nothing; an instance left
    /// with only one handle by a failed teardown is rebuilt.
    pub fn init(&self) -> Result<()> {
        let mut state = self.write_state()?;
        if state.usable().is_some() {
            debug!("Reference cache for {} already initialized", self.service_name);
            return Ok(());
        }
        // Leftovers from an interrupted teardown.
        state.release(&self.providers)?;

        let mut partial = PartialInit::new(&self.providers);

        let channel = self
            .providers
            .channels
            .create(&[self.service_name.as_str()])
            .map_err(|e| BroadcastError::ChannelCreate {
                services: vec![self.service_name.clone()],
                source: Box::new(e),
            })?;
        partial.channel = Some(channel);

        self.providers
            .ignore_list
            .add(channel, &self.exclusion)
            .map_err(|e| BroadcastError::IgnoreList {
                name: self.exclusion.clone(),
                source: Box::new(e),
            })?;

        let cache = self
            .providers
            .caches
            .create(channel, self.providers.registry.clone())
            .map_err(|e| BroadcastError::CacheCreate {
                source: Box::new(e),
            })?;
        partial.cache = Some(cache);

        partial.commit(&mut state);
        info!(
            "Reference cache for {} ready ({}, {})",
            self.service_name, channel, cache
        );
        Ok(())
    }

    /// Destroy the cache and then the channel.
    ///
    /// The ready flag is cleared only when both are gone, but the instance
    /// stops reporting ready as soon as either handle is destroyed. Safe to
    /// call any number of times.
    pub fn deinit(&self) -> Result<()> {
        let mut state = self.write_state()?;
        let was_ready = state.ready;
        state.release(&self.providers)?;
        if was_ready {
            info!("Reference cache for {} released", self.service_name);
        }
        Ok(())
    }

    /// Re-assert the exclusion entry and invalidate the channel.
    ///
    /// The exclusion entry is best-effort: the registry may have dropped it,
    /// so it is re-added every time and a failure to do so is only logged.
    /// A failed invalidation is an error. Readiness never changes here.
    pub fn refresh(&self) -> Result<()> {
        let state = self.write_state()?;
        let Some((channel, _)) = state.usable() else {
            return Err(self.not_ready());
        };

        if let Err(e) = self.providers.ignore_list.add(channel, &self.exclusion) {
            warn!(
                "Could not re-add '{}' to the ignore list of {}: {}",
                self.exclusion, self.service_name, e
            );
        }

        self.providers
            .channels
            .invalidate(channel)
            .map_err(|e| BroadcastError::Invalidate {
                source: Box::new(e),
            })?;

        debug!("Refreshed reference cache for {}", self.service_name);
        Ok(())
    }

    /// Call `callback` for each cached handle until it returns `true`.
    ///
    /// Returns whether some handle accepted the callback. A cache that is
    /// not ready or cannot be queried has nothing to offer, so both yield
    /// `false` without invoking the callback.
    ///
    /// The callback runs under the shared lock. It must not call `refresh`
    /// or `deinit` on this instance, and must not broadcast again: a nested
    /// read can block behind a queued writer and deadlock.
    pub fn execute<F>(&self, mut callback: F) -> bool
    where
        F: FnMut(&ServiceHandle) -> bool,
    {
        let Ok(state) = self.state.read() else {
            warn!("Reference cache lock for {} is poisoned", self.service_name);
            return false;
        };
        let Some((_, cache)) = state.usable() else {
            return false;
        };

        let handles = match self
            .providers
            .caches
            .get(cache, CacheConfig::DEFAULT_QUERY_FLAGS)
        {
            Ok(handles) => handles,
            Err(e) if e.is_transient() => {
                debug!("No handles available for {}: {}", self.service_name, e);
                return false;
            }
            Err(e) => {
                warn!("Cache query for {} failed: {}", self.service_name, e);
                return false;
            }
        };

        let handled = handles.iter().any(|handle| callback(handle));
        drop(state);
        handled
    }
}

impl Drop for ReferenceCache {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = state.release(&self.providers) {
            warn!(
                "Failed to release reference cache for {}: {}",
                self.service_name, e
            );
        }
    }
}

impl std::fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("service_name", &self.service_name)
            .field("exclusion", &self.exclusion)
            .field("ready", &self.is_ready())
            .finish()
    }
}
