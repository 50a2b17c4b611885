//! Provider traits consumed by the reference cache.
//!
//! Each trait mirrors one external collaborator. All operations are
//! synchronous and may be called from any thread.

use crate::error::Result;
use crate::handle::{CacheHandle, ChannelHandle, HandleSet, ServiceHandle};
use std::sync::Arc;

/// Provider operations, used for diagnostics and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    ChannelCreate,
    ChannelDestroy,
    ChannelInvalidate,
    IgnoreAdd,
    CacheCreate,
    CacheDestroy,
    CacheGet,
    SetDefault,
}

/// Manages resolution of a named service group.
pub trait ChannelProvider: Send + Sync {
    /// Create a channel tracking the given service names.
    fn create(&self, service_names: &[&str]) -> Result<ChannelHandle>;

    /// Destroy a channel. Caches created from it must be destroyed first.
    fn destroy(&self, channel: ChannelHandle) -> Result<()>;

    /// Force every cache on this channel to re-resolve on next use.
    fn invalidate(&self, channel: ChannelHandle) -> Result<()>;
}

/// Per-channel list of implementations that must never be surfaced.
///
/// Entries are best-effort: a provider may drop them at any time.
pub trait IgnoreListProvider: Send + Sync {
    fn add(&self, channel: ChannelHandle, implementation: &str) -> Result<()>;

    /// Returns whether the entry was present.
    fn remove(&self, channel: ChannelHandle, implementation: &str) -> Result<bool>;

    /// Returns the number of entries removed.
    fn clear(&self, channel: ChannelHandle) -> Result<usize>;
}

/// Materializes and serves the resolved handle set of a channel.
pub trait CacheProvider: Send + Sync {
    /// Create a cache for `channel`, resolving through `registry`.
    fn create(
        &self,
        channel: ChannelHandle,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Result<CacheHandle>;

    fn destroy(&self, cache: CacheHandle) -> Result<()>;

    /// Current handle set of the cache.
    fn get(&self, cache: CacheHandle, flags: u32) -> Result<HandleSet>;
}

/// Lookup side of the service registry.
pub trait ServiceRegistry: Send + Sync {
    /// Acquire `service` (its default implementation) or `service.implementation`.
    fn acquire(&self, name: &str) -> Result<ServiceHandle>;

    /// All implementations of `service`, in registration order.
    fn implementations(&self, service: &str) -> Result<Vec<ServiceHandle>>;
}

/// Registration side of the service registry.
pub trait RegistryRegistration: Send + Sync {
    /// Make `<service>.<implementation>` the default for its service.
    fn set_default(&self, implementation: &str) -> Result<()>;
}

/// The full set of collaborators a reference cache needs.
#[derive(Clone)]
pub struct Providers {
    pub channels: Arc<dyn ChannelProvider>,
    pub ignore_list: Arc<dyn IgnoreListProvider>,
    pub caches: Arc<dyn CacheProvider>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub registration: Arc<dyn RegistryRegistration>,
}

impl Providers {
    /// Use one object for every collaborator.
    pub fn from_shared<P>(provider: Arc<P>) -> Self
    where
        P: ChannelProvider
            + IgnoreListProvider
            + CacheProvider
            + ServiceRegistry
            + RegistryRegistration
            + 'static,
    {
        Self {
            channels: provider.clone(),
            ignore_list: provider.clone(),
            caches: provider.clone(),
            registry: provider.clone(),
            registration: provider,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
