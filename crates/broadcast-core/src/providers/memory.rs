//! In-memory implementation of every provider.
//!
//! Backs the demo binary and the test suites. Channels, caches and
//! registrations live in process memory behind locks, so a single
//! `Arc<InMemoryRegistry>` can be shared across threads.

use super::traits::{
    CacheProvider, ChannelProvider, IgnoreListProvider, ProviderOp, Providers,
    RegistryRegistration, ServiceRegistry,
};
use crate::config::NotificationConfig;
use crate::error::{BroadcastError, Result};
use crate::handle::{CacheHandle, ChannelHandle, HandleSet, ServiceHandle};
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

#[derive(Default)]
struct ServiceEntry {
    implementations: Vec<ServiceHandle>,
    default: Option<String>,
}

struct ChannelEntry {
    services: Vec<String>,
    ignored: BTreeSet<String>,
    generation: u64,
    invalidations: u64,
}

struct CacheEntry {
    channel: ChannelHandle,
    registry: Arc<dyn ServiceRegistry>,
    /// Resolved set and the channel generation it was resolved at.
    snapshot: (u64, HandleSet),
}

/// Resolve every service of `channel` through `registry`, skipping ignored implementations.
fn resolve(channel: &ChannelEntry, registry: &dyn ServiceRegistry) -> Result<HandleSet> {
    let mut resolved = Vec::new();
    for service in &channel.services {
        let implementations =
            registry
                .implementations(service)
                .map_err(|e| BroadcastError::CacheQuery {
                    message: format!("Failed to resolve {}: {}", service, e),
                })?;
        resolved.extend(
            implementations
                .into_iter()
                .filter(|h| !channel.ignored.contains(h.implementation())),
        );
    }
    Ok(HandleSet::from(resolved))
}

#[derive(Default)]
struct ChannelTable {
    channels: HashMap<ChannelHandle, ChannelEntry>,
    caches: HashMap<CacheHandle, CacheEntry>,
}

/// Thread-safe in-memory service registry with reference caching.
///
/// Lock order is channel table before service table; registration calls
/// only take the service table.
#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
    state: Mutex<ChannelTable>,
    faults: Mutex<HashSet<ProviderOp>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared registry and the provider bundle backed by it.
    pub fn shared() -> (Arc<Self>, Providers) {
        let registry = Arc::new(Self::new());
        let providers = Providers::in_memory(registry.clone());
        (registry, providers)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ChannelTable>> {
        self.state.lock().map_err(|_| BroadcastError::LockPoisoned {
            what: "channel table",
        })
    }

    fn take_fault(&self, op: ProviderOp) -> Result<()> {
        let mut faults = self.faults.lock().map_err(|_| BroadcastError::LockPoisoned {
            what: "fault table",
        })?;
        if faults.remove(&op) {
            debug!("Injecting failure for {:?}", op);
            return Err(BroadcastError::InjectedFailure(op));
        }
        Ok(())
    }

    // ========================================
    // Registration
    // ========================================

    /// Register an implementation. Re-registering replaces its payload in place.
    ///
    /// The first implementation of a service becomes its default.
    pub fn register<T>(&self, service: &str, implementation: &str, payload: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        for name in [service, implementation] {
            if name.is_empty() || name.contains(NotificationConfig::SEPARATOR) {
                return Err(BroadcastError::Config {
                    message: format!("Invalid registry name '{}'", name),
                });
            }
        }

        let handle = ServiceHandle::new(service, implementation, payload);
        let mut services = self.services.write().map_err(|_| BroadcastError::LockPoisoned {
            what: "service table",
        })?;
        let entry = services.entry(service.to_string()).or_default();

        match entry
            .implementations
            .iter_mut()
            .find(|h| h.implementation() == implementation)
        {
            Some(existing) => {
                *existing = handle;
                debug!("Replaced implementation {}.{}", service, implementation);
            }
            None => {
                entry.implementations.push(handle);
                debug!("Registered implementation {}.{}", service, implementation);
            }
        }
        if entry.default.is_none() {
            entry.default = Some(implementation.to_string());
        }
        Ok(())
    }

    /// Remove an implementation. Returns whether it was registered.
    pub fn unregister(&self, service: &str, implementation: &str) -> Result<bool> {
        let mut services = self.services.write().map_err(|_| BroadcastError::LockPoisoned {
            what: "service table",
        })?;
        let Some(entry) = services.get_mut(service) else {
            return Ok(false);
        };

        let before = entry.implementations.len();
        entry
            .implementations
            .retain(|h| h.implementation() != implementation);
        let removed = entry.implementations.len() != before;

        if entry.default.as_deref() == Some(implementation) {
            entry.default = entry
                .implementations
                .first()
                .map(|h| h.implementation().to_string());
        }
        if entry.implementations.is_empty() {
            services.remove(service);
        }
        if removed {
            debug!("Unregistered implementation {}.{}", service, implementation);
        }
        Ok(removed)
    }

    /// Current default implementation name of `service`.
    pub fn default_of(&self, service: &str) -> Option<String> {
        self.services
            .read()
            .ok()
            .and_then(|services| services.get(service).and_then(|e| e.default.clone()))
    }

    // ========================================
    // Diagnostics
    // ========================================

    /// Make the next call of `op` fail with [`BroadcastError::InjectedFailure`].
    pub fn fail_next(&self, op: ProviderOp) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(op);
        }
    }

    pub fn live_channels(&self) -> usize {
        self.lock_state().map(|s| s.channels.len()).unwrap_or(0)
    }

    pub fn live_caches(&self) -> usize {
        self.lock_state().map(|s| s.caches.len()).unwrap_or(0)
    }

    /// Ignore list entries of a channel, sorted.
    pub fn ignored(&self, channel: ChannelHandle) -> Result<Vec<String>> {
        let state = self.lock_state()?;
        let entry = state
            .channels
            .get(&channel)
            .ok_or(BroadcastError::UnknownChannel)?;
        Ok(entry.ignored.iter().cloned().collect())
    }

    /// Number of invalidations a channel has received.
    pub fn invalidations(&self, channel: ChannelHandle) -> Result<u64> {
        let state = self.lock_state()?;
        state
            .channels
            .get(&channel)
            .map(|entry| entry.invalidations)
            .ok_or(BroadcastError::UnknownChannel)
    }

    /// The only live channel, if exactly one exists.
    pub fn sole_channel(&self) -> Option<ChannelHandle> {
        let state = self.lock_state().ok()?;
        let mut channels = state.channels.keys();
        match (channels.next(), channels.next()) {
            (Some(channel), None) => Some(*channel),
            _ => None,
        }
    }
}

impl Providers {
    /// Provider bundle backed entirely by one [`InMemoryRegistry`].
    pub fn in_memory(registry: Arc<InMemoryRegistry>) -> Self {
        Self::from_shared(registry)
    }
}

impl ChannelProvider for InMemoryRegistry {
    fn create(&self, service_names: &[&str]) -> Result<ChannelHandle> {
        self.take_fault(ProviderOp::ChannelCreate)?;
        if service_names.is_empty() || service_names.iter().any(|s| s.is_empty()) {
            return Err(BroadcastError::Config {
                message: format!("Channel service names must be non-empty: {:?}", service_names),
            });
        }

        let handle = ChannelHandle::new();
        self.lock_state()?.channels.insert(
            handle,
            ChannelEntry {
                services: service_names.iter().map(|s| s.to_string()).collect(),
                ignored: BTreeSet::new(),
                generation: 0,
                invalidations: 0,
            },
        );
        debug!("Created {} for {:?}", handle, service_names);
        Ok(handle)
    }

    fn destroy(&self, channel: ChannelHandle) -> Result<()> {
        self.take_fault(ProviderOp::ChannelDestroy)?;
        let mut state = self.lock_state()?;
        if !state.channels.contains_key(&channel) {
            return Err(BroadcastError::UnknownChannel);
        }

        let live_caches = state
            .caches
            .values()
            .filter(|cache| cache.channel == channel)
            .count();
        if live_caches > 0 {
            return Err(BroadcastError::ChannelBusy { live_caches });
        }

        state.channels.remove(&channel);
        debug!("Destroyed {}", channel);
        Ok(())
    }

    fn invalidate(&self, channel: ChannelHandle) -> Result<()> {
        self.take_fault(ProviderOp::ChannelInvalidate)?;
        let mut state = self.lock_state()?;
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(BroadcastError::UnknownChannel)?;
        entry.generation += 1;
        entry.invalidations += 1;
        debug!("Invalidated {} (generation {})", channel, entry.generation);
        Ok(())
    }
}

impl IgnoreListProvider for InMemoryRegistry {
    fn add(&self, channel: ChannelHandle, implementation: &str) -> Result<()> {
        self.take_fault(ProviderOp::IgnoreAdd)?;
        let mut state = self.lock_state()?;
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(BroadcastError::UnknownChannel)?;
        entry.ignored.insert(implementation.to_string());
        Ok(())
    }

    fn remove(&self, channel: ChannelHandle, implementation: &str) -> Result<bool> {
        let mut state = self.lock_state()?;
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(BroadcastError::UnknownChannel)?;
        Ok(entry.ignored.remove(implementation))
    }

    fn clear(&self, channel: ChannelHandle) -> Result<usize> {
        let mut state = self.lock_state()?;
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(BroadcastError::UnknownChannel)?;
        let removed = entry.ignored.len();
        entry.ignored.clear();
        Ok(removed)
    }
}

impl CacheProvider for InMemoryRegistry {
    /// The cache is resolved immediately; later registrations stay invisible
    /// until the channel is invalidated.
    fn create(
        &self,
        channel: ChannelHandle,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Result<CacheHandle> {
        self.take_fault(ProviderOp::CacheCreate)?;
        let mut state = self.lock_state()?;
        let entry = state
            .channels
            .get(&channel)
            .ok_or(BroadcastError::UnknownChannel)?;
        let generation = entry.generation;
        let set = resolve(entry, registry.as_ref())?;

        let handle = CacheHandle::new();
        debug!(
            "Created {} on {} with {} handle(s)",
            handle,
            channel,
            set.len()
        );
        state.caches.insert(
            handle,
            CacheEntry {
                channel,
                registry,
                snapshot: (generation, set),
            },
        );
        Ok(handle)
    }

    fn destroy(&self, cache: CacheHandle) -> Result<()> {
        self.take_fault(ProviderOp::CacheDestroy)?;
        let mut state = self.lock_state()?;
        state
            .caches
            .remove(&cache)
            .ok_or(BroadcastError::UnknownCache)?;
        debug!("Destroyed {}", cache);
        Ok(())
    }

    fn get(&self, cache: CacheHandle, _flags: u32) -> Result<HandleSet> {
        self.take_fault(ProviderOp::CacheGet)?;
        let mut state = self.lock_state()?;
        let state = &mut *state;

        let entry = state
            .caches
            .get_mut(&cache)
            .ok_or(BroadcastError::UnknownCache)?;
        let channel = state
            .channels
            .get(&entry.channel)
            .ok_or(BroadcastError::UnknownChannel)?;

        if entry.snapshot.0 != channel.generation {
            let set = resolve(channel, entry.registry.as_ref())?;
            debug!(
                "Resolved {} handle(s) for {} at generation {}",
                set.len(),
                cache,
                channel.generation
            );
            entry.snapshot = (channel.generation, set);
        }
        Ok(entry.snapshot.1.clone())
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn acquire(&self, name: &str) -> Result<ServiceHandle> {
        let services = self.services.read().map_err(|_| BroadcastError::LockPoisoned {
            what: "service table",
        })?;
        let not_found = || BroadcastError::UnknownService {
            name: name.to_string(),
        };

        let (service, implementation) = match name.split_once(NotificationConfig::SEPARATOR) {
            Some((service, implementation)) => (service, Some(implementation)),
            None => (name, None),
        };
        let entry = services.get(service).ok_or_else(not_found)?;
        let wanted = implementation
            .or(entry.default.as_deref())
            .ok_or_else(not_found)?;

        entry
            .implementations
            .iter()
            .find(|h| h.implementation() == wanted)
            .cloned()
            .ok_or_else(not_found)
    }

    fn implementations(&self, service: &str) -> Result<Vec<ServiceHandle>> {
        let services = self.services.read().map_err(|_| BroadcastError::LockPoisoned {
            what: "service table",
        })?;
        Ok(services
            .get(service)
            .map(|entry| entry.implementations.clone())
            .unwrap_or_default())
    }
}

impl RegistryRegistration for InMemoryRegistry {
    fn set_default(&self, implementation: &str) -> Result<()> {
        self.take_fault(ProviderOp::SetDefault)?;
        let (service, name) = implementation
            .split_once(NotificationConfig::SEPARATOR)
            .ok_or_else(|| BroadcastError::Config {
                message: format!(
                    "Expected <service>.<implementation>, got '{}'",
                    implementation
                ),
            })?;

        let mut services = self.services.write().map_err(|_| BroadcastError::LockPoisoned {
            what: "service table",
        })?;
        let entry = services
            .get_mut(service)
            .filter(|entry| entry.implementations.iter().any(|h| h.implementation() == name))
            .ok_or_else(|| BroadcastError::UnknownService {
                name: implementation.to_string(),
            })?;

        entry.default = Some(name.to_string());
        debug!("Default for {} is now {}", service, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(implementations: &[&str]) -> Arc<InMemoryRegistry> {
        let registry = Arc::new(InMemoryRegistry::new());
        for (index, name) in implementations.iter().enumerate() {
            registry.register("audit", name, index).unwrap();
        }
        registry
    }

    fn open_cache(registry: &Arc<InMemoryRegistry>) -> (ChannelHandle, CacheHandle) {
        let channel = ChannelProvider::create(registry.as_ref(), &["audit"]).unwrap();
        let cache = CacheProvider::create(registry.as_ref(), channel, registry.clone()).unwrap();
        (channel, cache)
    }

    #[test]
    fn test_first_registration_is_default() {
        let registry = registry_with(&["file", "syslog"]);
        assert_eq!(registry.default_of("audit").as_deref(), Some("file"));

        let handle = registry.acquire("audit").unwrap();
        assert_eq!(handle.name(), "audit.file");
        assert_eq!(handle.downcast_ref::<usize>(), Some(&0));

        registry.set_default("audit.syslog").unwrap();
        assert_eq!(registry.acquire("audit").unwrap().implementation(), "syslog");
    }

    #[test]
    fn test_set_default_unknown_implementation() {
        let registry = registry_with(&["file"]);
        assert!(matches!(
            registry.set_default("audit.missing"),
            Err(BroadcastError::UnknownService { .. })
        ));
        assert!(matches!(
            registry.set_default("audit"),
            Err(BroadcastError::Config { .. })
        ));
    }

    #[test]
    fn test_unregister_moves_default() {
        let registry = registry_with(&["file", "syslog"]);
        assert!(registry.unregister("audit", "file").unwrap());
        assert!(!registry.unregister("audit", "file").unwrap());
        assert_eq!(registry.default_of("audit").as_deref(), Some("syslog"));
    }

    #[test]
    fn test_register_rejects_dotted_names() {
        let registry = InMemoryRegistry::new();
        assert!(registry.register("audit.x", "file", ()).is_err());
        assert!(registry.register("audit", "", ()).is_err());
    }

    #[test]
    fn test_cache_skips_ignored_implementations() {
        let registry = registry_with(&["file", "self", "syslog"]);
        let channel = ChannelProvider::create(registry.as_ref(), &["audit"]).unwrap();
        registry.add(channel, "self").unwrap();
        let cache = CacheProvider::create(registry.as_ref(), channel, registry.clone()).unwrap();

        let set = registry.get(cache, 0).unwrap();
        assert_eq!(set.names(), vec!["audit.file", "audit.syslog"]);
    }

    #[test]
    fn test_cache_is_resolved_at_creation() {
        let registry = registry_with(&["file"]);
        let (channel, cache) = open_cache(&registry);

        // Registered before the first query, still invisible until invalidated.
        registry.register("audit", "syslog", 1usize).unwrap();
        assert_eq!(registry.get(cache, 0).unwrap().names(), vec!["audit.file"]);

        // Ignore list changes also wait for the next invalidation.
        registry.add(channel, "file").unwrap();
        assert_eq!(registry.get(cache, 0).unwrap().len(), 1);

        registry.invalidate(channel).unwrap();
        assert_eq!(registry.get(cache, 0).unwrap().names(), vec!["audit.syslog"]);
    }

    #[test]
    fn test_snapshot_is_stable_until_invalidated() {
        let registry = registry_with(&["file"]);
        let (channel, cache) = open_cache(&registry);
        assert_eq!(registry.get(cache, 0).unwrap().len(), 1);

        registry.register("audit", "syslog", 1usize).unwrap();
        assert_eq!(registry.get(cache, 0).unwrap().len(), 1);

        registry.invalidate(channel).unwrap();
        assert_eq!(registry.get(cache, 0).unwrap().len(), 2);
        assert_eq!(registry.invalidations(channel).unwrap(), 1);
    }

    #[test]
    fn test_channel_destroy_requires_caches_gone() {
        let registry = registry_with(&["file"]);
        let (channel, cache) = open_cache(&registry);

        assert!(matches!(
            ChannelProvider::destroy(registry.as_ref(), channel),
            Err(BroadcastError::ChannelBusy { live_caches: 1 })
        ));

        CacheProvider::destroy(registry.as_ref(), cache).unwrap();
        ChannelProvider::destroy(registry.as_ref(), channel).unwrap();
        assert_eq!(registry.live_channels(), 0);
        assert_eq!(registry.live_caches(), 0);
    }

    #[test]
    fn test_unknown_handles() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.invalidate(ChannelHandle::new()),
            Err(BroadcastError::UnknownChannel)
        ));
        assert!(matches!(
            registry.get(CacheHandle::new(), 0),
            Err(BroadcastError::UnknownCache)
        ));
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let registry = registry_with(&["file"]);
        registry.fail_next(ProviderOp::ChannelCreate);

        assert!(matches!(
            ChannelProvider::create(registry.as_ref(), &["audit"]),
            Err(BroadcastError::InjectedFailure(ProviderOp::ChannelCreate))
        ));
        assert!(ChannelProvider::create(registry.as_ref(), &["audit"]).is_ok());
    }

    #[test]
    fn test_ignore_list_remove_and_clear() {
        let registry = registry_with(&["file"]);
        let (channel, _cache) = open_cache(&registry);
        registry.add(channel, "a").unwrap();
        registry.add(channel, "b").unwrap();

        assert!(registry.remove(channel, "a").unwrap());
        assert!(!registry.remove(channel, "a").unwrap());
        assert_eq!(registry.clear(channel).unwrap(), 1);
        assert!(registry.ignored(channel).unwrap().is_empty());
    }
}
