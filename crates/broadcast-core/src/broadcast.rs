//! Broadcast context owning the process-wide reference cache.
//!
//! [`ServiceBroadcast`] is constructed once by the host, started during
//! bootstrap and shut down during teardown. Its router is handed to the
//! loader's notification dispatch; `broadcast` is called from any thread.

use crate::config::BroadcastConfig;
use crate::error::{BroadcastError, Result};
use crate::handle::ServiceHandle;
use crate::notification::{CacheSlot, LoadNotificationRouter};
use crate::providers::Providers;
use crate::reference_cache::ReferenceCache;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{info, warn};

/// Lifecycle-guarded owner of at most one [`ReferenceCache`].
pub struct ServiceBroadcast {
    providers: Providers,
    slot: CacheSlot,
    router: Arc<LoadNotificationRouter>,
}

impl ServiceBroadcast {
    pub fn new(providers: Providers) -> Self {
        let slot: CacheSlot = Arc::new(RwLock::new(None));
        let router = Arc::new(LoadNotificationRouter::new(slot.clone()));
        Self {
            providers,
            slot,
            router,
        }
    }

    fn write_slot(&self) -> Result<RwLockWriteGuard<'_, Option<ReferenceCache>>> {
        self.slot.write().map_err(|_| BroadcastError::LockPoisoned {
            what: "broadcast slot",
        })
    }

    /// Bind the default implementation if asked, then create and initialize the cache.
    ///
    /// `component_name` is the caller's own implementation name and becomes
    /// the exclusion entry. If any step fails nothing is kept.
    pub fn startup(
        &self,
        service_name: &str,
        component_name: &str,
        bind_default: bool,
    ) -> Result<()> {
        let mut slot = self.write_slot()?;
        if let Some(existing) = slot.as_ref() {
            return Err(BroadcastError::AlreadyStarted {
                service: existing.service_name().to_string(),
            });
        }

        if bind_default {
            let implementation = BroadcastConfig::new(service_name, component_name)
                .implementation_name();
            self.providers
                .registration
                .set_default(&implementation)
                .map_err(|e| BroadcastError::Registration {
                    implementation: implementation.clone(),
                    source: Box::new(e),
                })?;
            info!("Bound {} as default implementation", implementation);
        }

        self.router.set_watched_service(service_name);

        let cache = ReferenceCache::new(service_name, component_name, self.providers.clone());
        cache.init()?;
        *slot = Some(cache);

        info!("Broadcast for {} started by {}", service_name, component_name);
        Ok(())
    }

    /// [`ServiceBroadcast::startup`] from a validated configuration.
    pub fn startup_with(&self, config: &BroadcastConfig) -> Result<()> {
        config.validate()?;
        self.startup(
            &config.service_name,
            &config.component_name,
            config.set_default,
        )
    }

    /// Release the cache and clear the slot.
    ///
    /// The slot is cleared even when teardown fails; the error is returned
    /// and the instance is dropped, which retries the release once more.
    pub fn shutdown(&self) -> Result<()> {
        let Some(cache) = self.write_slot()?.take() else {
            return Ok(());
        };

        let result = cache.deinit();
        match &result {
            Ok(()) => info!("Broadcast for {} shut down", cache.service_name()),
            Err(e) => warn!(
                "Broadcast for {} shut down with errors: {}",
                cache.service_name(),
                e
            ),
        }
        result
    }

    /// Offer `callback` to each cached handle until one accepts.
    ///
    /// `false` means nobody handled it, including when not started.
    ///
    /// The callback runs under shared locks and must not call `broadcast`,
    /// `startup` or `shutdown` on this context.
    pub fn broadcast<F>(&self, callback: F) -> bool
    where
        F: FnMut(&ServiceHandle) -> bool,
    {
        let Ok(slot) = self.slot.read() else {
            return false;
        };
        slot.as_ref()
            .map(|cache| cache.execute(callback))
            .unwrap_or(false)
    }

    /// Router to hand to the loader's notification dispatch.
    pub fn router(&self) -> Arc<LoadNotificationRouter> {
        self.router.clone()
    }

    pub fn is_started(&self) -> bool {
        self.slot
            .read()
            .map(|slot| slot.as_ref().is_some_and(ReferenceCache::is_ready))
            .unwrap_or(false)
    }

    /// Service the context was started for.
    pub fn service_name(&self) -> Option<String> {
        self.slot
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|c| c.service_name().to_string()))
    }
}

impl Drop for ServiceBroadcast {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Broadcast teardown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for ServiceBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBroadcast")
            .field("service_name", &self.service_name())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InMemoryRegistry, ProviderOp};

    fn context() -> (Arc<InMemoryRegistry>, ServiceBroadcast) {
        let (registry, providers) = InMemoryRegistry::shared();
        registry.register("audit", "file", ()).unwrap();
        registry.register("audit", "filter", ()).unwrap();
        (registry, ServiceBroadcast::new(providers))
    }

    #[test]
    fn test_broadcast_without_instance() {
        let (_registry, broadcast) = context();
        let mut calls = 0;
        assert!(!broadcast.broadcast(|_| {
            calls += 1;
            true
        }));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_startup_and_shutdown() {
        let (registry, broadcast) = context();
        broadcast.startup("audit", "filter", false).unwrap();
        assert!(broadcast.is_started());
        assert_eq!(broadcast.service_name().as_deref(), Some("audit"));
        assert_eq!(
            broadcast.router().watched_service().as_deref(),
            Some("audit")
        );

        let mut seen = Vec::new();
        assert!(!broadcast.broadcast(|h| {
            seen.push(h.name());
            false
        }));
        assert_eq!(seen, vec!["audit.file"]);

        broadcast.shutdown().unwrap();
        assert!(!broadcast.is_started());
        assert_eq!(registry.live_channels(), 0);
        broadcast.shutdown().unwrap();
    }

    #[test]
    fn test_startup_twice_fails() {
        let (_registry, broadcast) = context();
        broadcast.startup("audit", "filter", false).unwrap();
        assert!(matches!(
            broadcast.startup("audit", "filter", false),
            Err(BroadcastError::AlreadyStarted { .. })
        ));
        assert!(broadcast.is_started());
    }

    #[test]
    fn test_startup_rolls_back_on_init_failure() {
        let (registry, broadcast) = context();
        registry.fail_next(ProviderOp::CacheCreate);

        assert!(broadcast.startup("audit", "filter", false).is_err());
        assert!(!broadcast.is_started());
        assert_eq!(registry.live_channels(), 0);

        broadcast.startup("audit", "filter", false).unwrap();
        assert!(broadcast.is_started());
    }

    #[test]
    fn test_bind_default() {
        let (registry, broadcast) = context();
        assert_eq!(registry.default_of("audit").as_deref(), Some("file"));

        broadcast.startup("audit", "filter", true).unwrap();
        assert_eq!(registry.default_of("audit").as_deref(), Some("filter"));
    }

    #[test]
    fn test_bind_default_failure_aborts_startup() {
        let (registry, broadcast) = context();
        registry.fail_next(ProviderOp::SetDefault);

        let err = broadcast.startup("audit", "filter", true).unwrap_err();
        assert!(matches!(err, BroadcastError::Registration { .. }));
        assert!(!broadcast.is_started());
        assert_eq!(registry.live_channels(), 0);
        assert_eq!(broadcast.router().watched_service(), None);
    }

    #[test]
    fn test_startup_with_config() {
        let (_registry, broadcast) = context();
        let config = BroadcastConfig::new("audit", "filter");
        broadcast.startup_with(&config).unwrap();
        assert!(broadcast.is_started());

        let (_registry, broadcast) = context();
        let invalid = BroadcastConfig::new("audit.x", "filter");
        assert!(matches!(
            broadcast.startup_with(&invalid),
            Err(BroadcastError::Config { .. })
        ));
    }

    #[test]
    fn test_shutdown_surfaces_teardown_error() {
        let (registry, broadcast) = context();
        broadcast.startup("audit", "filter", false).unwrap();

        registry.fail_next(ProviderOp::CacheDestroy);
        assert!(matches!(
            broadcast.shutdown(),
            Err(BroadcastError::CacheDestroy { .. })
        ));
        assert!(!broadcast.is_started());
        assert_eq!(registry.live_channels(), 0);
    }

    #[test]
    fn test_drop_shuts_down() {
        let (registry, broadcast) = context();
        broadcast.startup("audit", "filter", false).unwrap();
        drop(broadcast);
        assert_eq!(registry.live_channels(), 0);
        assert_eq!(registry.live_caches(), 0);
    }
}
