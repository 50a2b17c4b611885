//! Routing of loader notifications to the reference cache.
//!
//! The loader reports batches of `<service>.<implementation>` names after
//! loading and before unloading components. When a batch names the watched
//! service, the registered [`ReferenceCache`] is refreshed so the next
//! broadcast resolves the new implementation set.
//!
//! The caller is an external dispatcher, so nothing may unwind out of
//! [`LoadNotificationRouter::route`]: panics are caught and returned as
//! [`BroadcastError::NotificationPanicked`].

use crate::config::NotificationConfig;
use crate::error::{BroadcastError, Result};
use crate::reference_cache::ReferenceCache;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Slot holding the reference cache shared by the broadcast context and its router.
pub(crate) type CacheSlot = Arc<RwLock<Option<ReferenceCache>>>;

/// What a notification batch led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A watched event was found and the cache refreshed.
    Refreshed,
    /// No event named the watched service, or no cache is registered.
    NoMatch,
}

/// Split `<service>.<implementation>` at the first separator.
pub fn split_event(event: &str) -> Result<(&str, &str)> {
    event
        .split_once(NotificationConfig::SEPARATOR)
        .ok_or_else(|| BroadcastError::MalformedEvent {
            event: event.to_string(),
        })
}

/// Reacts to loader notifications for one watched service.
pub struct LoadNotificationRouter {
    watched: RwLock<Option<String>>,
    slot: CacheSlot,
}

impl LoadNotificationRouter {
    pub(crate) fn new(slot: CacheSlot) -> Self {
        Self {
            watched: RwLock::new(None),
            slot,
        }
    }

    /// Set the service-name prefix this router reacts to.
    ///
    /// Meant to be called once during startup, before notifications flow.
    pub fn set_watched_service(&self, name: impl Into<String>) {
        let name = name.into();
        match self.watched.write() {
            Ok(mut watched) => *watched = Some(name),
            Err(poisoned) => *poisoned.into_inner() = Some(name),
        }
    }

    pub fn watched_service(&self) -> Option<String> {
        self.watched.read().ok().and_then(|watched| watched.clone())
    }

    /// Loader finished loading the named implementations.
    pub fn notify_after_load<S: AsRef<str>>(&self, services: &[S]) -> Result<RouteOutcome> {
        debug!("Load notification for {} service(s)", services.len());
        self.route(services)
    }

    /// Loader is about to unload the named implementations.
    pub fn notify_before_unload<S: AsRef<str>>(&self, services: &[S]) -> Result<RouteOutcome> {
        debug!("Unload notification for {} service(s)", services.len());
        self.route(services)
    }

    /// Refresh the cache if any event names the watched service.
    ///
    /// The first matching event wins: its refresh result is returned and
    /// the rest of the batch is not examined.
    pub fn route<S: AsRef<str>>(&self, events: &[S]) -> Result<RouteOutcome> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.route_batch(events))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Notification routing panicked: {}", message);
                Err(BroadcastError::NotificationPanicked { message })
            }
        }
    }

    fn route_batch<S: AsRef<str>>(&self, events: &[S]) -> Result<RouteOutcome> {
        let Some(watched) = self.watched_service() else {
            return Ok(RouteOutcome::NoMatch);
        };

        for event in events {
            let (service, implementation) = split_event(event.as_ref())?;
            if service != watched {
                continue;
            }

            let slot = self.slot.read().map_err(|_| BroadcastError::LockPoisoned {
                what: "broadcast slot",
            })?;
            if let Some(cache) = slot.as_ref() {
                debug!("Refreshing {} after change to {}", service, implementation);
                cache.refresh()?;
                return Ok(RouteOutcome::Refreshed);
            }
        }

        Ok(RouteOutcome::NoMatch)
    }
}

impl std::fmt::Debug for LoadNotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadNotificationRouter")
            .field("watched", &self.watched_service())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
