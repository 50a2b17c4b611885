//! Service Broadcast - cached service handles with safe concurrent broadcast.
//!
//! This crate keeps a live, invalidatable cache of the implementations
//! registered for one service and lets any thread offer a callback to each
//! of them while the cache may be refreshed or torn down concurrently.
//!
//! The registry, channel and cache backends are abstract [`providers`];
//! [`InMemoryRegistry`] implements all of them in process memory.
//!
//! # Example
//!
//! ```rust
//! use service_broadcast::{InMemoryRegistry, ServiceBroadcast};
//!
//! # fn main() -> service_broadcast::Result<()> {
//! let (registry, providers) = InMemoryRegistry::shared();
//! registry.register("audit_log", "file_sink", "file")?;
//! registry.register("audit_log", "audit_filter", "self")?;
//!
//! let broadcast = ServiceBroadcast::new(providers);
//! broadcast.startup("audit_log", "audit_filter", false)?;
//!
//! // The component's own implementation is excluded.
//! let mut seen = Vec::new();
//! broadcast.broadcast(|handle| {
//!     seen.push(handle.name());
//!     false
//! });
//! assert_eq!(seen, vec!["audit_log.file_sink"]);
//!
//! // A newly loaded implementation shows up after the loader notifies us.
//! registry.register("audit_log", "syslog_sink", "syslog")?;
//! broadcast.router().notify_after_load(&["audit_log.syslog_sink"])?;
//! assert!(broadcast.broadcast(|handle| handle.implementation() == "syslog_sink"));
//!
//! broadcast.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod handle;
pub mod notification;
pub mod providers;
pub mod reference_cache;

// Re-export commonly used types
pub use broadcast::ServiceBroadcast;
pub use config::{BroadcastConfig, CacheConfig, NotificationConfig};
pub use error::{BroadcastError, Result};
pub use handle::{CacheHandle, ChannelHandle, HandleSet, ServiceHandle};
pub use notification::{split_event, LoadNotificationRouter, RouteOutcome};
pub use providers::{
    CacheProvider, ChannelProvider, IgnoreListProvider, InMemoryRegistry, ProviderOp, Providers,
    RegistryRegistration, ServiceRegistry,
};
pub use reference_cache::ReferenceCache;
