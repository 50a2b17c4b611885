//! Collaborator contracts consumed by the broadcast layer.
//!
//! The reference cache never talks to a concrete registry; it holds a
//! [`Providers`] bundle of trait objects:
//! - **Channels**: named service groups that can be invalidated together
//! - **Ignore lists**: per-channel implementations to leave out
//! - **Caches**: resolved handle sets served from a channel
//! - **Registry**: lookup and default binding of implementations
//!
//! [`InMemoryRegistry`] implements all of them.

mod memory;
mod traits;

pub use memory::InMemoryRegistry;
pub use traits::{
    CacheProvider, ChannelProvider, IgnoreListProvider, ProviderOp, Providers,
    RegistryRegistration, ServiceRegistry,
};
