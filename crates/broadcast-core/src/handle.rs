//! Opaque handles exchanged with the providers.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::NotificationConfig;

/// Identifies a channel created by a [`crate::ChannelProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(Uuid);

impl ChannelHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Identifies a cache created by a [`crate::CacheProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHandle(Uuid);

impl CacheHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CacheHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache-{}", self.0)
    }
}

/// Reference to one resolved implementation of a service.
///
/// The payload is type-erased; callers that know the concrete type of a
/// service family use [`ServiceHandle::downcast_ref`].
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<str>,
    implementation: Arc<str>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl ServiceHandle {
    pub fn new<T>(service: &str, implementation: &str, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::from_shared(service, implementation, Arc::new(payload))
    }

    pub fn from_shared(
        service: &str,
        implementation: &str,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            service: Arc::from(service),
            implementation: Arc::from(implementation),
            payload,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    /// `<service>.<implementation>`
    pub fn name(&self) -> String {
        format!(
            "{}{}{}",
            self.service,
            NotificationConfig::SEPARATOR,
            self.implementation
        )
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service)
            .field("implementation", &self.implementation)
            .finish_non_exhaustive()
    }
}

/// Ordered snapshot of handles returned by a cache query.
///
/// Cloning is cheap; the provider keeps its own reference, so a set stays
/// intact for as long as a caller iterates it even if the cache is
/// invalidated meanwhile.
#[derive(Debug, Clone)]
pub struct HandleSet(Arc<[ServiceHandle]>);

impl HandleSet {
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(ServiceHandle::name).collect()
    }
}

impl Default for HandleSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<ServiceHandle>> for HandleSet {
    fn from(handles: Vec<ServiceHandle>) -> Self {
        Self(Arc::from(handles))
    }
}

impl Deref for HandleSet {
    type Target = [ServiceHandle];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> IntoIterator for &'a HandleSet {
    type Item = &'a ServiceHandle;
    type IntoIter = std::slice::Iter<'a, ServiceHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
