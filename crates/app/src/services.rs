//! The service container handed to route handlers.
//!
//! Services are bound by type while the application is being built and by [`ServiceProvider`]s
//! during boot. Once the application is booted the container is only reachable through shared
//! references, so it can be read from any number of threads without locking.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Service = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ServiceContainer {
    services: HashMap<TypeId, (&'static str, Service)>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self { services: HashMap::new() }
    }

    /// Binds `service` as the singleton for its type, replacing any previous binding
    pub fn bind<T: Send + Sync + 'static>(&mut self, service: T) -> &mut Self {
        self.bind_arc(Arc::new(service))
    }

    pub fn bind_arc<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.services.insert(TypeId::of::<T>(), (type_name::<T>(), service));
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.services.get(&TypeId::of::<T>()).and_then(|(_, service)| service.downcast_ref::<T>())
    }

    pub fn get_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let (_, service) = self.services.get(&TypeId::of::<T>())?;
        Arc::clone(service).downcast::<T>().ok()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.services.values().map(|(name, _)| name)).finish()
    }
}

/// Registers a group of related services, runs exactly once while the application boots
pub trait ServiceProvider: Send + Sync {
    fn register(&self, services: &mut ServiceContainer);

    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

struct FnProvider<F>(F);

impl<F> ServiceProvider for FnProvider<F>
where
    F: Fn(&mut ServiceContainer) + Send + Sync,
{
    fn register(&self, services: &mut ServiceContainer) {
        (self.0)(services);
    }
}

pub fn provider_fn<F>(f: F) -> impl ServiceProvider
where
    F: Fn(&mut ServiceContainer) + Send + Sync,
{
    FnProvider(f)
}
