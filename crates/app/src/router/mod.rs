//! The route table.
//!
//! Routes are registered into a [`RouteTable`] while the application is being built, compiled
//! into one trie per HTTP method ([`CompiledRoutes`]) at boot, and matched by the
//! [`Dispatcher`]. Registration order is significant: when two patterns of the same method can
//! match one path, the route registered first wins.

pub mod cache;
pub mod dispatch;
pub mod pattern;

use crate::handler::RequestHandler;

pub use cache::{CacheError, RouteCache};
pub use dispatch::{Dispatcher, Found, Outcome};
pub use pattern::{RoutePattern, Segment};

use http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

type InnerRouter = matchit::Router<usize>;

/// The six verbs registered by `any`
pub const ANY_METHODS: [Method; 6] = [Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::HEAD];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("route '{pattern}' has no http method")]
    EmptyMethods { pattern: String },

    #[error("route {method} '{pattern}' is already registered as '{existing}'")]
    Duplicate { method: Method, pattern: String, existing: String },

    #[error("route {method} '{pattern}' would shadow the earlier route '{earlier}'")]
    Shadowed { method: Method, pattern: String, earlier: String },

    /// The trie can not hold the pattern next to an earlier one, such as a placeholder and a
    /// catch-all on the same segment
    #[error("route {method} '{pattern}' conflicts with another route: {reason}")]
    Conflict { method: Method, pattern: String, reason: String },
}

impl RouteError {
    pub fn invalid_pattern<S: ToString>(pattern: &str, reason: S) -> Self {
        Self::InvalidPattern { pattern: pattern.to_string(), reason: reason.to_string() }
    }

    pub fn conflict<S: ToString>(method: &Method, pattern: &str, reason: S) -> Self {
        Self::Conflict { method: method.clone(), pattern: pattern.to_string(), reason: reason.to_string() }
    }
}

/// Index of a route in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(usize);

impl RouteId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A registered route: the methods it accepts, its pattern and its handler
pub struct Route {
    methods: Vec<Method>,
    pattern: RoutePattern,
    handler: Arc<dyn RequestHandler>,
}

impl Route {
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn handler(&self) -> &dyn RequestHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("methods", &self.methods).field("pattern", &self.pattern.as_str()).finish()
    }
}

/// Routes in registration order.
///
/// A (method, pattern) pair can be registered only once: a duplicate is rejected, and so is a
/// pattern that the trie would prefer over an earlier overlapping route of the same method,
/// because it would silently take requests that belong to the earlier registration.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` for every method in `methods` on `pattern`.
    ///
    /// # Errors
    /// See [`RouteError`], the table is left unchanged when an error is returned.
    pub fn add_route<I, H>(&mut self, methods: I, pattern: &str, handler: H) -> Result<RouteId, RouteError>
    where
        I: IntoIterator<Item = Method>,
        H: RequestHandler + 'static,
    {
        self.add_shared(methods, pattern, Arc::new(handler))
    }

    pub(crate) fn add_shared<I>(
        &mut self,
        methods: I,
        pattern: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<RouteId, RouteError>
    where
        I: IntoIterator<Item = Method>,
    {
        let mut unique_methods: Vec<Method> = Vec::new();
        for method in methods {
            if !unique_methods.contains(&method) {
                unique_methods.push(method);
            }
        }
        if unique_methods.is_empty() {
            return Err(RouteError::EmptyMethods { pattern: pattern.to_string() });
        }

        let pattern = RoutePattern::parse(pattern)?;

        for existing in &self.routes {
            let Some(method) = unique_methods.iter().find(|method| existing.methods.contains(*method)) else {
                continue;
            };

            if pattern.same_shape(&existing.pattern) {
                return Err(RouteError::Duplicate {
                    method: method.clone(),
                    pattern: pattern.to_string(),
                    existing: existing.pattern.to_string(),
                });
            }
            if pattern.shadows(&existing.pattern) {
                return Err(RouteError::Shadowed {
                    method: method.clone(),
                    pattern: pattern.to_string(),
                    earlier: existing.pattern.to_string(),
                });
            }
            if let Some(index) = pattern.param_catch_all_conflict(&existing.pattern) {
                return Err(RouteError::conflict(
                    method,
                    pattern.as_str(),
                    format!("a placeholder and a catch-all can not share segment {index} with '{}'", existing.pattern),
                ));
            }
        }

        let id = RouteId(self.routes.len());
        debug!(methods = ?unique_methods, pattern = %pattern, "route registered");
        self.routes.push(Route { methods: unique_methods, pattern, handler });
        Ok(id)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Hex encoded SHA-256 over the ordered `(methods, pattern)` list, identifies the route set a
    /// compiled table was built from
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for route in &self.routes {
            let methods = route.methods.iter().map(Method::as_str).collect::<Vec<_>>().join(",");
            hasher.update(format!("{methods} {}\n", route.pattern));
        }
        hex::encode(hasher.finalize())
    }

    /// Compiles the routes into one trie per method.
    ///
    /// # Errors
    /// Returns [`RouteError::Conflict`] when the trie rejects a pattern.
    pub fn compile(&self) -> Result<CompiledRoutes, RouteError> {
        let mut compiled = CompiledRoutes::default();

        for (index, route) in self.routes.iter().enumerate() {
            let params = route
                .pattern
                .matcher_params()
                .into_iter()
                .map(|(name, key)| CompiledParam { name, key })
                .collect::<Vec<_>>();
            let entry = CompiledEntry {
                route: RouteId(index),
                pattern: route.pattern.to_string(),
                matcher: route.pattern.matcher_path(),
                params,
            };

            for method in &route.methods {
                compiled.insert(method, entry.clone())?;
            }
        }

        Ok(compiled)
    }

    /// Compiles the table, or loads it from `cache` when the cached fingerprint matches, and
    /// builds the dispatcher over it.
    ///
    /// A missing, stale or unreadable cache is rebuilt; failing to write it only logs a warning.
    ///
    /// # Errors
    /// Returns the compilation error, see [`RouteTable::compile`].
    pub fn into_dispatcher(self, cache: Option<&RouteCache>) -> Result<Dispatcher, RouteError> {
        let compiled = match cache {
            None => self.compile()?,
            Some(cache) => {
                let fingerprint = self.fingerprint();
                match cache.load(&fingerprint, self.routes.len()) {
                    Ok(compiled) => {
                        debug!(path = %cache.path().display(), "route table loaded from cache");
                        compiled
                    }
                    Err(e) => {
                        if matches!(e, CacheError::Missing) {
                            debug!(path = %cache.path().display(), "route cache is empty, compiling");
                        } else {
                            warn!(cause = %e, path = %cache.path().display(), "route cache rejected, compiling");
                        }

                        let compiled = self.compile()?;
                        if let Err(e) = cache.store(&compiled, &fingerprint) {
                            warn!(cause = %e, path = %cache.path().display(), "failed to write route cache");
                        }
                        compiled
                    }
                }
            }
        };

        let handlers = self.routes.into_iter().map(|route| route.handler).collect();
        Ok(Dispatcher::new(compiled, handlers))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledParam {
    pub name: String,
    pub key: String,
}

/// One route as seen by the trie of a single method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledEntry {
    pub route: RouteId,
    pub pattern: String,
    pub matcher: String,
    pub params: Vec<CompiledParam>,
}

pub struct MethodRoutes {
    method: Method,
    matcher: InnerRouter,
    entries: Vec<CompiledEntry>,
}

impl MethodRoutes {
    fn new(method: Method) -> Self {
        Self { method, matcher: InnerRouter::new(), entries: Vec::new() }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Entries in registration order
    pub fn entries(&self) -> &[CompiledEntry] {
        &self.entries
    }

    pub(crate) fn at<'router, 'req>(
        &'router self,
        path: &'req str,
    ) -> Option<(&'router CompiledEntry, matchit::Params<'router, 'req>)> {
        let matched = self.matcher.at(path).ok()?;
        let entry = self.entries.get(*matched.value)?;
        Some((entry, matched.params))
    }
}

impl fmt::Debug for MethodRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRoutes").field("method", &self.method).field("entries", &self.entries).finish()
    }
}

/// The compiled route table: one trie per method, methods in order of first registration
#[derive(Debug, Default)]
pub struct CompiledRoutes {
    methods: Vec<MethodRoutes>,
}

impl CompiledRoutes {
    /// Rebuilds the tries from already compiled entries, patterns are not validated again.
    ///
    /// # Errors
    /// Returns [`RouteError::Conflict`] when the trie rejects an entry.
    pub fn from_entries<I>(methods: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = (Method, Vec<CompiledEntry>)>,
    {
        let mut compiled = Self::default();
        for (method, entries) in methods {
            for entry in entries {
                compiled.insert(&method, entry)?;
            }
        }
        Ok(compiled)
    }

    fn insert(&mut self, method: &Method, entry: CompiledEntry) -> Result<(), RouteError> {
        let position = match self.methods.iter().position(|routes| &routes.method == method) {
            Some(position) => position,
            None => {
                self.methods.push(MethodRoutes::new(method.clone()));
                self.methods.len() - 1
            }
        };
        let routes = &mut self.methods[position];

        routes
            .matcher
            .insert(entry.matcher.clone(), routes.entries.len())
            .map_err(|e| RouteError::conflict(method, &entry.pattern, e))?;
        routes.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, method: &Method) -> Option<&MethodRoutes> {
        self.methods.iter().find(|routes| &routes.method == method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodRoutes> {
        self.methods.iter()
    }

    /// Highest route id referenced by any entry
    pub fn max_route(&self) -> Option<RouteId> {
        self.methods.iter().flat_map(|routes| routes.entries.iter().map(|entry| entry.route)).max()
    }
}
