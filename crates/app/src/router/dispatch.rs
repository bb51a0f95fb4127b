use crate::handler::RequestHandler;
use crate::router::{CompiledRoutes, RouteId};
use crate::PathParams;

use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Matches requests against the compiled route table.
///
/// Immutable once built: it is shared by every request the application handles.
pub struct Dispatcher {
    routes: CompiledRoutes,
    handlers: Vec<Arc<dyn RequestHandler>>,
}

/// Result of matching a request, routing failures are values rather than errors
pub enum Outcome<'router, 'req> {
    Found(Found<'router, 'req>),
    /// No pattern matches the path for any method
    NotFound,
    /// Some pattern matches the path, but not for the requested method
    MethodNotAllowed { allowed: Vec<Method> },
}

/// A matched route with its bound path parameters
pub struct Found<'router, 'req> {
    route: RouteId,
    pattern: &'router str,
    handler: &'router dyn RequestHandler,
    params: PathParams<'router, 'req>,
}

impl Dispatcher {
    /// `handlers` is indexed by [`RouteId`]
    pub fn new(routes: CompiledRoutes, handlers: Vec<Arc<dyn RequestHandler>>) -> Self {
        Self { routes, handlers }
    }

    pub fn routes(&self) -> &CompiledRoutes {
        &self.routes
    }

    /// Matches `method` and `path`.
    ///
    /// A `HEAD` request without a `HEAD` route of its own is answered by the matching `GET` route.
    pub fn dispatch<'router, 'req>(&'router self, method: &Method, path: &'req str) -> Outcome<'router, 'req> {
        if let Some(found) = self.find(method, path) {
            return Outcome::Found(found);
        }
        if method == Method::HEAD
            && let Some(found) = self.find(&Method::GET, path)
        {
            return Outcome::Found(found);
        }

        let mut allowed = self
            .routes
            .methods()
            .filter(|routes| routes.at(path).is_some())
            .map(|routes| routes.method().clone())
            .collect::<Vec<_>>();

        if allowed.is_empty() {
            trace!(%method, path, "no route matches");
            return Outcome::NotFound;
        }
        if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
            allowed.push(Method::HEAD);
        }
        trace!(%method, path, ?allowed, "method not allowed");
        Outcome::MethodNotAllowed { allowed }
    }

    fn find<'router, 'req>(&'router self, method: &Method, path: &'req str) -> Option<Found<'router, 'req>> {
        let (entry, matched) = self.routes.get(method)?.at(path)?;
        let handler = self.handlers.get(entry.route.index())?;

        let params = entry
            .params
            .iter()
            .filter_map(|param| matched.get(&param.key).map(|value| (param.name.as_str(), value)))
            .collect();

        Some(Found { route: entry.route, pattern: &entry.pattern, handler: handler.as_ref(), params: PathParams::new(params) })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("routes", &self.routes).finish_non_exhaustive()
    }
}

impl<'router, 'req> Found<'router, 'req> {
    pub fn route(&self) -> RouteId {
        self.route
    }

    /// The pattern as registered, e.g. `/users/{id}`
    pub fn pattern(&self) -> &'router str {
        self.pattern
    }

    pub fn handler(&self) -> &'router dyn RequestHandler {
        self.handler
    }

    pub fn params(&self) -> &PathParams<'router, 'req> {
        &self.params
    }

    pub fn into_parts(self) -> (&'router dyn RequestHandler, PathParams<'router, 'req>) {
        (self.handler, self.params)
    }
}

impl fmt::Debug for Found<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Found")
            .field("route", &self.route)
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Two found outcomes are equal when they resolve to the same route with the same parameters
impl PartialEq for Found<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.route == other.route && self.params == other.params
    }
}

impl PartialEq for Outcome<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Outcome::Found(a), Outcome::Found(b)) => a == b,
            (Outcome::NotFound, Outcome::NotFound) => true,
            (Outcome::MethodNotAllowed { allowed: a }, Outcome::MethodNotAllowed { allowed: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Outcome<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Found(found) => f.debug_tuple("Found").field(found).finish(),
            Outcome::NotFound => f.write_str("NotFound"),
            Outcome::MethodNotAllowed { allowed } => {
                f.debug_struct("MethodNotAllowed").field("allowed", allowed).finish()
            }
        }
    }
}
