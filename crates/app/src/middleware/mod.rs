//! The middleware pipeline.
//!
//! Middleware wrap the final request handler the way nested function calls do: for a pipeline
//! `[a, b]` the endpoint runs as `a(b(endpoint))`. Each middleware receives the request and a
//! [`Next`] continuation, and may answer on its own by never running it.
//!
//! Once a response exists, the separate terminate phase runs [`Middleware::terminate`] of every
//! middleware in registration order, for side effects only.

use crate::exception::FatalError;
use crate::{HandlerError, Request, Response};

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

pub trait Middleware: Send + Sync {
    /// Handles `req`, calling `next.run(req)` to pass it on to the rest of the pipeline.
    ///
    /// # Errors
    /// An error aborts the pipeline, it is handed to the exception handler without running the
    /// remaining middleware.
    fn handle(&self, req: &mut Request, next: Next<'_>) -> Result<Response, HandlerError>;

    /// Runs after the response has been produced, whether by the handler or the exception handler.
    fn terminate(&self, _req: &Request, _resp: &Response) {}

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn handle(&self, req: &mut Request, next: Next<'_>) -> Result<Response, HandlerError> {
        (**self).handle(req, next)
    }

    fn terminate(&self, req: &Request, resp: &Response) {
        (**self).terminate(req, resp)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// What the innermost middleware calls through to
pub trait Endpoint {
    /// # Errors
    /// Returns the error of the final handler.
    fn call(&self, req: &Request) -> Result<Response, HandlerError>;
}

impl<F> Endpoint for F
where
    F: Fn(&Request) -> Result<Response, HandlerError>,
{
    fn call(&self, req: &Request) -> Result<Response, HandlerError> {
        (self)(req)
    }
}

/// The rest of the pipeline, as seen by one middleware
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining", &self.chain.len()).finish_non_exhaustive()
    }
}

impl Next<'_> {
    /// Runs the remaining middleware and then the endpoint.
    ///
    /// # Errors
    /// Returns the first error raised further down the pipeline.
    pub fn run(self, req: &mut Request) -> Result<Response, HandlerError> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                trace!(middleware = middleware.name(), "enter middleware");
                middleware.handle(req, Next { chain: rest, endpoint: self.endpoint })
            }
            None => self.endpoint.call(req),
        }
    }

    /// Number of middleware still to run before the endpoint
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// Ordered middleware, the first one is the outermost
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { middlewares: Vec::new() }
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.middlewares.iter().map(|middleware| middleware.name())
    }

    /// Runs `req` through every middleware and then `endpoint`.
    ///
    /// # Errors
    /// Returns the first error raised by a middleware or the endpoint.
    pub fn handle(&self, req: &mut Request, endpoint: &dyn Endpoint) -> Result<Response, HandlerError> {
        Next { chain: &self.middlewares, endpoint }.run(req)
    }

    /// Runs every terminate hook in registration order.
    ///
    /// A panicking hook does not stop the others, its panic is returned instead.
    pub fn terminate(&self, req: &Request, resp: &Response) -> Vec<FatalError> {
        let mut failures = Vec::new();
        for middleware in &self.middlewares {
            let result = panic::catch_unwind(AssertUnwindSafe(|| middleware.terminate(req, resp)));
            if let Err(payload) = result {
                failures.push(FatalError::from_panic(format!("terminate of {}", middleware.name()), payload));
            }
        }
        failures
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

pub struct FnMiddleware<F> {
    f: F,
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").field("f", &std::any::type_name::<F>()).finish()
    }
}

/// Wraps a closure `Fn(&mut Request, Next) -> Result<Response, HandlerError>` as a middleware
/// without terminate hook
pub fn fn_middleware<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Request, Next<'_>) -> Result<Response, HandlerError> + Send + Sync,
{
    FnMiddleware { f }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request, Next<'_>) -> Result<Response, HandlerError> + Send + Sync,
{
    fn handle(&self, req: &mut Request, next: Next<'_>) -> Result<Response, HandlerError> {
        (self.f)(req, next)
    }

    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }
}

/// Middleware instances registered under a name, so that they can be added to the pipeline by
/// name and resolved once at boot
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Registers `middleware` under `name`, returns the middleware it replaces
    pub fn register(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Option<Arc<dyn Middleware>> {
        self.entries.insert(name.into(), middleware)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.entries.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("MiddlewareRegistry").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Middleware, MiddlewareRegistry, Next, Pipeline, fn_middleware};
    use crate::body::ResponseBody;
    use crate::{HandlerError, Request, Response};
    use http::StatusCode;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        short_circuit: bool,
    }

    impl Recording {
        fn new(name: &'static str, log: &Log) -> Self {
            Self { name, log: Arc::clone(log), short_circuit: false }
        }

        fn short_circuit(mut self) -> Self {
            self.short_circuit = true;
            self
        }

        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl Middleware for Recording {
        fn handle(&self, req: &mut Request, next: Next<'_>) -> Result<Response, HandlerError> {
            self.push(format!("{} enter", self.name));
            let response = if self.short_circuit {
                let mut response = Response::new(ResponseBody::from("denied"));
                *response.status_mut() = StatusCode::FORBIDDEN;
                Ok(response)
            } else {
                next.run(req)
            };
            let status = response.as_ref().map(|r| r.status().as_u16()).unwrap_or_default();
            self.push(format!("{} exit {status}", self.name));
            response
        }

        fn terminate(&self, _req: &Request, resp: &Response) {
            self.push(format!("{} terminate {}", self.name, resp.status().as_u16()));
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn request() -> Request {
        http::Request::builder().uri("/").body("").unwrap().into()
    }

    fn pipeline(middlewares: Vec<Recording>) -> Pipeline {
        let mut pipeline = Pipeline::new();
        for middleware in middlewares {
            pipeline.push(Arc::new(middleware));
        }
        pipeline
    }

    fn run(pipeline: &Pipeline, log: &Log) -> Response {
        let endpoint = |_req: &Request| -> Result<Response, HandlerError> {
            log.lock().unwrap().push("endpoint".into());
            Ok(Response::new(ResponseBody::from("ok")))
        };
        let mut req = request();
        let response = pipeline.handle(&mut req, &endpoint).unwrap();
        assert!(pipeline.terminate(&req, &response).is_empty());
        response
    }

    #[test]
    fn test_call_and_terminate_order() {
        let log = Log::default();
        let pipeline = pipeline(vec![Recording::new("a", &log), Recording::new("b", &log)]);

        let response = run(&pipeline, &log);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a enter", "b enter", "endpoint", "b exit 200", "a exit 200", "a terminate 200", "b terminate 200"]
        );
    }

    #[test]
    fn test_short_circuit_skips_endpoint() {
        let log = Log::default();
        let pipeline = pipeline(vec![Recording::new("a", &log), Recording::new("b", &log).short_circuit()]);

        let response = run(&pipeline, &log);

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a enter", "b enter", "b exit 403", "a exit 403", "a terminate 403", "b terminate 403"]
        );
    }

    #[test]
    fn test_error_skips_remaining_middleware() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.push(Arc::new(fn_middleware(|_req, _next| Err("rejected".into()))));
        pipeline.push(Arc::new(Recording::new("b", &log)));

        let endpoint = |_req: &Request| -> Result<Response, HandlerError> { Ok(Response::new(ResponseBody::empty())) };
        let err = pipeline.handle(&mut request(), &endpoint).unwrap_err();

        assert_eq!(err.to_string(), "rejected");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fn_middleware_annotates_request() {
        let mut pipeline = Pipeline::new();
        pipeline.push(Arc::new(fn_middleware(|req, next| {
            req.extensions_mut().insert("tagged");
            next.run(req)
        })));

        let endpoint = |req: &Request| -> Result<Response, HandlerError> {
            let tag = req.extensions().get::<&'static str>().copied().unwrap_or("missing");
            Ok(Response::new(ResponseBody::from(tag)))
        };
        let response = pipeline.handle(&mut request(), &endpoint).unwrap();

        assert_eq!(response.body().as_bytes(), b"tagged");
    }

    #[test]
    fn test_panicking_terminate_does_not_stop_others() {
        struct Exploding;

        impl Middleware for Exploding {
            fn handle(&self, req: &mut Request, next: Next<'_>) -> Result<Response, HandlerError> {
                next.run(req)
            }

            fn terminate(&self, _req: &Request, _resp: &Response) {
                panic!("session store unavailable");
            }
        }

        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.push(Arc::new(Exploding));
        pipeline.push(Arc::new(Recording::new("b", &log)));

        let failures = pipeline.terminate(&request(), &Response::new(ResponseBody::empty()));

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message(), "session store unavailable");
        assert_eq!(*log.lock().unwrap(), vec!["b terminate 200"]);
    }

    #[test]
    fn test_registry_resolves_by_name() {
        let log = Log::default();
        let mut registry = MiddlewareRegistry::new();
        assert!(registry.register("auth", Arc::new(Recording::new("auth", &log))).is_none());

        assert!(registry.contains("auth"));
        assert_eq!(registry.resolve("auth").map(|m| m.name().to_string()), Some("auth".to_string()));
        assert!(registry.resolve("session").is_none());
    }
}
