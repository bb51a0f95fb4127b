//! The application core: building, booting and handling requests.
//!
//! An [`ApplicationBuilder`] collects configuration, service bindings, routes and middleware.
//! [`ApplicationBuilder::boot`] consumes it and produces an immutable [`Application`], so no
//! route, middleware or service can be added once requests are being handled.

use crate::config::AppConfig;
use crate::exception::{self, DefaultExceptionHandler, ExceptionHandler, FatalError, HandleError};
use crate::handler::{RequestHandler, ResourceAction, ResourceController, ResourceHandler};
use crate::middleware::{Endpoint, Middleware, MiddlewareRegistry, Pipeline};
use crate::router::{ANY_METHODS, Dispatcher, Outcome, RouteCache, RouteError, RouteTable};
use crate::services::{ServiceContainer, ServiceProvider};
use crate::{HandlerError, Request, RequestContext, Response, ResponseBody};

use bytes::Bytes;
use http::Method;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum BootError {
    #[error("invalid route: {source}")]
    Route {
        #[from]
        source: RouteError,
    },

    #[error("unknown middleware '{name}'")]
    UnknownMiddleware { name: String },
}

enum MiddlewareRef {
    Instance(Arc<dyn Middleware>),
    Named(String),
}

pub struct ApplicationBuilder {
    config: AppConfig,
    services: ServiceContainer,
    providers: Vec<Box<dyn ServiceProvider>>,
    routes: RouteTable,
    route_errors: Vec<RouteError>,
    middlewares: Vec<MiddlewareRef>,
    registry: MiddlewareRegistry,
    exception_handler: Option<Box<dyn ExceptionHandler>>,
}

impl fmt::Debug for ApplicationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationBuilder")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("middlewares", &self.middlewares.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config: AppConfig::default(),
            services: ServiceContainer::new(),
            providers: Vec::new(),
            routes: RouteTable::new(),
            route_errors: Vec::new(),
            middlewares: Vec::new(),
            registry: MiddlewareRegistry::new(),
            exception_handler: None,
        }
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a provider, providers run in the order they are added when the application boots
    pub fn provider<P: ServiceProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn bind<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.services.bind(service);
        self
    }

    /// Appends `middleware` to the pipeline, the first middleware added is the outermost
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(MiddlewareRef::Instance(Arc::new(middleware)));
        self
    }

    /// Makes `middleware` available to [`ApplicationBuilder::add`] under `name`
    pub fn middleware_alias<M: Middleware + 'static>(mut self, name: impl Into<String>, middleware: M) -> Self {
        let name = name.into();
        if self.registry.register(name.clone(), Arc::new(middleware)).is_some() {
            warn!(name, "middleware alias registered twice, keeping the last one");
        }
        self
    }

    /// Appends the middleware registered under `name`, resolved when the application boots
    pub fn add(mut self, name: impl Into<String>) -> Self {
        self.middlewares.push(MiddlewareRef::Named(name.into()));
        self
    }

    pub fn exception_handler<E: ExceptionHandler + 'static>(mut self, handler: E) -> Self {
        self.exception_handler = Some(Box::new(handler));
        self
    }

    pub fn get<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept([Method::GET], path, handler)
    }

    pub fn post<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept([Method::POST], path, handler)
    }

    pub fn put<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept([Method::PUT], path, handler)
    }

    pub fn patch<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept([Method::PATCH], path, handler)
    }

    pub fn delete<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept([Method::DELETE], path, handler)
    }

    pub fn head<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept([Method::HEAD], path, handler)
    }

    /// Registers `handler` for all six verbs
    pub fn any<H: RequestHandler + 'static>(self, path: &str, handler: H) -> Self {
        self.accept(ANY_METHODS, path, handler)
    }

    /// Registers `handler` for every method in `methods`.
    ///
    /// A rejected route does not stop the chain, the first rejection is returned by
    /// [`ApplicationBuilder::boot`].
    pub fn accept<I, H>(self, methods: I, path: &str, handler: H) -> Self
    where
        I: IntoIterator<Item = Method>,
        H: RequestHandler + 'static,
    {
        self.route(methods, path, Arc::new(handler))
    }

    /// Registers the five conventional routes of `controller` below `path`, see
    /// [`ResourceController`] for the table.
    pub fn resource<C: ResourceController + 'static>(self, path: &str, controller: C) -> Self {
        let controller = Arc::new(controller);
        let base = path.trim_end_matches('/');
        let collection = if base.is_empty() { "/".to_string() } else { base.to_string() };
        let member = format!("{base}/{{id}}");

        let actions = [
            (vec![Method::GET], &collection, ResourceAction::Index),
            (vec![Method::PUT, Method::POST], &collection, ResourceAction::Store),
            (vec![Method::GET], &member, ResourceAction::Show),
            (vec![Method::PUT, Method::PATCH], &member, ResourceAction::Update),
            (vec![Method::DELETE], &member, ResourceAction::Destroy),
        ];

        let mut builder = self;
        for (methods, path, action) in actions {
            let handler = ResourceHandler::new(Arc::clone(&controller), action);
            builder = builder.route(methods, path, Arc::new(handler));
        }
        builder
    }

    fn route<I>(mut self, methods: I, path: &str, handler: Arc<dyn RequestHandler>) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        if let Err(e) = self.routes.add_shared(methods, path, handler) {
            warn!(cause = %e, "route rejected");
            self.route_errors.push(e);
        }
        self
    }

    /// Runs the service providers, compiles the route table (or loads it from the configured
    /// cache) and resolves the middleware pipeline.
    ///
    /// # Errors
    /// Returns the first rejected route, a route table that can not be compiled, or a middleware
    /// name without alias.
    pub fn boot(self) -> Result<Application, BootError> {
        let Self { config, mut services, providers, routes, route_errors, middlewares, registry, exception_handler } =
            self;

        if let Some(e) = route_errors.into_iter().next() {
            return Err(e.into());
        }

        services.bind(config.clone());
        for provider in &providers {
            debug!(provider = provider.name(), "registering services");
            provider.register(&mut services);
        }

        let route_count = routes.len();
        let cache = config.router_cache.as_ref().map(|cache| RouteCache::new(&cache.path));
        let dispatcher = routes.into_dispatcher(cache.as_ref())?;

        let mut pipeline = Pipeline::new();
        for middleware in middlewares {
            let middleware = match middleware {
                MiddlewareRef::Instance(middleware) => middleware,
                MiddlewareRef::Named(name) => {
                    registry.resolve(&name).ok_or(BootError::UnknownMiddleware { name })?
                }
            };
            pipeline.push(middleware);
        }

        let exception_handler =
            exception_handler.unwrap_or_else(|| Box::new(DefaultExceptionHandler::new(config.debug)));

        info!(
            name = %config.name,
            version = %config.version,
            routes = route_count,
            middlewares = pipeline.len(),
            services = services.len(),
            "application booted"
        );
        Ok(Application { config, services, dispatcher, pipeline, exception_handler })
    }
}

/// A booted application.
///
/// Everything is read-only after boot, an `Arc<Application>` can serve requests from any number
/// of threads.
pub struct Application {
    config: AppConfig,
    services: ServiceContainer,
    dispatcher: Dispatcher,
    pipeline: Pipeline,
    exception_handler: Box<dyn ExceptionHandler>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn services(&self) -> &ServiceContainer {
        &self.services
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handles one request, always producing a response.
    ///
    /// The request runs through the middleware pipeline to the matched route. An error or a
    /// panic on the way is reported and rendered by the exception handler. The terminate hooks
    /// run afterwards in every case, with the response that is returned.
    pub fn handle<B: Into<Bytes>>(&self, request: http::Request<B>) -> Response {
        let mut request = Request::from(request);
        let endpoint = RouteEndpoint { dispatcher: &self.dispatcher, services: &self.services };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.handle(&mut request, &endpoint)));
        let mut response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => self.render_error(&request, HandleError::Handler(e)),
            Err(payload) => self.render_error(&request, FatalError::from_panic("request handling", payload).into()),
        };

        if request.method() == Method::HEAD {
            *response.body_mut() = ResponseBody::empty();
        }

        for failure in self.pipeline.terminate(&request, &response) {
            self.report(&failure.into());
        }
        response
    }

    fn render_error(&self, request: &Request, error: HandleError) -> Response {
        self.report(&error);
        match panic::catch_unwind(AssertUnwindSafe(|| self.exception_handler.render(request, &error))) {
            Ok(response) => response,
            Err(payload) => {
                let fatal: HandleError = FatalError::from_panic("error rendering", payload).into();
                self.report(&fatal);
                DefaultExceptionHandler::new(false).render(request, &fatal)
            }
        }
    }

    /// Reports `failure`, falling back to the default reporter when the exception handler panics
    fn report(&self, failure: &HandleError) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.exception_handler.report(failure))) {
            let fatal = FatalError::from_panic("error reporting", payload);
            error!(%fatal, "exception handler failed to report an error");
            DefaultExceptionHandler::new(false).report(failure);
        }
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("dispatcher", &self.dispatcher)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// The innermost step of the pipeline: dispatches the request and invokes the matched handler
struct RouteEndpoint<'a> {
    dispatcher: &'a Dispatcher,
    services: &'a ServiceContainer,
}

impl Endpoint for RouteEndpoint<'_> {
    fn call(&self, req: &Request) -> Result<Response, HandlerError> {
        match self.dispatcher.dispatch(req.method(), req.path()) {
            Outcome::Found(found) => {
                let (handler, params) = found.into_parts();
                let ctx = RequestContext::new(req, &params, self.services);
                handler.invoke(&ctx)
            }
            Outcome::NotFound => exception::not_found(),
            Outcome::MethodNotAllowed { allowed } => exception::method_not_allowed(&allowed),
        }
    }
}
