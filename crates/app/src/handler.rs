use crate::responder::Responder;
use crate::{HandlerError, RequestContext, Response};

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A route handler, resolved when the route is registered and invoked for every request
/// dispatched to that route.
pub trait RequestHandler: Send + Sync {
    /// # Errors
    /// Any error is handed to the application's exception handler.
    fn invoke(&self, req: &RequestContext) -> Result<Response, HandlerError>;
}

impl<H: RequestHandler + ?Sized> RequestHandler for Box<H> {
    fn invoke(&self, req: &RequestContext) -> Result<Response, HandlerError> {
        (**self).invoke(req)
    }
}

impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    fn invoke(&self, req: &RequestContext) -> Result<Response, HandlerError> {
        (**self).invoke(req)
    }
}

/// a holder which represents any `Fn(&RequestContext) -> impl Responder`
pub struct FnHandler<F, R> {
    f: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<F, R> FnHandler<F, R>
where
    F: Fn(&RequestContext) -> R,
{
    fn new(f: F) -> Self {
        Self { f, _phantom: PhantomData }
    }
}

pub fn handler_fn<F, R>(f: F) -> FnHandler<F, R>
where
    F: Fn(&RequestContext) -> R,
{
    FnHandler::new(f)
}

impl<F, R> RequestHandler for FnHandler<F, R>
where
    F: Fn(&RequestContext) -> R + Send + Sync,
    R: Responder,
{
    fn invoke(&self, req: &RequestContext) -> Result<Response, HandlerError> {
        (self.f)(req).response_to(req)
    }
}

impl<F, R> fmt::Debug for FnHandler<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("f", &std::any::type_name::<F>()).finish()
    }
}

/// The conventional five actions of a resource, bound by `ApplicationBuilder::resource`:
///
/// | action    | methods      | path          |
/// |-----------|--------------|---------------|
/// | `index`   | GET          | `{path}`      |
/// | `store`   | PUT, POST    | `{path}`      |
/// | `show`    | GET          | `{path}/{id}` |
/// | `update`  | PUT, PATCH   | `{path}/{id}` |
/// | `destroy` | DELETE       | `{path}/{id}` |
#[allow(clippy::missing_errors_doc, reason = "errors are rendered by the exception handler")]
pub trait ResourceController: Send + Sync {
    fn index(&self, req: &RequestContext) -> Result<Response, HandlerError>;

    fn store(&self, req: &RequestContext) -> Result<Response, HandlerError>;

    fn show(&self, req: &RequestContext) -> Result<Response, HandlerError>;

    fn update(&self, req: &RequestContext) -> Result<Response, HandlerError>;

    fn destroy(&self, req: &RequestContext) -> Result<Response, HandlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceAction {
    Index,
    Store,
    Show,
    Update,
    Destroy,
}

/// One action of a shared controller instance
pub(crate) struct ResourceHandler<C: ?Sized> {
    controller: Arc<C>,
    action: ResourceAction,
}

impl<C: ResourceController + ?Sized> ResourceHandler<C> {
    pub(crate) fn new(controller: Arc<C>, action: ResourceAction) -> Self {
        Self { controller, action }
    }
}

impl<C: ResourceController + ?Sized> RequestHandler for ResourceHandler<C> {
    fn invoke(&self, req: &RequestContext) -> Result<Response, HandlerError> {
        match self.action {
            ResourceAction::Index => self.controller.index(req),
            ResourceAction::Store => self.controller.store(req),
            ResourceAction::Show => self.controller.show(req),
            ResourceAction::Update => self.controller.update(req),
            ResourceAction::Destroy => self.controller.destroy(req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FnHandler, RequestHandler, handler_fn};
    use crate::responder::Json;
    use crate::services::ServiceContainer;
    use crate::{HandlerError, PathParams, Request, RequestContext};
    use serde_json::json;

    fn assert_is_handler<T: RequestHandler>(_handler: &T) {
        // no op
    }

    #[test]
    fn assert_fn_is_handler_1() {
        fn get(_req: &RequestContext) {}

        let handler = FnHandler::new(get);
        assert_is_handler(&handler);
    }

    #[test]
    fn assert_fn_is_handler_2() {
        fn get(req: &RequestContext) -> Result<String, HandlerError> {
            Ok(req.method().to_string())
        }

        let handler = handler_fn(get);
        assert_is_handler(&handler);
    }

    #[test]
    fn test_invoke_closure_reads_params() {
        let handler = handler_fn(|req| Json(json!({ "id": req.param("id") })));

        let request: Request = http::Request::builder().uri("/users/5").body("").unwrap().into();
        let params = PathParams::new(vec![("id", "5")]);
        let services = ServiceContainer::new();
        let ctx = RequestContext::new(&request, &params, &services);

        let response = handler.invoke(&ctx).unwrap();
        assert_eq!(response.body().as_bytes(), br#"{"id":"5"}"#);
    }
}
