//! A small synchronous application core: a route table compiled into per-method tries, a
//! middleware pipeline with terminate hooks, a service container filled at boot and a single
//! error boundary rendering `{code, message}` json errors.
//!
//! ```
//! use micro_app::{Application, handler_fn};
//! use serde_json::json;
//!
//! let app = Application::builder()
//!     .get("/users/{id}", handler_fn(|req| json!({ "id": req.param("id") })))
//!     .boot()
//!     .unwrap();
//!
//! let response = app.handle(http::Request::get("/users/5").body("").unwrap());
//! assert_eq!(response.status(), http::StatusCode::OK);
//! assert_eq!(response.body().as_bytes(), br#"{"id":"5"}"#);
//! ```

mod app;
mod body;
mod config;
mod exception;
mod handler;
mod request;
mod responder;
mod services;

pub mod logging;
pub mod middleware;
pub mod router;

pub use app::{Application, ApplicationBuilder, BootError};
pub use body::ResponseBody;
pub use config::{AppConfig, RouterCacheConfig};
pub use exception::{DefaultExceptionHandler, ErrorBody, ExceptionHandler, FatalError, HandleError, HttpException};
pub use handler::{FnHandler, RequestHandler, ResourceController, handler_fn};
pub use middleware::{Middleware, Next, fn_middleware};
pub use request::{ExtractError, PathParams, Request, RequestContext};
pub use responder::{Json, Responder, json_response};
pub use services::{ServiceContainer, ServiceProvider, provider_fn};

/// The error type of handlers and middleware, rendered by the [`ExceptionHandler`]
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type Response = http::Response<ResponseBody>;
