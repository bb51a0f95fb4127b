//! The error boundary of the application.
//!
//! Every error that escapes the middleware pipeline or a route handler, and every panic caught
//! while handling a request, ends up in an [`ExceptionHandler`]: it is reported first and then
//! rendered into the response the client receives.

use crate::body::ResponseBody;
use crate::request::ExtractError;
use crate::responder::json_response;
use crate::{HandlerError, Request, Response};

use http::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use serde::Serialize;
use std::any::Any;
use std::error::Error;
use thiserror::Error;
use tracing::error;

/// An error that reached the error boundary
#[derive(Error, Debug)]
pub enum HandleError {
    /// Returned by a middleware or a route handler
    #[error("{0}")]
    Handler(HandlerError),

    /// A panic caught while handling the request
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl From<HandlerError> for HandleError {
    fn from(error: HandlerError) -> Self {
        Self::Handler(error)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("panic during {phase}: {message}")]
pub struct FatalError {
    phase: String,
    message: String,
}

impl FatalError {
    pub fn new(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self { phase: phase.into(), message: message.into() }
    }

    /// Builds the error from a payload returned by [`std::panic::catch_unwind`]
    pub fn from_panic(phase: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(phase, message)
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A handler error that chooses its own status code and error code.
///
/// ```
/// use http::StatusCode;
/// use micro_app::HttpException;
///
/// let e = HttpException::new(StatusCode::UNPROCESSABLE_ENTITY, "name is required").with_code(1001);
/// assert_eq!(e.code(), 1001);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HttpException {
    status: StatusCode,
    code: i64,
    message: String,
}

impl HttpException {
    /// The error code defaults to the numeric status
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, code: i64::from(status.as_u16()), message: message.into() }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The json body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), trace: None }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ExceptionHandler: Send + Sync {
    /// Records `error`, called once for every error before it is rendered
    fn report(&self, error: &HandleError);

    /// Builds the response sent for `error`, must not fail
    fn render(&self, req: &Request, error: &HandleError) -> Response;
}

/// Logs through `tracing` and renders `{code, message}` json bodies.
///
/// [`HttpException`] and [`ExtractError`] choose their status, everything else is a 500 with
/// code 0. With `debug` set the body also carries the `trace` of the error.
#[derive(Debug, Clone, Default)]
pub struct DefaultExceptionHandler {
    debug: bool,
}

impl DefaultExceptionHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    fn status_and_code(error: &HandleError) -> (StatusCode, i64) {
        let HandleError::Handler(error) = error else {
            return (StatusCode::INTERNAL_SERVER_ERROR, 0);
        };
        if let Some(exception) = error.downcast_ref::<HttpException>() {
            (exception.status(), exception.code())
        } else if let Some(extract) = error.downcast_ref::<ExtractError>() {
            (extract.status(), i64::from(extract.status().as_u16()))
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, 0)
        }
    }
}

impl ExceptionHandler for DefaultExceptionHandler {
    fn report(&self, error: &HandleError) {
        match error {
            HandleError::Handler(e) => error!(cause = %e, "unhandled error while handling request"),
            HandleError::Fatal(e) => error!(phase = e.phase(), cause = e.message(), "panic while handling request"),
        }
    }

    fn render(&self, _req: &Request, error: &HandleError) -> Response {
        let (status, code) = Self::status_and_code(error);
        let mut body = ErrorBody::new(code, error.to_string());
        if self.debug {
            body.trace = Some(trace(error));
        }

        match json_response(status, &body) {
            Ok(response) => response,
            Err(e) => {
                error!(cause = %e, "failed to render error response");
                let mut response = Response::new(ResponseBody::from(r#"{"code":0,"message":"Server Error"}"#));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
        }
    }
}

/// The source chain of a handler error, or the phase of a panic
fn trace(error: &HandleError) -> Vec<String> {
    match error {
        HandleError::Handler(e) => {
            let mut trace = vec![format!("{e:?}")];
            let mut source = e.source();
            while let Some(e) = source {
                trace.push(e.to_string());
                source = e.source();
            }
            trace
        }
        HandleError::Fatal(e) => vec![format!("panicked during {}", e.phase())],
    }
}

pub(crate) fn not_found() -> Result<Response, HandlerError> {
    json_response(StatusCode::NOT_FOUND, &ErrorBody::new(404, "Not found."))
}

pub(crate) fn method_not_allowed(allowed: &[Method]) -> Result<Response, HandlerError> {
    let mut response = json_response(StatusCode::METHOD_NOT_ALLOWED, &ErrorBody::new(405, "Method not allowed."))?;
    let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    response.headers_mut().insert(ALLOW, HeaderValue::from_str(&allow)?);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::{DefaultExceptionHandler, ExceptionHandler, FatalError, HandleError, HttpException};
    use crate::request::ExtractError;
    use crate::{HandlerError, Request};
    use http::{Method, StatusCode};
    use serde_json::{Value, json};

    fn request() -> Request {
        http::Request::builder().uri("/").body("").unwrap().into()
    }

    fn render(handler: &DefaultExceptionHandler, error: HandleError) -> (StatusCode, Value) {
        let response = handler.render(&request(), &error);
        let body = serde_json::from_slice(response.body().as_bytes()).unwrap();
        (response.status(), body)
    }

    #[derive(thiserror::Error, Debug)]
    #[error("query failed")]
    struct QueryError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_render_plain_error_as_500() {
        let handler = DefaultExceptionHandler::new(false);
        let error: HandlerError = "database is down".into();

        let (status, body) = render(&handler, error.into());

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "code": 0, "message": "database is down" }));
    }

    #[test]
    fn test_render_http_exception() {
        let handler = DefaultExceptionHandler::new(false);
        let error: HandlerError = Box::new(HttpException::new(StatusCode::FORBIDDEN, "Forbidden.").with_code(7));

        let (status, body) = render(&handler, error.into());

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({ "code": 7, "message": "Forbidden." }));
    }

    #[test]
    fn test_render_extract_error() {
        let handler = DefaultExceptionHandler::new(false);
        let error: HandlerError = Box::new(ExtractError::UnsupportedMediaType { expected: "application/json".into(), actual: None });

        let (status, body) = render(&handler, error.into());

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["code"], 415);
    }

    #[test]
    fn test_trace_only_in_debug() {
        let error = || -> HandleError {
            let error: HandlerError = Box::new(QueryError { source: std::io::Error::other("connection reset") });
            error.into()
        };

        let (_, body) = render(&DefaultExceptionHandler::new(false), error());
        assert!(body.get("trace").is_none());

        let (_, body) = render(&DefaultExceptionHandler::new(true), error());
        let trace = body["trace"].as_array().unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1], "connection reset");
    }

    #[test]
    fn test_render_fatal() {
        let handler = DefaultExceptionHandler::new(true);
        let error = HandleError::Fatal(FatalError::from_panic("request handling", Box::new("index out of bounds")));

        let (status, body) = render(&handler, error);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], 0);
        assert_eq!(body["message"], "panic during request handling: index out of bounds");
        assert_eq!(body["trace"], json!(["panicked during request handling"]));
    }

    #[test]
    fn test_not_found_and_method_not_allowed_bodies() {
        let response = super::not_found().unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_bytes(), br#"{"code":404,"message":"Not found."}"#);

        let response = super::method_not_allowed(&[Method::GET, Method::HEAD]).unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[http::header::ALLOW], "GET, HEAD");
        assert_eq!(response.body().as_bytes(), br#"{"code":405,"message":"Method not allowed."}"#);
    }
}
