//! Response handling module that converts handler results into HTTP responses.
//!
//! This module provides the [`Responder`] trait which defines how different types
//! can be converted into HTTP responses. It includes implementations for common types
//! like Result, Option, String, json values etc.
//!
//! A responder may fail: an `Err` returned by a handler is not turned into a response here,
//! it travels up to the application's exception handler.

use crate::body::ResponseBody;
use crate::{HandlerError, RequestContext, Response};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use serde::Serialize;

/// A trait for types that can be converted into HTTP responses.
///
/// Types implementing this trait can be returned directly from request handlers
/// and will be automatically converted into HTTP responses.
pub trait Responder {
    /// # Errors
    /// Returns the handler error carried by `self`, or a serialization error.
    fn response_to(self, req: &RequestContext) -> Result<Response, HandlerError>;
}

/// Serializes `T` as the json body of the response
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

/// Builds a json response with the given status.
///
/// # Errors
/// Returns an error when `value` can not be serialized.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<Response, HandlerError> {
    let body = serde_json::to_vec(value)?;
    let response = http::Response::builder()
        .status(status)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(ResponseBody::from(body))?;
    Ok(response)
}

fn text_response(body: ResponseBody) -> Response {
    let mut response = http::Response::new(body);
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Handlers may return `Result` directly, the `Err` side is handed to the exception handler.
impl<T: Responder, E: Into<HandlerError>> Responder for Result<T, E> {
    fn response_to(self, req: &RequestContext) -> Result<Response, HandlerError> {
        match self {
            Ok(t) => t.response_to(req),
            Err(e) => Err(e.into()),
        }
    }
}

/// `None` answers with the same body as an unmatched route.
impl<T: Responder> Responder for Option<T> {
    fn response_to(self, req: &RequestContext) -> Result<Response, HandlerError> {
        match self {
            Some(t) => t.response_to(req),
            None => crate::exception::not_found(),
        }
    }
}

/// Pre-built responses pass through, only the body is converted.
impl<B> Responder for http::Response<B>
where
    B: Into<ResponseBody>,
{
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        Ok(self.map(Into::into))
    }
}

/// Overrides the status code of the inner responder.
impl<T: Responder> Responder for (StatusCode, T) {
    fn response_to(self, req: &RequestContext) -> Result<Response, HandlerError> {
        let (status, responder) = self;
        let mut response = responder.response_to(req)?;
        *response.status_mut() = status;
        Ok(response)
    }
}

impl<T: Responder> Responder for Box<T> {
    fn response_to(self, req: &RequestContext) -> Result<Response, HandlerError> {
        (*self).response_to(req)
    }
}

impl Responder for () {
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        Ok(http::Response::new(ResponseBody::empty()))
    }
}

impl Responder for &'static str {
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        Ok(text_response(ResponseBody::from(self)))
    }
}

impl Responder for String {
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        Ok(text_response(ResponseBody::from(self)))
    }
}

impl Responder for Bytes {
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        let mut response = http::Response::new(ResponseBody::from(self));
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        Ok(response)
    }
}

impl Responder for serde_json::Value {
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        json_response(StatusCode::OK, &self)
    }
}

impl<T: Serialize> Responder for Json<T> {
    fn response_to(self, _req: &RequestContext) -> Result<Response, HandlerError> {
        json_response(StatusCode::OK, &self.0)
    }
}
