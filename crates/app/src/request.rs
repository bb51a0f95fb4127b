//! Request handling module that provides access to HTTP request information and path parameters.
//!
//! This module contains the core types for working with HTTP requests in the application:
//! - `Request`: the owned request travelling through the middleware pipeline
//! - `RequestContext`: what a route handler sees, the request plus path parameters and services
//! - `PathParams`: named URL segments extracted by the dispatcher, in declaration order

use crate::services::ServiceContainer;
use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, StatusCode, Uri, Version};
use mime::Mime;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// An HTTP request with a fully buffered body.
///
/// The method, uri, headers and body are fixed once the request enters the application.
/// Middleware may only attach annotations through [`Request::extensions_mut`].
#[derive(Debug)]
pub struct Request {
    head: Parts,
    body: Bytes,
}

impl Request {
    pub fn new(head: Parts, body: Bytes) -> Self {
        Self { head, body }
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// Returns the path part of the request URI, this is what routes are matched against
    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// Returns the raw query string, if any
    pub fn query_string(&self) -> Option<&str> {
        self.head.uri.query()
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Returns the parsed `Content-Type` header, `None` when absent or malformed
    pub fn content_type(&self) -> Option<Mime> {
        self.head.headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?.parse().ok()
    }

    /// Returns the request body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Annotations attached by middleware
    pub fn extensions(&self) -> &Extensions {
        &self.head.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.head.extensions
    }
}

impl<B: Into<Bytes>> From<http::Request<B>> for Request {
    fn from(request: http::Request<B>) -> Self {
        let (head, body) = request.into_parts();
        Self::new(head, body.into())
    }
}

/// Represents the context of a dispatched request: the request itself, the path parameters
/// bound by the matched route and the services registered at boot.
///
/// The lifetime parameters ensure that the request context does not outlive the application
/// or the request data it references.
#[derive(Debug)]
pub struct RequestContext<'server: 'req, 'req> {
    request: &'req Request,
    path_params: &'req PathParams<'server, 'req>,
    services: &'server ServiceContainer,
}

impl<'server, 'req> RequestContext<'server, 'req> {
    pub fn new(
        request: &'req Request,
        path_params: &'req PathParams<'server, 'req>,
        services: &'server ServiceContainer,
    ) -> Self {
        Self { request, path_params, services }
    }

    pub fn request(&self) -> &'req Request {
        self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// Returns a reference to the path parameters extracted from the request URL
    pub fn path_params(&self) -> &PathParams<'server, 'req> {
        self.path_params
    }

    /// Shortcut for `path_params().get(name)`
    pub fn param(&self, name: &str) -> Option<&'req str> {
        self.path_params.get(name)
    }

    pub fn services(&self) -> &'server ServiceContainer {
        self.services
    }

    /// Looks up a service bound at boot by its type
    pub fn service<T: Send + Sync + 'static>(&self) -> Option<&'server T> {
        self.services.get::<T>()
    }

    /// Deserializes the url query string, a missing query string is treated as empty.
    ///
    /// # Errors
    /// Returns [`ExtractError::Query`] when the query string does not fit `T`.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, ExtractError> {
        let query = self.request.query_string().unwrap_or_default();
        serde_qs::from_str::<T>(query).map_err(ExtractError::from)
    }

    /// Deserializes an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    /// Returns [`ExtractError::UnsupportedMediaType`] for any other content type, and
    /// [`ExtractError::Form`] when the body does not fit `T`.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, ExtractError> {
        self.expect_content_type(&mime::APPLICATION_WWW_FORM_URLENCODED)?;
        serde_urlencoded::from_bytes::<T>(self.request.body()).map_err(ExtractError::from)
    }

    /// Deserializes an `application/json` body.
    ///
    /// # Errors
    /// Returns [`ExtractError::UnsupportedMediaType`] for any other content type, and
    /// [`ExtractError::Json`] when the body does not fit `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ExtractError> {
        self.expect_content_type(&mime::APPLICATION_JSON)?;
        serde_json::from_slice::<T>(self.request.body()).map_err(ExtractError::from)
    }

    fn expect_content_type(&self, expected: &Mime) -> Result<(), ExtractError> {
        match self.request.content_type() {
            Some(actual) if actual.essence_str() == expected.essence_str() => Ok(()),
            actual => Err(ExtractError::unsupported_media_type(expected, actual)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported media type, expected '{expected}' but got '{}'", .actual.as_deref().unwrap_or("none"))]
    UnsupportedMediaType { expected: String, actual: Option<String> },

    #[error("invalid query string: {source}")]
    Query {
        #[from]
        source: serde_qs::Error,
    },

    #[error("invalid form body: {source}")]
    Form {
        #[from]
        source: serde_urlencoded::de::Error,
    },

    #[error("invalid json body: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl ExtractError {
    pub fn unsupported_media_type(expected: &Mime, actual: Option<Mime>) -> Self {
        Self::UnsupportedMediaType { expected: expected.to_string(), actual: actual.map(|m| m.to_string()) }
    }

    /// The status code this error is rendered with
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Query { .. } | Self::Form { .. } | Self::Json { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

/// Represents path parameters extracted from the URL path of an HTTP request.
///
/// Parameters keep the order in which their placeholders are declared in the route pattern:
/// for `/users/{user}/posts/{post}` the first entry is always `user`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams<'server, 'req> {
    entries: Vec<(&'server str, &'req str)>,
}

impl<'server, 'req> PathParams<'server, 'req> {
    #[inline]
    pub(crate) fn new(entries: Vec<(&'server str, &'req str)>) -> Self {
        Self { entries }
    }

    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Gets the value of a path parameter by its name
    pub fn get(&self, key: impl AsRef<str>) -> Option<&'req str> {
        let key = key.as_ref();
        self.entries.iter().find(|(name, _)| *name == key).map(|(_, value)| *value)
    }

    /// Iterates `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&'server str, &'req str)> + '_ {
        self.entries.iter().copied()
    }
}
