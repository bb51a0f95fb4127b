//! On-disk cache of the compiled route table.
//!
//! The file records the fingerprint of the route set it was compiled from. Loading compares it
//! with the fingerprint of the live routes, so a cache written for another route set is never
//! served: it is reported as [`CacheError::Stale`] and the caller recompiles.

use crate::router::{CompiledEntry, CompiledRoutes, RouteError};
use http::Method;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("route cache does not exist")]
    Missing,

    #[error("route cache was written for another route set, expected fingerprint {expected} but found {found}")]
    Stale { expected: String, found: String },

    #[error("unsupported route cache format {found}, expected {FORMAT_VERSION}")]
    UnsupportedFormat { found: u32 },

    #[error("invalid route cache entry: {reason}")]
    InvalidEntry { reason: String },

    #[error("corrupt route cache: {source}")]
    Corrupt {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid route cache table: {source}")]
    Route {
        #[from]
        source: RouteError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl CacheError {
    pub fn invalid_entry<S: ToString>(reason: S) -> Self {
        Self::InvalidEntry { reason: reason.to_string() }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    format: u32,
    fingerprint: String,
    methods: Vec<CachedMethod>,
}

#[derive(Serialize, Deserialize)]
struct CachedMethod {
    method: String,
    entries: Vec<CompiledEntry>,
}

#[derive(Debug, Clone)]
pub struct RouteCache {
    path: PathBuf,
}

impl RouteCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the compiled table written for the route set identified by `fingerprint`.
    ///
    /// # Errors
    /// [`CacheError::Missing`] when there is no cache file, [`CacheError::Stale`] when it belongs
    /// to another route set, and the other variants when it can not be read back.
    pub fn load(&self, fingerprint: &str, route_count: usize) -> Result<CompiledRoutes, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::Missing),
            Err(e) => return Err(e.into()),
        };

        let file: CacheFile = serde_json::from_slice(&bytes)?;
        if file.format != FORMAT_VERSION {
            return Err(CacheError::UnsupportedFormat { found: file.format });
        }
        if file.fingerprint != fingerprint {
            return Err(CacheError::Stale { expected: fingerprint.to_string(), found: file.fingerprint });
        }

        let methods = file
            .methods
            .into_iter()
            .map(|cached| {
                let method = Method::from_bytes(cached.method.as_bytes())
                    .map_err(|e| CacheError::invalid_entry(format!("method '{}': {e}", cached.method)))?;
                Ok((method, cached.entries))
            })
            .collect::<Result<Vec<_>, CacheError>>()?;

        let compiled = CompiledRoutes::from_entries(methods)?;
        if let Some(route) = compiled.max_route()
            && route.index() >= route_count
        {
            return Err(CacheError::invalid_entry(format!("route {} of {route_count}", route.index())));
        }
        Ok(compiled)
    }

    /// Writes `routes` together with the fingerprint of the route set they were compiled from.
    ///
    /// The file is written next to its final location and renamed into place, a concurrent
    /// reader sees either the old or the new table.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] when the file can not be written.
    pub fn store(&self, routes: &CompiledRoutes, fingerprint: &str) -> Result<(), CacheError> {
        let file = CacheFile {
            format: FORMAT_VERSION,
            fingerprint: fingerprint.to_string(),
            methods: routes
                .methods()
                .map(|routes| CachedMethod { method: routes.method().to_string(), entries: routes.entries().to_vec() })
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), "route cache written");
        Ok(())
    }

    /// Removes the cache file, returns whether there was one.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] when an existing file can not be removed.
    pub fn invalidate(&self) -> Result<bool, CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "route cache invalidated");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheError, RouteCache};
    use crate::handler::{RequestHandler, handler_fn};
    use crate::router::{Outcome, RouteTable};
    use http::Method;
    use std::fs;

    fn noop() -> impl RequestHandler + 'static {
        handler_fn(|_req| ())
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table.add_route([Method::GET], "/", noop()).unwrap();
        table.add_route([Method::GET, Method::HEAD], "/users/{id}", noop()).unwrap();
        table.add_route([Method::POST], "/users", noop()).unwrap();
        table
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RouteCache::new(dir.path().join("cache").join("routes.json"));
        let table = table();
        let compiled = table.compile().unwrap();

        cache.store(&compiled, &table.fingerprint()).unwrap();
        let loaded = cache.load(&table.fingerprint(), table.len()).unwrap();

        let entries = |routes: &crate::router::CompiledRoutes| {
            routes.methods().map(|m| (m.method().clone(), m.entries().to_vec())).collect::<Vec<_>>()
        };
        assert_eq!(entries(&loaded), entries(&compiled));
    }

    #[test]
    fn test_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RouteCache::new(dir.path().join("routes.json"));

        assert!(matches!(cache.load("abc", 0), Err(CacheError::Missing)));
        assert!(!cache.invalidate().unwrap());
    }

    #[test]
    fn test_stale_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RouteCache::new(dir.path().join("routes.json"));
        let table = table();
        cache.store(&table.compile().unwrap(), "another-route-set").unwrap();

        let err = cache.load(&table.fingerprint(), table.len()).unwrap_err();
        assert!(matches!(err, CacheError::Stale { found, .. } if found == "another-route-set"));
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        fs::write(&path, "<?php return [];").unwrap();

        let err = RouteCache::new(&path).load("abc", 0).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[test]
    fn test_out_of_range_route_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RouteCache::new(dir.path().join("routes.json"));
        let table = table();
        cache.store(&table.compile().unwrap(), &table.fingerprint()).unwrap();

        let err = cache.load(&table.fingerprint(), 1).unwrap_err();
        assert!(matches!(err, CacheError::InvalidEntry { .. }));
    }

    #[test]
    fn test_dispatcher_rebuilds_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RouteCache::new(dir.path().join("routes.json"));

        let mut old = RouteTable::new();
        old.add_route([Method::GET], "/old", noop()).unwrap();
        old.into_dispatcher(Some(&cache)).unwrap();

        let new = table();
        let fingerprint = new.fingerprint();
        let dispatcher = new.into_dispatcher(Some(&cache)).unwrap();

        assert!(matches!(dispatcher.dispatch(&Method::GET, "/users/5"), Outcome::Found(_)));
        assert_eq!(dispatcher.dispatch(&Method::GET, "/old"), Outcome::NotFound);
        // the cache now holds the new route set
        assert!(cache.load(&fingerprint, 3).is_ok());
        assert!(cache.invalidate().unwrap());
    }
}
