use serde::Deserialize;
use std::path::PathBuf;

/// Application settings.
///
/// Deserializable so that an external loader (a file, the environment, ...) can produce it,
/// every field falls back to its default when missing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    /// Include error traces in rendered error responses. Never enable in production.
    pub debug: bool,
    /// Persist the compiled route table, `None` compiles it on every boot
    pub router_cache: Option<RouterCacheConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterCacheConfig {
    pub path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { name: "micro-app".into(), version: "1.0.0".into(), debug: false, router_cache: None }
    }
}

impl AppConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_router_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.router_cache = Some(RouterCacheConfig { path: path.into() });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.version, "1.0.0");
        assert!(!config.debug);
        assert!(config.router_cache.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AppConfig =
            serde_json::from_str(r#"{"debug": true, "router_cache": {"path": "/tmp/routes.json"}}"#).unwrap();

        assert!(config.debug);
        assert_eq!(config.name, "micro-app");
        assert_eq!(config.router_cache.unwrap().path, Path::new("/tmp/routes.json"));
    }

    #[test]
    fn test_builder_setters() {
        let config = AppConfig::default().with_name("shop").with_version("2.1.0").with_debug(true);

        assert_eq!(config.name, "shop");
        assert_eq!(config.version, "2.1.0");
        assert!(config.debug);
    }
}
