//! Route table
//!
//! Maps request paths to configured routes and builds each route's handler.
//! Storage routes share one [`DiskStore`] so directory locks are global to
//! the process.

use crate::classify::Category;
use crate::config::{normalize_path, Config, RouteConfig, RouteMode};
use crate::predict::{PredictHandler, PredictorClient};
use crate::upload::forward::BackendForwarder;
use crate::upload::policy::StoreHandler;
use crate::upload::store::DiskStore;
use crate::upload::{UploadError, UploadHandler};
use hyper::Method;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Router errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Not Found")]
    NotFound(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Failed to build route '{path}': {reason}")]
    Build { path: String, reason: String },
}

/// What a matched route runs
#[derive(Clone)]
pub enum RouteAction {
    /// Multipart upload handled by a strategy
    Upload(Arc<dyn UploadHandler>),
    /// Listing of a category directory
    List { dir: PathBuf, category: Category },
}

/// A configured route ready to serve
#[derive(Clone)]
pub struct Route {
    pub config: RouteConfig,
    pub action: RouteAction,
}

impl Route {
    /// HTTP method the route accepts
    pub fn method(&self) -> Method {
        match self.config.mode {
            RouteMode::Store | RouteMode::Predict => Method::POST,
            RouteMode::List => Method::GET,
        }
    }
}

/// Path to route lookup
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    /// Build every configured route
    pub fn from_config(config: &Config) -> Result<Self, RouterError> {
        let build_err = |path: &str, e: UploadError| RouterError::Build {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let predictor = PredictorClient::new(config.predictor.clone())
            .map_err(|e| build_err("predictor", e))?;
        let forwarder = BackendForwarder::with_client(predictor.http_client());
        let store = Arc::new(DiskStore::new());

        let mut routes = HashMap::new();
        for route in &config.routes {
            let action = match route.mode {
                RouteMode::Store => RouteAction::Upload(Arc::new(
                    StoreHandler::new(config.storage.clone(), Arc::clone(&store), forwarder.clone())
                        .restrict_to(route.category)
                        .replace(route.replace),
                )),
                RouteMode::Predict => {
                    RouteAction::Upload(Arc::new(PredictHandler::new(predictor.clone())))
                }
                RouteMode::List => {
                    let category = route.category.ok_or_else(|| RouterError::Build {
                        path: route.path.clone(),
                        reason: "list route without category".into(),
                    })?;
                    let dir = config.storage.directory(category).ok_or_else(|| {
                        RouterError::Build {
                            path: route.path.clone(),
                            reason: format!("'{}' is not stored in a directory", category),
                        }
                    })?;
                    RouteAction::List {
                        dir: dir.to_path_buf(),
                        category,
                    }
                }
            };

            routes.insert(
                route.normalized_path().to_string(),
                Route {
                    config: route.clone(),
                    action,
                },
            );
        }

        Ok(Self { routes })
    }

    /// Add or replace one route
    pub fn with_route(mut self, config: RouteConfig, action: RouteAction) -> Self {
        self.routes.insert(
            config.normalized_path().to_string(),
            Route { config, action },
        );
        self
    }

    /// Resolve a request to its route, checking the method
    pub fn resolve(&self, method: &Method, path: &str) -> Result<&Route, RouterError> {
        let route = self
            .routes
            .get(normalize_path(path))
            .ok_or_else(|| RouterError::NotFound(path.to_string()))?;

        if route.method() != *method {
            return Err(RouterError::MethodNotAllowed(method.to_string()));
        }
        Ok(route)
    }

    /// Bounded label for metrics: the configured path or "unmatched"
    pub fn metric_label<'a>(&'a self, path: &'a str) -> &'a str {
        if path == "/health" {
            return path;
        }
        self.routes
            .get(normalize_path(path))
            .map(|route| route.config.path.as_str())
            .unwrap_or("unmatched")
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Split a raw query string into key/value pairs
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&').filter(|p| !p.is_empty()) {
            let mut kv = pair.splitn(2, '=');
            if let Some(key) = kv.next() {
                let value = kv.next().unwrap_or("");
                params.insert(key.to_string(), value.to_string());
            }
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn table() -> RouteTable {
        let config = Config::with_storage_root("127.0.0.1:0", Path::new("/tmp/kagami-router"));
        RouteTable::from_config(&config).unwrap()
    }

    #[test]
    fn test_builds_default_routes() {
        assert_eq!(table().len(), 6);
    }

    #[test]
    fn test_resolve_upload_route() {
        let table = table();
        let route = table.resolve(&Method::POST, "/api/uploadAudio").unwrap();
        assert!(route.config.replace);
        assert!(matches!(route.action, RouteAction::Upload(_)));
    }

    #[test]
    fn test_resolve_ignores_trailing_slash() {
        let table = table();
        assert!(table.resolve(&Method::POST, "/api/upload/").is_ok());
    }

    #[test]
    fn test_resolve_list_route() {
        let table = table();
        let route = table.resolve(&Method::GET, "/api/audio-files").unwrap();
        match &route.action {
            RouteAction::List { dir, category } => {
                assert_eq!(dir, Path::new("/tmp/kagami-router/songs"));
                assert_eq!(*category, Category::Audio);
            }
            RouteAction::Upload(_) => panic!("expected list action"),
        }
    }

    #[test]
    fn test_wrong_method_not_allowed() {
        let table = table();
        let result = table.resolve(&Method::GET, "/api/upload");
        assert!(matches!(result, Err(RouterError::MethodNotAllowed(_))));
    }

    #[test]
    fn test_unknown_path_not_found() {
        let table = table();
        let result = table.resolve(&Method::POST, "/api/unknown");
        assert!(matches!(result, Err(RouterError::NotFound(_))));
    }

    #[test]
    fn test_with_route_adds_handler() {
        let extra = RouteConfig {
            path: "/api/listSongs/".into(),
            mode: RouteMode::List,
            fields: Vec::new(),
            batch: false,
            category: Some(Category::Audio),
            replace: false,
        };
        let table = table().with_route(
            extra,
            RouteAction::List {
                dir: PathBuf::from("/tmp/kagami-router/songs"),
                category: Category::Audio,
            },
        );

        assert_eq!(table.len(), 7);
        assert!(table.resolve(&Method::GET, "/api/listSongs").is_ok());
    }

    #[test]
    fn test_metric_label_is_bounded() {
        let table = table();
        assert_eq!(table.metric_label("/api/upload/"), "/api/upload");
        assert_eq!(table.metric_label("/health"), "/health");
        assert_eq!(table.metric_label("/random/12345"), "unmatched");
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query(Some("page=2&limit=10&flag"));
        assert_eq!(params.get("page").map(String::as_str), Some("2"));
        assert_eq!(params.get("limit").map(String::as_str), Some("10"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert!(parse_query(None).is_empty());
    }
}
