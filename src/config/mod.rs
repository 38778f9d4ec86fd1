//! Configuration module for Kagami Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. The destination policy
//! (which category goes to which directory or backend endpoint) and the route
//! table both live here so that every endpoint's behaviour is configuration,
//! not code.

use crate::classify::Category;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // Keep the placeholder so the validation error points at it
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

lazy_static::lazy_static! {
    static ref ENV_VAR_PATTERN: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("environment variable pattern is valid");
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Build a configuration with default routes whose directories live under `root`
    pub fn with_storage_root(address: &str, root: &Path) -> Self {
        Self {
            server: ServerConfig {
                address: address.to_string(),
                max_body_bytes: default_max_body_bytes(),
            },
            storage: StorageConfig::under(root),
            predictor: PredictorConfig::default(),
            routes: default_routes(),
            metrics: MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid server address '{}': {}",
                    self.server.address, e
                ))
            })?;

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_body_bytes must be greater than zero".into(),
            ));
        }

        for category in Category::ALL {
            match self.storage.destination(category) {
                Destination::Directory { path } => {
                    if path.as_os_str().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "Storage directory for '{}' is empty",
                            category
                        )));
                    }
                }
                Destination::Forward { url, field } => {
                    if !is_valid_http_url(url) {
                        return Err(ConfigError::ValidationError(format!(
                            "Invalid forward URL for '{}': must start with http:// or https://",
                            category
                        )));
                    }
                    if field.trim().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "Forward field name for '{}' cannot be empty",
                            category
                        )));
                    }
                }
            }
        }

        if !is_valid_http_url(&self.predictor.base_url) {
            return Err(ConfigError::ValidationError(
                "Invalid predictor base_url: must start with http:// or https://".into(),
            ));
        }

        if self.predictor.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "predictor.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.routes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one route must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            route.validate(&self.storage)?;
            if !seen.insert(route.normalized_path()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate route path '{}'",
                    route.path
                )));
            }
        }

        if self.metrics.enabled {
            self.metrics.address.parse::<SocketAddr>().map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid metrics address '{}': {}",
                    self.metrics.address, e
                ))
            })?;
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Upper bound on a request body, checked before multipart parsing
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

fn default_max_body_bytes() -> u64 {
    104857600 // 100MB
}

// ============================================================================
// Destination Policy
// ============================================================================

/// Where files of one category end up in storage mode.
///
/// ```yaml
/// image:  { type: directory, path: "public/images" }
/// mapper_text: { type: forward, url: "http://localhost:5000/upload/mapper", field: "file" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// Persist under a flat local directory
    Directory { path: PathBuf },
    /// Send the whole group to a backend as one multipart request
    Forward {
        #[serde(deserialize_with = "deserialize_with_env")]
        url: String,
        #[serde(default = "default_forward_field")]
        field: String,
    },
}

fn default_forward_field() -> String {
    "file".to_string()
}

/// Custom deserializer for strings with environment variable expansion.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

/// Category to destination mapping used by storage-mode routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_image_destination")]
    pub image: Destination,
    #[serde(default = "default_audio_destination")]
    pub audio: Destination,
    #[serde(default = "default_mapper_destination")]
    pub mapper_text: Destination,
    #[serde(default = "default_unclassified_destination")]
    pub unclassified: Destination,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image: default_image_destination(),
            audio: default_audio_destination(),
            mapper_text: default_mapper_destination(),
            unclassified: default_unclassified_destination(),
        }
    }
}

impl StorageConfig {
    /// Default directory layout rooted at `root` instead of the working directory
    pub fn under(root: &Path) -> Self {
        let dir = |name: &str| Destination::Directory {
            path: root.join(name),
        };
        Self {
            image: dir("images"),
            audio: dir("songs"),
            mapper_text: dir("mapper"),
            unclassified: dir("uploads"),
        }
    }

    /// Resolve a category to its destination
    pub fn destination(&self, category: Category) -> &Destination {
        match category {
            Category::Image => &self.image,
            Category::Audio => &self.audio,
            Category::MapperText => &self.mapper_text,
            Category::Unclassified => &self.unclassified,
        }
    }

    /// Directory of a category, if it is stored locally
    pub fn directory(&self, category: Category) -> Option<&Path> {
        match self.destination(category) {
            Destination::Directory { path } => Some(path.as_path()),
            Destination::Forward { .. } => None,
        }
    }
}

fn default_image_destination() -> Destination {
    Destination::Directory {
        path: PathBuf::from("public/images"),
    }
}

fn default_audio_destination() -> Destination {
    Destination::Directory {
        path: PathBuf::from("public/songs"),
    }
}

fn default_mapper_destination() -> Destination {
    Destination::Directory {
        path: PathBuf::from("public/mapper"),
    }
}

fn default_unclassified_destination() -> Destination {
    Destination::Directory {
        path: PathBuf::from("public/uploads"),
    }
}

// ============================================================================
// Predictor
// ============================================================================

/// Remote prediction service used by dispatch-mode routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Base URL. Supports ${VAR} and ${VAR:-default} expansion.
    #[serde(
        default = "default_predictor_base_url",
        deserialize_with = "deserialize_with_env"
    )]
    pub base_url: String,
    #[serde(default = "default_image_path")]
    pub image_path: String,
    #[serde(default = "default_audio_path")]
    pub audio_path: String,
    /// Outbound request timeout. Default: 30
    #[serde(default = "default_predictor_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            base_url: default_predictor_base_url(),
            image_path: default_image_path(),
            audio_path: default_audio_path(),
            timeout_seconds: default_predictor_timeout(),
        }
    }
}

impl PredictorConfig {
    /// Full endpoint URL for a category, `None` for categories the predictor does not accept
    pub fn endpoint(&self, category: Category) -> Option<String> {
        let path = match category {
            Category::Image => &self.image_path,
            Category::Audio => &self.audio_path,
            Category::MapperText | Category::Unclassified => return None,
        };
        Some(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

fn default_predictor_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_image_path() -> String {
    "/predict/image".to_string()
}

fn default_audio_path() -> String {
    "/predict/audio".to_string()
}

fn default_predictor_timeout() -> u64 {
    30
}

// ============================================================================
// Routes
// ============================================================================

/// What a route does with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Classify by extension and send to the category destination
    Store,
    /// Classify by declared type and proxy to the predictor
    Predict,
    /// Paginated listing of a category directory
    List,
}

/// One HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub mode: RouteMode,
    /// Multipart field names carrying files
    #[serde(default)]
    pub fields: Vec<String>,
    /// Whether more than one file is accepted
    #[serde(default)]
    pub batch: bool,
    /// Restrict accepted files to one category (store) or the listed category (list)
    #[serde(default)]
    pub category: Option<Category>,
    /// New batch wholly supersedes the previous contents of the directory
    #[serde(default)]
    pub replace: bool,
}

impl RouteConfig {
    /// Path without a trailing slash, used for matching
    pub fn normalized_path(&self) -> &str {
        normalize_path(&self.path)
    }

    fn validate(&self, storage: &StorageConfig) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "Route path '{}' must start with /",
                self.path
            )));
        }

        if self.normalized_path() == "/health" {
            return Err(ConfigError::ValidationError(
                "Route path '/health' is reserved".into(),
            ));
        }

        match self.mode {
            RouteMode::Store | RouteMode::Predict => {
                if self.fields.iter().all(|f| f.trim().is_empty()) {
                    return Err(ConfigError::ValidationError(format!(
                        "Route '{}' must name at least one multipart field",
                        self.path
                    )));
                }
            }
            RouteMode::List => {
                let category = self.category.ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "List route '{}' must name a category",
                        self.path
                    ))
                })?;
                if storage.directory(category).is_none() {
                    return Err(ConfigError::ValidationError(format!(
                        "List route '{}' needs a directory destination for '{}'",
                        self.path, category
                    )));
                }
            }
        }

        if self.mode == RouteMode::Predict && (self.category.is_some() || self.batch) {
            return Err(ConfigError::ValidationError(format!(
                "Predict route '{}' takes a single file and no category",
                self.path
            )));
        }

        if self.replace && self.mode != RouteMode::Store {
            return Err(ConfigError::ValidationError(format!(
                "Route '{}': replace is only valid for store routes",
                self.path
            )));
        }

        Ok(())
    }
}

/// Strip a trailing slash, keeping "/" intact
pub fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// The six endpoints the browser layer talks to
pub fn default_routes() -> Vec<RouteConfig> {
    let route = |path: &str, mode, fields: &[&str], batch, category, replace| RouteConfig {
        path: path.to_string(),
        mode,
        fields: fields.iter().map(|f| f.to_string()).collect(),
        batch,
        category,
        replace,
    };

    vec![
        route("/api/upload", RouteMode::Store, &["file", "files"], true, None, false),
        route(
            "/api/uploadAudio",
            RouteMode::Store,
            &["files"],
            true,
            Some(Category::Audio),
            true,
        ),
        route(
            "/api/uploadImage",
            RouteMode::Store,
            &["files"],
            true,
            Some(Category::Image),
            false,
        ),
        route(
            "/api/uploadMapper",
            RouteMode::Store,
            &["file"],
            false,
            Some(Category::MapperText),
            false,
        ),
        route("/api/predict", RouteMode::Predict, &["file"], false, None, false),
        route(
            "/api/audio-files",
            RouteMode::List,
            &[],
            false,
            Some(Category::Audio),
            false,
        ),
    ]
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}
