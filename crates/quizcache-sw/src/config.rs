//! Worker configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use quizcache_common::{QuizCacheError, RetryConfig};
use quizcache_net::LoaderConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Files the quiz shell needs to run offline.
pub const DEFAULT_STATIC_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/styles/style.css",
    "/js/main.js",
    "/js/admin.js",
    "/js/data/subjects.js",
    "/manifest.json",
    // Science
    "/js/data/science/physicsQuestions.js",
    "/js/data/science/chemistryQuestions.js",
    "/js/data/science/biologyQuestions.js",
    "/js/data/science/mathQuestions.js",
    // Arts
    "/js/data/arts/historyQuestions.js",
    "/js/data/arts/geographyQuestions.js",
    "/js/data/arts/scienceQuestions.js",
    "/js/data/arts/civicsQuestions.js",
    // General
    "/js/data/general/banglaQuestions.js",
    "/js/data/general/agricultureQuestions.js",
    "/js/data/general/ictQuestions.js",
    "/js/data/general/islamQuestions.js",
];

const DEFAULT_OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="bn">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>অফলাইন - SSCQuizMaster</title>
</head>
<body>
<h1>ইন্টারনেট সংযোগ নেই</h1>
<p>আপনার ইন্টারনেট সংযোগ চেক করুন এবং পৃষ্ঠাটি রিফ্রেশ করুন।</p>
<p>You are offline. Only cached content is available.</p>
</body>
</html>
"#;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid asset path '{asset}': {source}")]
    InvalidAsset {
        asset: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for QuizCacheError {
    fn from(err: ConfigError) -> Self {
        QuizCacheError::config_with_source("worker config rejected", err)
    }
}

/// Identifies one deployed worker version and names its cache generations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Version tag, e.g. "v2".
    pub tag: String,
    /// Optional application prefix for generation names.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl VersionDescriptor {
    /// Create a descriptor without a prefix.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            prefix: None,
        }
    }

    /// Set the generation name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn name(&self, kind: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}-{}-{}", prefix, kind, self.tag),
            None => format!("{}-{}", kind, self.tag),
        }
    }

    /// Name of this version's static (install-time) generation.
    pub fn static_name(&self) -> String {
        self.name("static")
    }

    /// Name of this version's dynamic (runtime) generation.
    pub fn dynamic_name(&self) -> String {
        self.name("dynamic")
    }

    /// Whether a generation name belongs to this version.
    pub fn owns(&self, generation: &str) -> bool {
        generation == self.static_name() || generation == self.dynamic_name()
    }
}

impl std::fmt::Display for VersionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}@{}", prefix, self.tag),
            None => f.write_str(&self.tag),
        }
    }
}

/// Bodies used for synthesized offline responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// HTML page returned for documents when the root document is not cached.
    pub offline_page_html: String,
    /// Plain-text body for everything else.
    pub offline_text: String,
    /// Message embedded in the JSON offline body.
    pub offline_json_message: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            offline_page_html: DEFAULT_OFFLINE_PAGE.to_string(),
            offline_text: "You are offline. Please check your internet connection.".to_string(),
            offline_json_message: "Network unavailable; no cached copy of this resource."
                .to_string(),
        }
    }
}

/// Age-based expiry of dynamic entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Run the background sweeper.
    pub enabled: bool,
    /// Entries older than this are purged.
    pub max_age_secs: u64,
    /// Time between sweeps.
    pub sweep_interval_secs: u64,
}

impl ExpiryConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: 7 * 24 * 60 * 60, // 7 days
            sweep_interval_secs: 60 * 60,   // hourly
        }
    }
}

/// Storage limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Maximum total body bytes across all generations. `None` is unlimited.
    pub max_bytes: Option<u64>,
}

/// Notification presentation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "SSCQuizMaster".to_string(),
            default_body: "SSCQuizMaster থেকে নতুন নোটিফিকেশন".to_string(),
            icon: "/icon-192x192.png".to_string(),
            badge: "/icon-192x192.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let loader = LoaderConfig::default();
        Self {
            user_agent: None,
            timeout_secs: loader.timeout.as_secs(),
            max_redirects: loader.max_redirects,
        }
    }
}

impl HttpConfig {
    /// Build the network loader configuration.
    pub fn loader_config(&self) -> LoaderConfig {
        let defaults = LoaderConfig::default();
        LoaderConfig {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            ..defaults
        }
    }
}

/// Full configuration for one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Application origin; root-relative paths resolve against it.
    pub origin: Url,

    /// Version whose generations this worker owns.
    pub version: VersionDescriptor,

    /// Assets fetched at install time, in order.
    pub static_assets: Vec<String>,

    /// Document served for offline navigations.
    pub root_document: String,

    /// Synthetic key for payloads pushed by the page.
    pub quiz_data_key: String,

    /// Activate right after a successful install.
    pub skip_waiting_on_install: bool,

    /// Retry policy for install-time fetches.
    pub install_retry: RetryConfig,

    pub fallback: FallbackConfig,
    pub expiry: ExpiryConfig,
    pub quota: QuotaConfig,
    pub notifications: NotificationConfig,
    pub http: HttpConfig,

    /// Where the cache snapshot lives between runs.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static URL parses"),
            version: VersionDescriptor::new("v2"),
            static_assets: DEFAULT_STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
            root_document: "/index.html".to_string(),
            quiz_data_key: "/api/quiz-data".to_string(),
            skip_waiting_on_install: true,
            install_retry: RetryConfig::none(),
            fallback: FallbackConfig::default(),
            expiry: ExpiryConfig::default(),
            quota: QuotaConfig::default(),
            notifications: NotificationConfig::default(),
            http: HttpConfig::default(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl WorkerConfig {
    /// Default config for an origin and version tag.
    pub fn new(origin: Url, version: VersionDescriptor) -> Self {
        Self {
            origin,
            version,
            ..Default::default()
        }
    }

    /// Replace the static asset list.
    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        let tag = self.version.tag.trim();
        if tag.is_empty() || tag.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "version tag '{}' must be non-empty without whitespace",
                self.version.tag
            )));
        }
        if self.static_assets.is_empty() {
            return Err(ConfigError::Invalid("static asset list is empty".into()));
        }
        for asset in self.static_assets.iter().chain([&self.root_document, &self.quiz_data_key]) {
            let url = self.resolve(asset)?;
            if url.origin() != self.origin.origin() {
                return Err(ConfigError::Invalid(format!(
                    "'{asset}' resolves outside the origin"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin
            .join(path)
            .map_err(|source| ConfigError::InvalidAsset {
                asset: path.to_string(),
                source,
            })
    }

    /// Resolved static asset URLs, in list order.
    pub fn static_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.static_assets.iter().map(|a| self.resolve(a)).collect()
    }
}

/// `<cache dir>/quizcache/cache.json`, when the platform has a cache dir.
pub fn default_snapshot_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("quizcache").join("cache.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_names() {
        let v2 = VersionDescriptor::new("v2");
        assert_eq!(v2.static_name(), "static-v2");
        assert_eq!(v2.dynamic_name(), "dynamic-v2");
        assert!(v2.owns("static-v2"));
        assert!(!v2.owns("static-v1"));

        let prefixed = VersionDescriptor::new("v3").with_prefix("ssc-quizmaster");
        assert_eq!(prefixed.static_name(), "ssc-quizmaster-static-v3");
        assert_eq!(prefixed.to_string(), "ssc-quizmaster@v3");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.static_assets.len(), DEFAULT_STATIC_ASSETS.len());
        assert_eq!(config.expiry.max_age(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_from_partial_json() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "origin": "https://quiz.example/",
                "version": { "tag": "v7" },
                "static_assets": ["/", "/index.html"],
                "quota": { "max_bytes": 1024 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.version.static_name(), "static-v7");
        assert_eq!(config.static_assets.len(), 2);
        assert_eq!(config.quota.max_bytes, Some(1024));
        assert_eq!(config.root_document, "/index.html");
        assert!(config.skip_waiting_on_install);
    }

    #[test]
    fn test_rejects_empty_assets() {
        let err = WorkerConfig::default().with_assets(Vec::<String>::new()).validate();
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_cross_origin_asset() {
        let config = WorkerConfig::default().with_assets(["/", "https://cdn.example/x.js"]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_tag() {
        let mut config = WorkerConfig::default();
        config.version = VersionDescriptor::new("v 2");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            WorkerConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = WorkerConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_resolve_and_static_urls() {
        let config = WorkerConfig::new(
            Url::parse("https://quiz.example/").unwrap(),
            VersionDescriptor::new("v2"),
        )
        .with_assets(["/", "/js/main.js"]);

        let urls = config.static_urls().unwrap();
        assert_eq!(urls[1].as_str(), "https://quiz.example/js/main.js");
    }

    #[test]
    fn test_http_loader_config() {
        let http = HttpConfig {
            user_agent: Some("QuizShell/2".into()),
            timeout_secs: 5,
            max_redirects: 0,
        };
        let loader = http.loader_config();
        assert_eq!(loader.user_agent, "QuizShell/2");
        assert_eq!(loader.timeout, Duration::from_secs(5));
        assert_eq!(loader.max_redirects, 0);
    }
}
