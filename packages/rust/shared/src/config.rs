//! Application configuration for reviewcrawl.
//!
//! User config lives at `~/.reviewcrawl/reviewcrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewCrawlError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reviewcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reviewcrawl";

// ---------------------------------------------------------------------------
// Config structs (matching reviewcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote API endpoints and credentials.
    #[serde(default)]
    pub api: ApiConfig,

    /// Request budget and retry policy.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Content-shape heuristics.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// PDF download policy.
    #[serde(default)]
    pub attachments: AttachmentsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory the CLI writes record streams into.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Fingerprint cache database.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,

    /// Forums processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Notes requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_path: default_cache_path(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
        }
    }
}

fn default_output_dir() -> String {
    "./data".into()
}
fn default_cache_path() -> String {
    "~/.reviewcrawl/fingerprints.db".into()
}
fn default_concurrency() -> u32 {
    4
}
fn default_page_size() -> u32 {
    1000
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the newer API generation.
    #[serde(default = "default_v2_base_url")]
    pub v2_base_url: String,

    /// Base URL of the older API generation.
    #[serde(default = "default_v1_base_url")]
    pub v1_base_url: String,

    /// Public site used to build forum/PDF links in records.
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Name of the env var holding the username (never store it here).
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Name of the env var holding the password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            v2_base_url: default_v2_base_url(),
            v1_base_url: default_v1_base_url(),
            site_url: default_site_url(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_v2_base_url() -> String {
    "https://api2.openreview.net".into()
}
fn default_v1_base_url() -> String {
    "https://api.openreview.net".into()
}
fn default_site_url() -> String {
    "https://openreview.net".into()
}
fn default_username_env() -> String {
    "OPENREVIEW_USERNAME".into()
}
fn default_password_env() -> String {
    "OPENREVIEW_PASSWORD".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Steady request rate across the whole run.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Requests allowed back-to-back before the steady rate applies.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Retries after a throttled or transient response.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Extra attempts for one listing page after the dispatcher gave up.
    #[serde(default = "default_page_retries")]
    pub page_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            page_retries: default_page_retries(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    3.0
}
fn default_burst() -> u32 {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_page_retries() -> u32 {
    1
}

/// `[classifier]` section: which content keys signal which record shape.
///
/// Keys are compared case-insensitively. Venues that customize their review
/// forms (or legacy payloads) are handled by extending these lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Numeric/enumerated overall score fields.
    #[serde(default = "default_rating_keys")]
    pub rating_keys: Vec<String>,

    /// Reviewer confidence fields.
    #[serde(default = "default_confidence_keys")]
    pub confidence_keys: Vec<String>,

    /// Free-text review sections.
    #[serde(default = "default_review_text_keys")]
    pub review_text_keys: Vec<String>,

    /// Decision or recommendation fields.
    #[serde(default = "default_decision_keys")]
    pub decision_keys: Vec<String>,

    /// Free-text decision justification fields.
    #[serde(default = "default_justification_keys")]
    pub justification_keys: Vec<String>,

    /// Signature fragments identifying the organizing committee.
    #[serde(default = "default_committee_markers")]
    pub committee_markers: Vec<String>,

    /// Preferred comment body fields.
    #[serde(default = "default_comment_keys")]
    pub comment_keys: Vec<String>,

    /// Text shorter than this (after trimming) counts as empty.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rating_keys: default_rating_keys(),
            confidence_keys: default_confidence_keys(),
            review_text_keys: default_review_text_keys(),
            decision_keys: default_decision_keys(),
            justification_keys: default_justification_keys(),
            committee_markers: default_committee_markers(),
            comment_keys: default_comment_keys(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_rating_keys() -> Vec<String> {
    strings(&["rating", "recommendation", "overall_rating", "overall_assessment"])
}
fn default_confidence_keys() -> Vec<String> {
    strings(&["confidence"])
}
fn default_review_text_keys() -> Vec<String> {
    strings(&[
        "review",
        "main_review",
        "summary",
        "summary_of_the_paper",
        "strengths",
        "weaknesses",
        "strength_and_weaknesses",
        "strengths_and_weaknesses",
        "questions",
        "limitations",
    ])
}
fn default_decision_keys() -> Vec<String> {
    strings(&["decision", "recommendation"])
}
fn default_justification_keys() -> Vec<String> {
    strings(&["metareview", "meta_review", "comment", "justification"])
}
fn default_committee_markers() -> Vec<String> {
    strings(&["Program_Chairs", "Senior_Area_Chairs", "Area_Chair"])
}
fn default_comment_keys() -> Vec<String> {
    strings(&["comment", "rebuttal", "response"])
}
fn default_min_text_chars() -> usize {
    1
}

/// `[attachments]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    /// Whether submission PDFs are downloaded at all.
    #[serde(default)]
    pub download: bool,

    /// Where verified PDFs are written (`<dir>/<forum>.pdf`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub v2_base_url: String,
    pub v1_base_url: String,
    pub site_url: String,
    pub timeout_secs: u64,
    /// Forums processed in parallel.
    pub concurrency: u32,
    pub page_size: u32,
    pub requests_per_second: f64,
    pub burst: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub page_retries: u32,
    pub classifier: ClassifierConfig,
    /// Set when PDFs should be downloaded and verified.
    pub attachments_dir: Option<PathBuf>,
    pub credentials: Option<Credentials>,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let attachments_dir = if config.attachments.download {
            config.attachments.dir.as_deref().map(expand_home)
        } else {
            None
        };

        Self {
            v2_base_url: config.api.v2_base_url.clone(),
            v1_base_url: config.api.v1_base_url.clone(),
            site_url: config.api.site_url.clone(),
            timeout_secs: config.api.timeout_secs,
            concurrency: config.defaults.concurrency,
            page_size: config.defaults.page_size,
            requests_per_second: config.rate_limit.requests_per_second,
            burst: config.rate_limit.burst,
            max_retries: config.rate_limit.max_retries,
            base_delay_ms: config.rate_limit.base_delay_ms,
            max_delay_ms: config.rate_limit.max_delay_ms,
            page_retries: config.rate_limit.page_retries,
            classifier: config.classifier.clone(),
            attachments_dir,
            credentials: load_credentials(config),
        }
    }
}

/// Login credentials for the remote API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reviewcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ReviewCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.reviewcrawl/reviewcrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ReviewCrawlError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ReviewCrawlError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ReviewCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ReviewCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ReviewCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read credentials from the env vars named in `[api]`.
///
/// Both variables must be set and non-empty; otherwise the crawl runs
/// anonymously, which the public API permits for public notes.
pub fn load_credentials(config: &AppConfig) -> Option<Credentials> {
    let username = std::env::var(&config.api.username_env).ok()?;
    let password = std::env::var(&config.api.password_env).ok()?;
    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some(Credentials { username, password })
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
