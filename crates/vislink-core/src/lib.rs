//! Vislink Core Library
//!
//! Core functionality for vislink, the visible-link extractor:
//! - Rendered document model and static style resolution
//! - The single-pass link extraction (visibility pruning, selector paths,
//!   per-link style metadata, word tokenization)
//! - Chrome browser lifecycle and page snapshots
//! - HTTP and headless browser fetching

pub mod chrome;
pub mod config;
pub mod dom;
pub mod fetch;
pub mod html;
pub mod links;
pub mod snapshot;
pub mod style;

use thiserror::Error;

// Re-export key types
pub use chrome::{ChromeConfig, ChromeManager, ChromeSource};
pub use config::Config;
pub use dom::{Document, Element, NodeId};
pub use fetch::WaitUntil;
pub use links::{extract_links, ExtractionFailure, ExtractionOutcome, LinkRecord};
pub use style::ComputedStyle;

#[derive(Error, Debug)]
pub enum VislinkError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Invalid page snapshot: {0}")]
    SnapshotError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Link extraction failed: {0}")]
    ExtractionError(#[from] ExtractionFailure),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VislinkError>;

/// Links extracted from one page
#[derive(Debug, Clone)]
pub struct LinksPage {
    /// The URL of the page after redirects
    pub url: url::Url,
    /// Whether navigation hit the configured timeout before the page settled
    pub page_timeout: bool,
    /// The extraction result: every visible link, or a single failure
    pub outcome: ExtractionOutcome,
}

impl LinksPage {
    /// Whether the extraction produced links rather than an error envelope
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExtractionOutcome::Links(_))
    }

    /// Links on the page, empty when the extraction failed
    pub fn links(&self) -> &[LinkRecord] {
        match &self.outcome {
            ExtractionOutcome::Links(links) => links,
            ExtractionOutcome::Failed { .. } => &[],
        }
    }
}

/// Configuration for fetching pages
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whether to use JavaScript rendering
    pub javascript: bool,
    /// User agent string
    pub user_agent: String,
    /// Navigation timeout in milliseconds (0 disables it)
    pub timeout_ms: u64,
    /// Load stage at which navigation counts as done
    pub wait_until: WaitUntil,
    /// Resource types the page may load; empty allows everything
    pub resources: Vec<String>,
    /// Headers sent with every request
    pub extra_http_headers: Vec<(String, String)>,
    /// Accept invalid TLS certificates
    pub ignore_https_errors: bool,
    /// Proxy for every request, `scheme://host:port` or `host:port`
    pub proxy_server: Option<String>,
    /// Comma-separated hosts that skip the proxy
    pub proxy_bypass: Option<String>,
    /// Time to wait after the page has loaded, in milliseconds
    pub sleep_ms: u64,
    /// Pixels to scroll down while sleeping, for lazy-loading pages
    pub scroll_down: u64,
    /// Directory holding user scripts
    pub user_scripts_dir: std::path::PathBuf,
    /// User scripts to run after load and before extraction
    pub user_scripts: Vec<String>,
    /// Time to wait after the user scripts ran, in milliseconds
    pub user_scripts_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            javascript: true,
            user_agent: format!("Vislink/{} (Link Extractor)", env!("CARGO_PKG_VERSION")),
            timeout_ms: 60_000,
            wait_until: WaitUntil::default(),
            resources: Vec::new(),
            extra_http_headers: Vec::new(),
            ignore_https_errors: true,
            proxy_server: None,
            proxy_bypass: None,
            sleep_ms: 0,
            scroll_down: 0,
            user_scripts_dir: config::default_user_scripts_dir(),
            user_scripts: Vec::new(),
            user_scripts_timeout_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_page_failure_has_no_links() {
        let page = LinksPage {
            url: url::Url::parse("https://example.com/").unwrap(),
            page_timeout: false,
            outcome: ExtractionOutcome::failed("boom"),
        };
        assert!(!page.is_success());
        assert!(page.links().is_empty());
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert!(config.javascript);
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.wait_until, WaitUntil::DomContentLoaded);
        assert!(config.resources.is_empty());
        assert!(config.ignore_https_errors);
        assert_eq!(config.sleep_ms, 0);
        assert!(config.user_scripts.is_empty());
    }
}
