//! Configuration management

use crate::chrome::{BrowserMode, ChromeConfig};
use crate::fetch::WaitUntil;
use crate::{FetchConfig, Result, VislinkError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Browser settings
    #[serde(default)]
    pub browser: BrowserSection,

    /// Page processing settings
    #[serde(default)]
    pub page: PageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSection {
    /// "auto", "system" or "none"
    #[serde(default)]
    pub mode: BrowserMode,

    /// Chrome binary to use instead of searching the system
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    /// Enable JavaScript rendering
    #[serde(default = "default_true")]
    pub javascript: bool,

    /// User agent to emulate
    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// Accept invalid TLS certificates
    #[serde(default = "default_true")]
    pub ignore_https_errors: bool,

    /// Proxy for every request, e.g. "socks5://myproxy.com:3128"
    #[serde(default)]
    pub proxy_server: Option<String>,

    /// Comma-separated hosts that skip the proxy
    #[serde(default)]
    pub proxy_bypass: Option<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            mode: BrowserMode::default(),
            chrome_path: None,
            javascript: default_true(),
            user_agent: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            ignore_https_errors: default_true(),
            proxy_server: None,
            proxy_bypass: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSection {
    /// Navigation timeout in milliseconds, 0 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// "load", "domcontentloaded", "networkidle" or "commit"
    #[serde(default)]
    pub wait_until: WaitUntil,

    /// Resource types the page may load; empty allows everything
    #[serde(default)]
    pub resources: Vec<String>,

    /// Wait after load, in milliseconds
    #[serde(default)]
    pub sleep_ms: u64,

    /// Pixels to scroll while sleeping
    #[serde(default)]
    pub scroll_down: u64,

    /// Directory holding user scripts
    #[serde(default = "default_user_scripts_dir")]
    pub user_scripts_dir: PathBuf,

    /// User scripts run on every page
    #[serde(default)]
    pub user_scripts: Vec<String>,

    /// Wait after user scripts, in milliseconds
    #[serde(default)]
    pub user_scripts_timeout_ms: u64,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for PageSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            wait_until: WaitUntil::default(),
            resources: Vec::new(),
            sleep_ms: 0,
            scroll_down: 0,
            user_scripts_dir: default_user_scripts_dir(),
            user_scripts: Vec::new(),
            user_scripts_timeout_ms: 0,
            headers: BTreeMap::new(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_viewport_width() -> u32 {
    414
}
fn default_viewport_height() -> u32 {
    896
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "vislink", "vislink")
}

/// Where user scripts live unless configured otherwise
pub fn default_user_scripts_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("user_scripts"))
        .unwrap_or_else(|| PathBuf::from("user_scripts"))
}

impl Config {
    /// Load configuration from the default location or use defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {:?}", path);
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VislinkError::ConfigError(e.to_string()))
    }

    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Fetch settings derived from this configuration
    pub fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig {
            javascript: self.browser.javascript && self.browser.mode != BrowserMode::None,
            timeout_ms: self.page.timeout_ms,
            wait_until: self.page.wait_until,
            resources: self.page.resources.clone(),
            extra_http_headers: self
                .page
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            ignore_https_errors: self.browser.ignore_https_errors,
            proxy_server: self.browser.proxy_server.clone(),
            proxy_bypass: self.browser.proxy_bypass.clone(),
            sleep_ms: self.page.sleep_ms,
            scroll_down: self.page.scroll_down,
            user_scripts_dir: self.page.user_scripts_dir.clone(),
            user_scripts: self.page.user_scripts.clone(),
            user_scripts_timeout_ms: self.page.user_scripts_timeout_ms,
            ..FetchConfig::default()
        };
        if let Some(ref user_agent) = self.browser.user_agent {
            config.user_agent = user_agent.clone();
        }
        config
    }

    /// Chrome settings derived from this configuration
    pub fn chrome_config(&self) -> ChromeConfig {
        ChromeConfig {
            mode: self.browser.mode,
            chrome_path: self.browser.chrome_path.clone(),
            user_agent: self.browser.user_agent.clone(),
            viewport: (self.browser.viewport_width, self.browser.viewport_height),
            ignore_https_errors: self.browser.ignore_https_errors,
            proxy_server: self.browser.proxy_server.clone(),
            proxy_bypass: self.browser.proxy_bypass.clone(),
        }
    }
}
