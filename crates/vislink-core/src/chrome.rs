//! Chrome browser lifecycle management
//!
//! Handles Chrome discovery and browser initialization. Pages are rendered
//! by a system Chrome or Chromium; without one vislink falls back to
//! HTTP-only mode and static style resolution.

use crate::{Result, VislinkError};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Where Chrome was resolved from
#[derive(Debug, Clone)]
pub enum ChromeSource {
    /// Configured explicitly
    Configured(PathBuf),
    /// Found in a well-known location or on `PATH`
    System(PathBuf),
    /// No Chrome available, HTTP-only mode
    None,
}

/// How to find a browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// Use the configured path if any, otherwise search the system
    #[default]
    Auto,
    /// Only use the configured path
    System,
    /// Never start a browser
    None,
}

impl std::str::FromStr for BrowserMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(BrowserMode::Auto),
            "system" => Ok(BrowserMode::System),
            "none" | "off" => Ok(BrowserMode::None),
            _ => Err(format!("Unknown browser mode: {}. Use 'auto', 'system' or 'none'", s)),
        }
    }
}

impl std::fmt::Display for BrowserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserMode::Auto => write!(f, "auto"),
            BrowserMode::System => write!(f, "system"),
            BrowserMode::None => write!(f, "none"),
        }
    }
}

/// Configuration for Chrome browser management
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub mode: BrowserMode,
    /// Custom Chrome binary path
    pub chrome_path: Option<PathBuf>,
    /// User agent override
    pub user_agent: Option<String>,
    /// Window size in pixels (width, height)
    pub viewport: (u32, u32),
    /// Accept invalid TLS certificates
    pub ignore_https_errors: bool,
    /// Proxy for all browser traffic
    pub proxy_server: Option<String>,
    /// Comma-separated hosts that skip the proxy
    pub proxy_bypass: Option<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            mode: BrowserMode::Auto,
            chrome_path: None,
            user_agent: None,
            // iPhone 11 viewport
            viewport: (414, 896),
            ignore_https_errors: true,
            proxy_server: None,
            proxy_bypass: None,
        }
    }
}

/// Handle to a running browser instance
pub struct BrowserHandle {
    pub browser: Browser,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

/// Manages Chrome lifecycle: discovery and browser instances
pub struct ChromeManager {
    config: ChromeConfig,
    source: ChromeSource,
    browser: Option<Arc<Mutex<BrowserHandle>>>,
}

impl ChromeManager {
    /// Create a new ChromeManager with default configuration
    pub fn new() -> Self {
        Self::with_config(ChromeConfig::default())
    }

    /// Create a new ChromeManager with custom configuration
    pub fn with_config(config: ChromeConfig) -> Self {
        Self {
            config,
            source: ChromeSource::None,
            browser: None,
        }
    }

    /// Get the current Chrome source
    pub fn source(&self) -> &ChromeSource {
        &self.source
    }

    /// Resolve the Chrome binary according to the configured mode
    pub fn ensure_chrome(&mut self) -> Result<PathBuf> {
        if let ChromeSource::Configured(ref path) | ChromeSource::System(ref path) = self.source {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        let configured = self.config.chrome_path.clone().filter(|p| p.exists());
        match self.config.mode {
            BrowserMode::None => {
                self.source = ChromeSource::None;
                Err(VislinkError::BrowserError(
                    "Chrome disabled by configuration".to_string(),
                ))
            }
            BrowserMode::System => match configured {
                Some(path) => {
                    self.source = ChromeSource::Configured(path.clone());
                    Ok(path)
                }
                None => Err(VislinkError::BrowserError(format!(
                    "Configured Chrome not found: {:?}",
                    self.config.chrome_path
                ))),
            },
            BrowserMode::Auto => {
                if let Some(path) = configured {
                    debug!("Using configured Chrome: {:?}", path);
                    self.source = ChromeSource::Configured(path.clone());
                    return Ok(path);
                }
                if let Some(path) = find_system_chrome() {
                    debug!("Using system Chrome: {:?}", path);
                    self.source = ChromeSource::System(path.clone());
                    return Ok(path);
                }
                self.source = ChromeSource::None;
                Err(VislinkError::BrowserError("No Chrome found".to_string()))
            }
        }
    }

    /// Get or create a browser instance
    pub async fn get_browser(&mut self) -> Result<Arc<Mutex<BrowserHandle>>> {
        if let Some(ref browser) = self.browser {
            return Ok(Arc::clone(browser));
        }

        let chrome_path = self.ensure_chrome()?;
        let handle = launch_browser(&chrome_path, &self.config).await?;
        let browser = Arc::new(Mutex::new(handle));
        self.browser = Some(Arc::clone(&browser));

        Ok(browser)
    }

    /// Check if Chrome is available without launching it
    pub fn is_chrome_available(&self) -> bool {
        self.config.mode != BrowserMode::None
            && (self.config.chrome_path.as_ref().is_some_and(|p| p.exists())
                || find_system_chrome().is_some())
    }

    /// Shutdown the browser
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            let mut handle = browser.lock().await;
            handle
                .browser
                .close()
                .await
                .map_err(|e| VislinkError::BrowserError(e.to_string()))?;
            info!("Browser closed");
        }
        Ok(())
    }
}

impl Default for ChromeManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Launch a browser instance with the given Chrome path
async fn launch_browser(chrome_path: &Path, config: &ChromeConfig) -> Result<BrowserHandle> {
    debug!("Launching browser from {:?}", chrome_path);

    let (width, height) = config.viewport;
    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-software-rasterizer");
    if config.ignore_https_errors {
        builder = builder.arg("--ignore-certificate-errors");
    }
    if let Some(ref user_agent) = config.user_agent {
        builder = builder.arg(format!("--user-agent={}", user_agent));
    }
    builder = proxy_args(config)
        .into_iter()
        .fold(builder, |builder, arg| builder.arg(arg));

    let (browser, mut handler) = Browser::launch(
        builder
            .build()
            .map_err(VislinkError::BrowserError)?,
    )
    .await
    .map_err(|e| VislinkError::BrowserError(format!("Failed to launch browser: {}", e)))?;

    let handle = tokio::spawn(async move {
        while handler.next().await.is_some() {}
    });

    Ok(BrowserHandle { browser, handle })
}

/// Command-line switches routing the browser through the configured proxy
fn proxy_args(config: &ChromeConfig) -> Vec<String> {
    let Some(ref server) = config.proxy_server else {
        return Vec::new();
    };
    let mut args = vec![format!("--proxy-server={}", server)];
    if let Some(ref bypass) = config.proxy_bypass {
        let hosts: Vec<&str> = bypass
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect();
        if !hosts.is_empty() {
            args.push(format!("--proxy-bypass-list={}", hosts.join(";")));
        }
    }
    args
}

/// Find Chrome installed on the system
pub fn find_system_chrome() -> Option<PathBuf> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        vec![]
    };

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .or_else(|| {
            ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
                .into_iter()
                .find_map(|name| which::which(name).ok())
        })
}
