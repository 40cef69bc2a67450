//! HTTP and headless browser fetching
//!
//! The host side of an extraction: load the page, let it settle, run any
//! user scripts, then hand the rendered tree to [`links::run`].

use crate::chrome::{BrowserHandle, ChromeConfig, ChromeManager};
use crate::{html, links, snapshot, FetchConfig, LinksPage, Result, VislinkError};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as InterceptParams, EventRequestPaused, FailRequestParams,
    RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, NoProxy, Proxy};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Number of slices the post-load sleep and scroll are split into
const SCROLL_STEPS: u64 = 10;

/// Resource types accepted by the allowlist
pub const RESOURCE_TYPES: [&str; 13] = [
    "document",
    "stylesheet",
    "image",
    "media",
    "font",
    "script",
    "texttrack",
    "xhr",
    "fetch",
    "eventsource",
    "websocket",
    "manifest",
    "other",
];

/// When navigation counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// The `load` event fired
    Load,
    /// `DOMContentLoaded` fired
    #[default]
    DomContentLoaded,
    /// No network connections for at least 500 ms
    NetworkIdle,
    /// The response arrived and the document started loading
    Commit,
}

impl WaitUntil {
    /// Chrome lifecycle event to wait for; `None` once navigation commits
    fn lifecycle_event(self) -> Option<&'static str> {
        match self {
            WaitUntil::Load => Some("load"),
            WaitUntil::DomContentLoaded => Some("DOMContentLoaded"),
            WaitUntil::NetworkIdle => Some("networkIdle"),
            WaitUntil::Commit => None,
        }
    }
}

impl std::str::FromStr for WaitUntil {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "load" => Ok(WaitUntil::Load),
            "domcontentloaded" => Ok(WaitUntil::DomContentLoaded),
            "networkidle" => Ok(WaitUntil::NetworkIdle),
            "commit" => Ok(WaitUntil::Commit),
            _ => Err(format!(
                "Unknown wait event: {}. Use 'load', 'domcontentloaded', 'networkidle' or 'commit'",
                s
            )),
        }
    }
}

impl std::fmt::Display for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitUntil::Load => write!(f, "load"),
            WaitUntil::DomContentLoaded => write!(f, "domcontentloaded"),
            WaitUntil::NetworkIdle => write!(f, "networkidle"),
            WaitUntil::Commit => write!(f, "commit"),
        }
    }
}

/// Parse a `Name: value` header
pub fn parse_header(header: &str) -> Result<(String, String)> {
    match header.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(VislinkError::ConfigError(format!(
            "Invalid HTTP header: {}",
            header
        ))),
    }
}

/// Fetcher for web pages
pub struct Fetcher {
    client: Client,
    chrome_manager: ChromeManager,
    browser: Option<Arc<Mutex<BrowserHandle>>>,
    config: FetchConfig,
}

impl Fetcher {
    /// Create a new fetcher with default configuration
    pub async fn new() -> Result<Self> {
        Self::with_config(FetchConfig::default()).await
    }

    /// Create a new fetcher with custom configuration
    pub async fn with_config(config: FetchConfig) -> Result<Self> {
        Self::with_config_and_chrome(config, ChromeConfig::default()).await
    }

    /// Create a new fetcher with custom fetch and Chrome configuration
    pub async fn with_config_and_chrome(
        config: FetchConfig,
        chrome_config: ChromeConfig,
    ) -> Result<Self> {
        validate_resources(&config.resources)?;

        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .default_headers(header_map(&config.extra_http_headers)?)
            .danger_accept_invalid_certs(config.ignore_https_errors);
        if let Some(ref server) = config.proxy_server {
            let mut proxy = Proxy::all(proxy_url(server))?;
            if let Some(ref bypass) = config.proxy_bypass {
                proxy = proxy.no_proxy(NoProxy::from_string(bypass));
            }
            builder = builder.proxy(proxy);
        }
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }
        let client = builder.build()?;

        let mut chrome_manager = ChromeManager::with_config(chrome_config);

        let browser = if config.javascript {
            match chrome_manager.get_browser().await {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!(
                        "Failed to initialize browser, falling back to HTTP-only: {}",
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            client,
            chrome_manager,
            browser,
            config,
        })
    }

    /// Fetch a page by URL and extract its visible links
    pub async fn fetch(&self, url: &str) -> Result<LinksPage> {
        let url = Url::parse(url)?;
        let scripts = self.load_user_scripts()?;
        info!("Fetching: {}", url);

        match self.browser {
            Some(ref browser) => self.fetch_with_browser(browser, &url, &scripts).await,
            None => self.fetch_with_http(&url).await,
        }
    }

    /// Fetch using HTTP only (no JavaScript, static styles)
    pub async fn fetch_with_http(&self, url: &Url) -> Result<LinksPage> {
        debug!("Fetching with HTTP: {}", url);
        let response = self.client.get(url.as_str()).send().await?;
        let final_url = response.url().clone();
        let markup = response.text().await?;

        let mut doc = html::parse_html(&markup, &final_url);
        Ok(LinksPage {
            url: final_url,
            page_timeout: false,
            outcome: links::run(&mut doc),
        })
    }

    /// Fetch using the headless browser
    async fn fetch_with_browser(
        &self,
        browser: &Arc<Mutex<BrowserHandle>>,
        url: &Url,
        scripts: &[(String, String)],
    ) -> Result<LinksPage> {
        debug!("Fetching with browser: {}", url);

        let handle = browser.lock().await;
        let page = handle
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| VislinkError::BrowserError(e.to_string()))?;

        let result = self.process_page(&page, url, scripts).await;

        // Close the page
        let _ = page.close().await;
        result
    }

    async fn process_page(
        &self,
        page: &Page,
        url: &Url,
        scripts: &[(String, String)],
    ) -> Result<LinksPage> {
        let blocker = self.block_resources(page).await?;
        let result = self.render_and_extract(page, url, scripts).await;
        if let Some(blocker) = blocker {
            blocker.abort();
        }
        result
    }

    async fn render_and_extract(
        &self,
        page: &Page,
        url: &Url,
        scripts: &[(String, String)],
    ) -> Result<LinksPage> {
        if !self.config.extra_http_headers.is_empty() {
            let headers: serde_json::Map<String, serde_json::Value> = self
                .config
                .extra_http_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone().into()))
                .collect();
            let headers = Headers::new(serde_json::Value::Object(headers));
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(browser_error)?;
        }

        let page_timeout = self.navigate(page, url).await?;
        self.settle(page).await?;

        for (name, source) in scripts {
            debug!("Running user script {}", name);
            page.evaluate(source.as_str()).await.map_err(|e| {
                VislinkError::BrowserError(format!("User script {} failed: {}", name, e))
            })?;
        }
        if self.config.user_scripts_timeout_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.user_scripts_timeout_ms)).await;
        }

        let snapshot = snapshot::capture(page).await?;
        let final_url = Url::parse(&snapshot.location).unwrap_or_else(|_| url.clone());
        let mut doc = snapshot.into_document()?;
        let outcome = links::run(&mut doc);
        if let Some(err) = outcome.error() {
            warn!("Link extraction failed on {}: {}", final_url, err);
        }

        Ok(LinksPage {
            url: final_url,
            page_timeout,
            outcome,
        })
    }

    /// Abort every request whose resource type is not allowlisted.
    ///
    /// The returned task answers paused requests until it is aborted.
    async fn block_resources(&self, page: &Page) -> Result<Option<JoinHandle<()>>> {
        if self.config.resources.is_empty() {
            return Ok(None);
        }

        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(browser_error)?;
        let intercept = InterceptParams {
            patterns: Some(vec![RequestPattern {
                url_pattern: Some("*".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        page.execute(intercept).await.map_err(browser_error)?;

        let allowed = self.config.resources.clone();
        let page = page.clone();
        Ok(Some(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let kind = resource_type_name(event.resource_type.as_ref());
                let answered = if allowed.iter().any(|r| r == kind) {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(drop)
                } else {
                    debug!("Blocked {} request: {}", kind, event.request.url);
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(drop)
                };
                if let Err(e) = answered {
                    debug!("Paused request {} not answered: {}", event.request.url, e);
                }
            }
        })))
    }

    /// Navigate and wait for the configured load stage; returns whether the
    /// timeout was hit.
    ///
    /// A timeout is not fatal: whatever has rendered so far is still used.
    async fn navigate(&self, page: &Page, url: &Url) -> Result<bool> {
        let load = self.load(page, url);

        if self.config.timeout_ms == 0 {
            load.await?;
            return Ok(false);
        }

        match tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), load).await {
            Ok(result) => {
                result?;
                Ok(false)
            }
            Err(_) => {
                warn!(
                    "Navigation to {} timed out after {}ms, extracting what has loaded",
                    url, self.config.timeout_ms
                );
                Ok(true)
            }
        }
    }

    /// Start the navigation and wait for the lifecycle event of the new document
    async fn load(&self, page: &Page, url: &Url) -> Result<()> {
        let mut events = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(browser_error)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(browser_error)?;

        let navigation = page
            .execute(NavigateParams::new(url.as_str()))
            .await
            .map_err(browser_error)?
            .result;
        if let Some(error) = navigation.error_text {
            return Err(VislinkError::BrowserError(format!(
                "Navigation to {} failed: {}",
                url, error
            )));
        }

        let Some(wanted) = self.config.wait_until.lifecycle_event() else {
            return Ok(());
        };
        while let Some(event) = events.next().await {
            let same_document = event.frame_id == navigation.frame_id
                && navigation
                    .loader_id
                    .as_ref()
                    .map_or(true, |loader| *loader == event.loader_id);
            if same_document && event.name == wanted {
                debug!("Reached {} on {}", wanted, url);
                break;
            }
        }
        Ok(())
    }

    /// Sleep after load, scrolling in slices for lazy-loading pages
    async fn settle(&self, page: &Page) -> Result<()> {
        if self.config.sleep_ms == 0 {
            return Ok(());
        }

        let step_px = self.config.scroll_down / SCROLL_STEPS;
        let step_sleep = Duration::from_millis(self.config.sleep_ms / SCROLL_STEPS);
        for _ in 0..SCROLL_STEPS {
            if step_px > 0 {
                scroll_by(page, step_px as i64).await?;
            }
            tokio::time::sleep(step_sleep).await;
        }

        if self.config.scroll_down > 0 {
            page.evaluate("window.scrollTo(0, 0)")
                .await
                .map_err(browser_error)?;
        }
        Ok(())
    }

    /// Read the configured user scripts, failing before navigation if one is missing
    fn load_user_scripts(&self) -> Result<Vec<(String, String)>> {
        self.config
            .user_scripts
            .iter()
            .map(|name| {
                let path = self.config.user_scripts_dir.join(name);
                if !path.is_file() {
                    return Err(VislinkError::ConfigError(format!(
                        "User script not found: {}",
                        path.display()
                    )));
                }
                Ok((name.clone(), std::fs::read_to_string(&path)?))
            })
            .collect()
    }

    /// Extract links from markup supplied directly (no fetching)
    pub fn render_html(&self, markup: &str, base_url: Option<&str>) -> Result<LinksPage> {
        let url = Url::parse(base_url.unwrap_or("about:blank"))?;
        let mut doc = html::parse_html(markup, &url);

        Ok(LinksPage {
            url,
            page_timeout: false,
            outcome: links::run(&mut doc),
        })
    }
}

impl Fetcher {
    /// Get a reference to the Chrome manager
    pub fn chrome_manager(&self) -> &ChromeManager {
        &self.chrome_manager
    }

    /// Check if JavaScript rendering is available
    pub fn has_javascript(&self) -> bool {
        self.browser.is_some()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

async fn scroll_by(page: &Page, pixels: i64) -> Result<()> {
    page.evaluate(format!("window.scrollBy(0, {})", pixels))
        .await
        .map_err(browser_error)?;
    Ok(())
}

fn browser_error(e: CdpError) -> VislinkError {
    VislinkError::BrowserError(e.to_string())
}

/// Proxy address with a scheme; a bare `host:port` is an HTTP proxy
pub fn proxy_url(server: &str) -> String {
    if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    }
}

fn validate_resources(resources: &[String]) -> Result<()> {
    match resources.iter().find(|r| !RESOURCE_TYPES.contains(&r.as_str())) {
        Some(unknown) => Err(VislinkError::ConfigError(format!(
            "Unknown resource type: {}. Use one of {}",
            unknown,
            RESOURCE_TYPES.join(", ")
        ))),
        None => Ok(()),
    }
}

/// Allowlist name of a Chrome resource type; types without one count as "other"
fn resource_type_name(cdp_type: &str) -> &'static str {
    let lower = cdp_type.to_ascii_lowercase();
    RESOURCE_TYPES
        .into_iter()
        .find(|name| *name == lower)
        .unwrap_or("other")
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    fn invalid(name: &str, e: impl Display) -> VislinkError {
        VislinkError::ConfigError(format!("Invalid HTTP header {}: {}", name, e))
    }

    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(name, e))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::ExtractionOutcome;

    fn http_only() -> FetchConfig {
        FetchConfig {
            javascript: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_http_only_fetcher_has_no_browser() {
        let fetcher = tokio_test::block_on(Fetcher::with_config(http_only())).unwrap();
        assert!(!fetcher.has_javascript());
    }

    #[test]
    fn test_render_html() {
        let fetcher = tokio_test::block_on(Fetcher::with_config(http_only())).unwrap();
        let page = fetcher
            .render_html(
                r#"<body><a href="/docs">Docs</a><a href="/x" style="display:none">x</a></body>"#,
                Some("https://example.com/start"),
            )
            .unwrap();

        assert!(page.is_success());
        assert_eq!(page.links().len(), 1);
        assert_eq!(page.links()[0].url, "https://example.com/docs");
    }

    #[test]
    fn test_render_html_without_base_reports_envelope() {
        let fetcher = tokio_test::block_on(Fetcher::with_config(http_only())).unwrap();
        let page = fetcher
            .render_html(r#"<body><a href="relative">r</a></body>"#, None)
            .unwrap();
        assert!(matches!(page.outcome, ExtractionOutcome::Failed { .. }));
    }

    #[test]
    fn test_wait_until_parse() {
        assert_eq!(WaitUntil::default(), WaitUntil::DomContentLoaded);
        assert_eq!("networkidle".parse::<WaitUntil>(), Ok(WaitUntil::NetworkIdle));
        assert_eq!("DOMContentLoaded".parse::<WaitUntil>(), Ok(WaitUntil::DomContentLoaded));
        assert!("idle".parse::<WaitUntil>().is_err());
        assert_eq!(WaitUntil::Commit.to_string(), "commit");
        assert_eq!(WaitUntil::Load.lifecycle_event(), Some("load"));
        assert_eq!(WaitUntil::Commit.lifecycle_event(), None);
    }

    #[test]
    fn test_resource_type_names() {
        assert_eq!(resource_type_name("Document"), "document");
        assert_eq!(resource_type_name("XHR"), "xhr");
        assert_eq!(resource_type_name("TextTrack"), "texttrack");
        assert_eq!(resource_type_name("Ping"), "other");
    }

    #[test]
    fn test_unknown_resource_type_is_rejected() {
        let config = FetchConfig {
            resources: vec!["document".to_string(), "images".to_string()],
            ..http_only()
        };
        let err = tokio_test::block_on(Fetcher::with_config(config)).err().unwrap();
        assert!(matches!(err, VislinkError::ConfigError(_)));
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-API-Key: 123:456").unwrap(),
            ("X-API-Key".to_string(), "123:456".to_string())
        );
        assert!(parse_header("no separator").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let config = FetchConfig {
            extra_http_headers: vec![("Bad Name".to_string(), "x".to_string())],
            ..http_only()
        };
        let err = tokio_test::block_on(Fetcher::with_config(config)).err().unwrap();
        assert!(matches!(err, VislinkError::ConfigError(_)));
    }

    #[test]
    fn test_proxy_and_headers_build_client() {
        let config = FetchConfig {
            extra_http_headers: vec![("X-Auth-Token".to_string(), "abcdef".to_string())],
            proxy_server: Some("myproxy.com:3128".to_string()),
            proxy_bypass: Some(".example.com, localhost".to_string()),
            ..http_only()
        };
        assert!(tokio_test::block_on(Fetcher::with_config(config)).is_ok());
        assert_eq!(proxy_url("myproxy.com:3128"), "http://myproxy.com:3128");
        assert_eq!(proxy_url("socks5://myproxy.com:3128"), "socks5://myproxy.com:3128");
    }

    #[test]
    fn test_missing_user_script_is_rejected() {
        let config = FetchConfig {
            user_scripts_dir: std::env::temp_dir().join("vislink-no-such-dir"),
            user_scripts: vec!["remove_ads.js".to_string()],
            ..http_only()
        };
        let fetcher = tokio_test::block_on(Fetcher::with_config(config)).unwrap();
        let err = tokio_test::block_on(fetcher.fetch("https://example.com/")).unwrap_err();
        assert!(matches!(err, VislinkError::ConfigError(_)));
    }
}
