//! Vislink CLI - Visible Link Extractor
//!
//! Loads a page (or reads HTML from stdin) and prints every link a human
//! viewer could actually see, with its position, styling and selector path.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vislink_core::fetch::{parse_header, Fetcher};
use vislink_core::{Config, ExtractionOutcome, LinksPage, WaitUntil};

#[derive(Parser)]
#[command(name = "vislink")]
#[command(
    author,
    version,
    about = "Extract the visible links of a rendered page",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a URL and print its visible links
    Links {
        /// URL to load
        url: String,

        /// Output format: json, pretty, tsv
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,

        /// Skip JavaScript rendering (HTTP only, inline styles only)
        #[arg(long)]
        no_js: bool,

        /// Navigation timeout in milliseconds, 0 disables it
        #[arg(long)]
        timeout: Option<u64>,

        /// When navigation is done: load, domcontentloaded, networkidle, commit
        #[arg(long)]
        wait_until: Option<WaitUntil>,

        /// Resource types the page may load, comma-separated or repeated
        #[arg(long = "resource", value_delimiter = ',')]
        resources: Vec<String>,

        /// Extra request header as "Name: value" (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,

        /// Reject invalid TLS certificates
        #[arg(long)]
        strict_https: bool,

        /// Proxy server, e.g. socks5://myproxy.com:3128
        #[arg(long)]
        proxy_server: Option<String>,

        /// Comma-separated hosts that skip the proxy
        #[arg(long)]
        proxy_bypass: Option<String>,

        /// Wait after load, in milliseconds
        #[arg(long)]
        sleep: Option<u64>,

        /// Pixels to scroll down while sleeping
        #[arg(long)]
        scroll_down: Option<u64>,

        /// User script to run before extraction (repeatable)
        #[arg(long = "user-script")]
        user_scripts: Vec<String>,
    },

    /// Read HTML from stdin and print its visible links
    Render {
        /// Base URL for resolving relative links
        #[arg(short, long)]
        base_url: Option<String>,

        /// Output format: json, pretty, tsv
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, Default)]
enum OutputFormat {
    #[default]
    Json,
    Pretty,
    Tsv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            "tsv" | "table" => Ok(OutputFormat::Tsv),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .with(tracing_subscriber::EnvFilter::new("debug"))
            .init();
    }

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let page = match cli.command {
        Commands::Links {
            url,
            format,
            no_js,
            timeout,
            wait_until,
            resources,
            headers,
            strict_https,
            proxy_server,
            proxy_bypass,
            sleep,
            scroll_down,
            user_scripts,
        } => {
            let mut config = config;
            if strict_https {
                config.browser.ignore_https_errors = false;
            }
            if proxy_server.is_some() {
                config.browser.proxy_server = proxy_server;
                config.browser.proxy_bypass = proxy_bypass;
            }

            let mut fetch_config = config.fetch_config();
            fetch_config.javascript &= !no_js;
            if let Some(timeout) = timeout {
                fetch_config.timeout_ms = timeout;
            }
            if let Some(wait_until) = wait_until {
                fetch_config.wait_until = wait_until;
            }
            if !resources.is_empty() {
                fetch_config.resources = resources
                    .iter()
                    .map(|r| r.trim().to_lowercase())
                    .filter(|r| !r.is_empty())
                    .collect();
            }
            for header in &headers {
                fetch_config.extra_http_headers.push(parse_header(header)?);
            }
            if let Some(sleep) = sleep {
                fetch_config.sleep_ms = sleep;
            }
            if let Some(scroll_down) = scroll_down {
                fetch_config.scroll_down = scroll_down;
            }
            fetch_config.user_scripts.extend(user_scripts);

            let fetcher =
                Fetcher::with_config_and_chrome(fetch_config, config.chrome_config()).await?;
            let page = fetcher.fetch(&url).await?;
            print_page(&page, format)?;
            page
        }
        Commands::Render { base_url, format } => {
            let mut html = String::new();
            io::stdin().read_to_string(&mut html)?;

            let mut fetch_config = config.fetch_config();
            fetch_config.javascript = false;
            let fetcher = Fetcher::with_config(fetch_config).await?;
            let page = fetcher.render_html(&html, base_url.as_deref())?;
            print_page(&page, format)?;
            page
        }
    };

    Ok(if page.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_page(page: &LinksPage, format: OutputFormat) -> Result<()> {
    match (format, &page.outcome) {
        (OutputFormat::Json, outcome) => {
            println!("{}", serde_json::to_string(outcome)?);
        }
        (OutputFormat::Pretty, outcome) => {
            let json = serde_json::json!({
                "url": page.url.to_string(),
                "pageTimeout": page.page_timeout,
                "links": outcome,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        (OutputFormat::Tsv, ExtractionOutcome::Links(links)) => {
            println!("pos\tfontSize\tfontWeight\turl\ttext\tcssSel");
            for link in links {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    link.pos,
                    link.font_size.map(|v| v.to_string()).unwrap_or_default(),
                    link.font_weight.map(|v| v.to_string()).unwrap_or_default(),
                    link.url,
                    link.words.join(" "),
                    link.css_sel
                );
            }
        }
        (OutputFormat::Tsv, outcome @ ExtractionOutcome::Failed { .. }) => {
            println!("{}", serde_json::to_string(outcome)?);
        }
    }

    Ok(())
}
