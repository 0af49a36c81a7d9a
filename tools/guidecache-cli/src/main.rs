//! Command-line harness for the guidecache worker.
//!
//! Provides commands for:
//! - Installing a generation against a live origin and reporting what got cached
//! - Classifying URLs the way the worker would
//! - Fetching a URL through the worker, online or after going offline
//!
//! ## Usage
//!
//! ```bash
//! # Install against the configured origin and write a JSON report
//! guidecache install --config guide.json --report install.json
//!
//! # Which strategy serves these URLs?
//! guidecache classify https://guide.example/data/events.json https://guide.example/js/app.js
//!
//! # Install, cut the network, then load the agenda page
//! guidecache fetch https://guide.example/agenda --navigate --offline
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use url::Url;

use guidecache_common::{init_logging, LogConfig, LogFormat};
use guidecache_core::GuideConfig;
use guidecache_net::{HttpFetcher, LoaderConfig};
use guidecache_sw::{
    AssetClassifier, FetchOutcome, FetchRequest, Fetcher, ServiceWorkerContainer,
};

mod network;
mod report;

use network::Switchable;
use report::{write_report, InstallSummary};

#[derive(Parser)]
#[command(name = "guidecache")]
#[command(about = "Offline cache harness for the event guide")]
struct Cli {
    /// Worker configuration (JSON); built-in defaults when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the scope (origin) from the configuration
    #[arg(long, global = true)]
    scope: Option<Url>,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate a generation against the live origin
    Install {
        /// Output JSON report path
        #[arg(short, long)]
        report: Option<PathBuf>,
        /// Exit with status 1 if a critical asset could not be cached
        #[arg(long)]
        strict: bool,
    },

    /// Classify URLs without fetching anything
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<Url>,
        /// Treat the URLs as page navigations
        #[arg(long)]
        navigate: bool,
    },

    /// Install, then fetch a URL through the worker
    Fetch {
        url: Url,
        /// Issue the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// Cut the network after installing
        #[arg(long)]
        offline: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    let config = load_config(cli.config.as_deref(), cli.scope)?;

    match cli.command {
        Commands::Install { report, strict } => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
            let (container, _events) = ServiceWorkerContainer::new(fetcher);
            let outcome = container.register(&config).await?;

            let summary = InstallSummary::new(&outcome, container.caches().snapshot().await);
            summary.print();

            if let Some(report_path) = report {
                write_report(&summary, &report_path)?;
                println!("Report written to: {}", report_path.display());
            }

            if strict && !summary.is_complete() {
                std::process::exit(1);
            }
        }

        Commands::Classify { urls, navigate } => {
            let classifier = AssetClassifier::from_config(&config)?;
            for url in urls {
                let request = if navigate {
                    FetchRequest::navigate(url.clone())
                } else {
                    FetchRequest::get(url.clone())
                };
                let class = classifier.classify(&request);
                let dev = if classifier.is_dev_bypass(&request) {
                    " (dev: network first)"
                } else {
                    ""
                };
                println!("{url}  {}{dev}", class.as_str());
            }
        }

        Commands::Fetch {
            url,
            navigate,
            offline,
        } => {
            let http: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
            let network = Arc::new(Switchable::new(http));
            let (container, _events) = ServiceWorkerContainer::new(network.clone());
            let outcome = container.register(&config).await?;
            info!(version = %outcome.version, state = ?outcome.state, "Worker ready");

            if offline {
                network.go_offline();
            }

            let request = if navigate {
                FetchRequest::navigate(url)
            } else {
                FetchRequest::get(url)
            };
            match container.handle_fetch(&request).await? {
                FetchOutcome::Respond(response) => {
                    println!(
                        "{} {}{}",
                        response.status,
                        response.status_text,
                        if response.from_cache { " (cache)" } else { "" }
                    );
                    for (name, value) in &response.headers {
                        println!("{name}: {value}");
                    }
                    println!();
                    println!("{}", response.text());
                }
                FetchOutcome::Passthrough => println!("not intercepted"),
            }
        }

        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, scope: Option<Url>) -> anyhow::Result<GuideConfig> {
    let mut config = match path {
        Some(path) => GuideConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => GuideConfig::default(),
    };
    if let Some(scope) = scope {
        config.scope = scope;
    }
    if let Err(err) = config.validate() {
        bail!("invalid configuration: {err}");
    }
    Ok(config)
}
