mod cache;
mod clock;
mod cmd;
mod config;
mod context;
mod domain;
mod error;
mod infra;
mod panel;
mod services;
#[cfg(test)]
mod test_support;
mod workflow;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cmd::config::{self as config_cmd, ConfigArgs};
use crate::cmd::record::{self, RecordArgs};
use crate::cmd::scan::{self, ScanArgs};
use crate::cmd::ticket::{self, TicketArgs};
use crate::cmd::watch::{self, WatchArgs};
use crate::config::{AppConfig, StoredConfig};
use crate::context::AppContext;
use crate::domain::ticket::TicketId;
use crate::error::{AppError, AppResult};
use crate::infra::jira::JiraClient;
use crate::infra::page::open_page;
use crate::services::{
    AuthRetry, CredentialRefresher, IssueTrackerService, PageService, StaticCredentials,
};

#[derive(Parser)]
#[command(
    name = "spotter",
    author,
    version,
    about = "Shows the Jira tickets referenced by a web page"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a page and keep a panel of its tickets up to date.
    Watch(WatchArgs),
    /// Print the task ids found on a page once.
    Scan(ScanArgs),
    /// Inspect or edit a single ticket.
    Ticket(TicketArgs),
    /// Manage CLI configuration.
    Config(ConfigArgs),
    /// Turn recorded interactions into a Playwright test.
    Record(RecordArgs),
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> AppResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(args) => config_cmd::run(args.command),
        Commands::Record(args) => record::run(args).await,
        Commands::Scan(args) => {
            let config = AppConfig::load()?;
            scan::run(args.source, config.page.as_deref()).await
        }
        Commands::Ticket(args) => {
            let ctx = build_context(AppConfig::load()?, None)?;
            ticket::run(&ctx, args.command).await
        }
        Commands::Watch(args) => {
            let config = AppConfig::load()?;
            let source = args
                .page
                .clone()
                .or_else(|| config.page.clone())
                .ok_or_else(|| {
                    AppError::Configuration(
                        "no page to watch; pass --page or run `spotter config init`".to_string(),
                    )
                })?;
            let ctx = build_context(config, Some(&source))?;
            watch::run(&ctx, args).await
        }
    }
}

fn build_context(config: AppConfig, page: Option<&str>) -> AppResult<AppContext> {
    let issue_tracker = build_issue_tracker(&config)?;
    let page: Arc<dyn PageService> = match page {
        Some(source) => open_page(source)?,
        None => Arc::new(NoPage),
    };
    Ok(AppContext::new(config, issue_tracker, page))
}

fn build_issue_tracker(config: &AppConfig) -> AppResult<Arc<dyn IssueTrackerService>> {
    let (base_url, auth) = config.tracker_details()?;

    let client = Arc::new(JiraClient::new(base_url, auth.clone()).on_refresh(|credentials| {
        let persisted = StoredConfig::load().and_then(|mut stored| {
            stored.store_oauth_tokens(credentials);
            stored.save()
        });
        if let Err(error) = persisted {
            warn!(error = %error, "failed to persist refreshed credentials");
        }
    }));

    let refresher: Arc<dyn CredentialRefresher> = if client.refreshes_credentials() {
        client.clone()
    } else {
        Arc::new(StaticCredentials)
    };
    Ok(Arc::new(AuthRetry::new(client, refresher)))
}

/// Page for commands that never scan.
struct NoPage;

#[async_trait]
impl PageService for NoPage {
    async fn scan_for_task_ids(&self) -> AppResult<BTreeSet<TicketId>> {
        Err(AppError::Configuration(
            "no page configured; run `spotter config init`".to_string(),
        ))
    }

    async fn highlight_selector(&self, _selector: &str) {}
}
