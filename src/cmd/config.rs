use std::io::{self, Write};

use clap::{Args, Subcommand};

use crate::config::{StoredConfig, config_file_path, interval_from_secs};
use crate::error::{AppError, AppResult};

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Run the interactive configuration wizard.
    Init,
    /// Show the stored configuration (secrets masked).
    Show,
    /// Forget stored credentials.
    Logout,
}

pub fn run(command: ConfigCommand) -> AppResult<()> {
    match command {
        ConfigCommand::Init => run_init(),
        ConfigCommand::Show => run_show(),
        ConfigCommand::Logout => run_logout(),
    }
}

fn run_init() -> AppResult<()> {
    let mut cfg = StoredConfig::load()?;

    println!("Configuring spotter.");
    println!("Press Enter to keep the current value, '-' to clear it.");
    println!("Secrets are stored in the local config file; protect your filesystem accordingly.");
    println!();

    apply_prompt(
        "Jira base URL (e.g., https://company.atlassian.net)",
        &mut cfg.jira_base_url,
        false,
    )?;
    apply_prompt("Auth kind (basic/bearer/oauth)", &mut cfg.auth_kind, false)?;

    match cfg.auth_kind.as_deref().map(str::to_lowercase).as_deref() {
        Some("oauth") => {
            apply_prompt("OAuth client id", &mut cfg.oauth_client_id, false)?;
            apply_prompt("OAuth client secret", &mut cfg.oauth_client_secret, true)?;
            apply_prompt("OAuth access token", &mut cfg.oauth_access_token, true)?;
            apply_prompt("OAuth refresh token", &mut cfg.oauth_refresh_token, true)?;
            apply_prompt("OAuth token URL", &mut cfg.oauth_token_url, false)?;
        }
        Some("bearer") => apply_prompt("Jira personal access token", &mut cfg.jira_token, true)?,
        _ => {
            apply_prompt("Jira email", &mut cfg.jira_email, false)?;
            apply_prompt("Jira API token", &mut cfg.jira_token, true)?;
        }
    }

    apply_prompt("Default page (URL or path)", &mut cfg.page, false)?;

    let mut interval = cfg.poll_interval_secs.map(|secs| secs.to_string());
    apply_prompt("Poll interval in seconds", &mut interval, false)?;
    cfg.poll_interval_secs = match interval {
        Some(raw) => {
            let secs = raw.parse().map_err(|_| {
                AppError::Configuration(format!("poll interval '{raw}' is not a whole number"))
            })?;
            interval_from_secs(secs)?;
            Some(secs)
        }
        None => None,
    };

    cfg.save()?;

    let path = config_file_path()?;
    println!("\nConfiguration saved to {}", path.display());
    Ok(())
}

fn run_show() -> AppResult<()> {
    let cfg = StoredConfig::load()?;
    let path = config_file_path()?;

    println!("Configuration file: {}", path.display());
    println!("Jira base URL: {}", display_value(&cfg.jira_base_url));
    println!("Auth kind: {}", display_value(&cfg.auth_kind));
    println!("Jira email: {}", display_value(&cfg.jira_email));
    println!("Jira token: {}", mask_secret(&cfg.jira_token));
    println!("OAuth client id: {}", display_value(&cfg.oauth_client_id));
    println!("OAuth client secret: {}", mask_secret(&cfg.oauth_client_secret));
    println!("OAuth access token: {}", mask_secret(&cfg.oauth_access_token));
    println!("OAuth refresh token: {}", mask_secret(&cfg.oauth_refresh_token));
    println!("Default page: {}", display_value(&cfg.page));
    println!(
        "Poll interval: {}",
        cfg.poll_interval_secs
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(|| "<default>".to_string())
    );

    Ok(())
}

fn run_logout() -> AppResult<()> {
    let mut cfg = StoredConfig::load()?;
    cfg.forget_credentials();
    cfg.save()?;
    println!("Stored credentials removed.");
    Ok(())
}

fn apply_prompt(field: &str, target: &mut Option<String>, secret: bool) -> AppResult<()> {
    match prompt(field, target.as_deref(), secret)? {
        PromptAction::Keep => {}
        PromptAction::Clear => *target = None,
        PromptAction::Set(value) => *target = Some(value),
    }
    Ok(())
}

fn prompt(field: &str, current: Option<&str>, secret: bool) -> AppResult<PromptAction> {
    let mut stdout = io::stdout();

    match (current, secret) {
        (Some(_), true) => write!(stdout, "{field} [****] (Enter to keep, '-' to clear): ")?,
        (Some(value), false) => {
            write!(stdout, "{field} [{value}] (Enter to keep, '-' to clear): ")?
        }
        (None, _) => write!(stdout, "{field} (Enter to skip): ")?,
    }
    stdout.flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(parse_answer(&input))
}

fn parse_answer(input: &str) -> PromptAction {
    match input.trim() {
        "" => PromptAction::Keep,
        "-" => PromptAction::Clear,
        value => PromptAction::Set(value.to_string()),
    }
}

fn display_value(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<not set>".to_string())
}

fn mask_secret(value: &Option<String>) -> String {
    match value {
        Some(token) if token.chars().count() > 6 => {
            let chars: Vec<char> = token.chars().collect();
            let prefix: String = chars[..3].iter().collect();
            let suffix: String = chars[chars.len() - 3..].iter().collect();
            format!("{prefix}***{suffix}")
        }
        Some(token) if !token.is_empty() => "***".to_string(),
        _ => "<not set>".to_string(),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PromptAction {
    Keep,
    Clear,
    Set(String),
}
