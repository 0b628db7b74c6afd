use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::panel::notifications::DEFAULT_LIFETIME;
use crate::panel::tracker::DEFAULT_COOLDOWN;
use crate::workflow::polling::{DEFAULT_POLL_INTERVAL, DEFAULT_RESCAN_DEBOUNCE};

pub const ENV_JIRA_URL: &str = "SPOTTER_JIRA_URL";
pub const ENV_JIRA_EMAIL: &str = "SPOTTER_JIRA_EMAIL";
pub const ENV_JIRA_TOKEN: &str = "SPOTTER_JIRA_TOKEN";
pub const ENV_PAGE: &str = "SPOTTER_PAGE";
pub const ENV_POLL_INTERVAL: &str = "SPOTTER_POLL_INTERVAL_SECS";

const CONFIG_FILE: &str = "config.json";

/// What lives in `config.json`. Every field is optional so a partial file
/// still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescan_debounce_ms: Option<u64>,
}

impl StoredConfig {
    pub fn load() -> AppResult<Self> {
        let path = config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|err| {
            AppError::Configuration(format!("failed to parse {}: {err}", path.display()))
        })
    }

    pub fn save(&self) -> AppResult<()> {
        let directory = config_directory()?;
        fs::create_dir_all(&directory)?;
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| AppError::Configuration(format!("failed to encode config: {err}")))?;
        fs::write(directory.join(CONFIG_FILE), raw)?;
        Ok(())
    }

    pub fn store_oauth_tokens(&mut self, credentials: &OAuthCredentials) {
        self.oauth_access_token = Some(credentials.access_token.clone());
        self.oauth_refresh_token = Some(credentials.refresh_token.clone());
    }

    pub fn forget_credentials(&mut self) {
        self.auth_kind = None;
        self.jira_email = None;
        self.jira_token = None;
        self.oauth_access_token = None;
        self.oauth_refresh_token = None;
        self.oauth_client_id = None;
        self.oauth_client_secret = None;
    }
}

pub fn config_directory() -> AppResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("spotter"))
        .ok_or_else(|| AppError::Configuration("could not determine config directory".to_string()))
}

pub fn config_file_path() -> AppResult<PathBuf> {
    Ok(config_directory()?.join(CONFIG_FILE))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JiraAuth {
    Basic { email: String, token: String },
    Bearer { token: String },
    OAuth(OAuthCredentials),
}

pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jira_base_url: Option<String>,
    pub auth: Option<JiraAuth>,
    pub page: Option<String>,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub notification_lifetime: Duration,
    pub rescan_debounce: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jira_base_url: None,
            auth: None,
            page: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            notification_lifetime: DEFAULT_LIFETIME,
            rescan_debounce: DEFAULT_RESCAN_DEBOUNCE,
        }
    }
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let stored = StoredConfig::load()?;
        Self::resolve(stored, |key| env::var(key).ok())
    }

    pub fn resolve(stored: StoredConfig, lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let env_value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let poll_interval = match env_value(ENV_POLL_INTERVAL) {
            Some(raw) => parse_interval(&raw)?,
            None => match stored.poll_interval_secs {
                Some(secs) => interval_from_secs(secs)?,
                None => DEFAULT_POLL_INTERVAL,
            },
        };

        let auth = resolve_auth(&stored, &env_value)?;

        Ok(Self {
            jira_base_url: env_value(ENV_JIRA_URL).or(stored.jira_base_url),
            auth,
            page: env_value(ENV_PAGE).or(stored.page),
            poll_interval,
            cooldown: stored
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COOLDOWN),
            notification_lifetime: stored
                .notification_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LIFETIME),
            rescan_debounce: stored
                .rescan_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RESCAN_DEBOUNCE),
        })
    }

    pub fn tracker_details(&self) -> AppResult<(&str, &JiraAuth)> {
        let base_url = self
            .jira_base_url
            .as_deref()
            .ok_or_else(|| AppError::Configuration("Jira base URL not configured".to_string()))?;
        let auth = self.auth.as_ref().ok_or_else(|| {
            AppError::Configuration(
                "Jira credentials not configured; run `spotter config init`".to_string(),
            )
        })?;
        Ok((base_url, auth))
    }
}

pub fn parse_interval(raw: &str) -> AppResult<Duration> {
    let secs: u64 = raw.trim().parse().map_err(|_| {
        AppError::Configuration(format!("poll interval '{raw}' is not a whole number of seconds"))
    })?;
    interval_from_secs(secs)
}

pub fn interval_from_secs(secs: u64) -> AppResult<Duration> {
    if secs == 0 {
        return Err(AppError::Configuration(
            "poll interval must be at least one second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn resolve_auth(
    stored: &StoredConfig,
    env_value: &impl Fn(&str) -> Option<String>,
) -> AppResult<Option<JiraAuth>> {
    let email = env_value(ENV_JIRA_EMAIL).or_else(|| stored.jira_email.clone());
    let token = env_value(ENV_JIRA_TOKEN).or_else(|| stored.jira_token.clone());
    let kind = stored.auth_kind.as_deref().map(str::to_lowercase);

    match kind.as_deref() {
        Some("oauth") => {
            let field = |value: &Option<String>, name: &str| {
                value.clone().ok_or_else(|| {
                    AppError::Configuration(format!("OAuth {name} not configured"))
                })
            };
            Ok(Some(JiraAuth::OAuth(OAuthCredentials {
                access_token: field(&stored.oauth_access_token, "access token")?,
                refresh_token: field(&stored.oauth_refresh_token, "refresh token")?,
                client_id: field(&stored.oauth_client_id, "client id")?,
                client_secret: field(&stored.oauth_client_secret, "client secret")?,
                token_url: stored
                    .oauth_token_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OAUTH_TOKEN_URL.to_string()),
            })))
        }
        Some("bearer") => Ok(token.map(|token| JiraAuth::Bearer { token })),
        Some("basic") | None => Ok(match (email, token) {
            (Some(email), Some(token)) => Some(JiraAuth::Basic { email, token }),
            (None, Some(token)) if kind.is_none() => Some(JiraAuth::Bearer { token }),
            _ => None,
        }),
        Some(other) => Err(AppError::Configuration(format!(
            "unknown auth kind '{other}', expected basic, bearer or oauth"
        ))),
    }
}
