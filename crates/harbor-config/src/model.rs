use harbor_core::{OAuthProfile, ProviderKind};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    pub max_parallel_accounts: usize,
    pub initial_page_size: u32,
    pub contact_limit: u32,
    pub error_threshold: u32,
    pub snooze_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_threshold_secs: i64,
    pub lock_ttl_secs: i64,
    pub lock_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub gmail: ProviderConfig,
    pub microsoft: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Gmail => &self.gmail,
            ProviderKind::Microsoft => &self.microsoft,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl ProviderConfig {
    pub fn oauth_profile(&self) -> Result<OAuthProfile, ConfigError> {
        Ok(OAuthProfile {
            client_id: self.client_id.clone(),
            auth_url: parse_url("auth_url", &self.auth_url)?,
            token_url: parse_url("token_url", &self.token_url)?,
            redirect_url: parse_url("redirect_url", &self.redirect_url)?,
            scopes: self.scopes.clone(),
        })
    }

    pub fn api_base_url(&self) -> Result<Option<Url>, ConfigError> {
        self.api_base
            .as_deref()
            .map(|raw| parse_url("api_base", raw))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub gmail_topic: Option<String>,
    pub webhook_url: Option<String>,
    pub renew_before_hours: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: 300,
            lock_ttl_secs: 60,
            lock_wait_secs: 30,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gmail_topic: None,
            webhook_url: None,
            renew_before_hours: 24,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            database: DatabaseConfig {
                file_name: "harbor.sqlite3".to_string(),
            },
            sync: SyncConfig {
                poll_interval_secs: 120,
                max_parallel_accounts: 4,
                initial_page_size: 50,
                contact_limit: 100,
                error_threshold: 3,
                snooze_sweep_interval_secs: 60,
            },
            tokens: TokenConfig::default(),
            providers: ProvidersConfig {
                gmail: ProviderConfig {
                    client_id: String::new(),
                    auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                    token_url: "https://oauth2.googleapis.com/token".to_string(),
                    redirect_url: "http://127.0.0.1:8765/oauth/callback".to_string(),
                    scopes: vec![
                        "https://www.googleapis.com/auth/gmail.modify".to_string(),
                        "https://www.googleapis.com/auth/gmail.send".to_string(),
                        "https://www.googleapis.com/auth/calendar".to_string(),
                        "https://www.googleapis.com/auth/contacts.readonly".to_string(),
                        "openid".to_string(),
                        "email".to_string(),
                    ],
                    api_base: None,
                },
                microsoft: ProviderConfig {
                    client_id: String::new(),
                    auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                        .to_string(),
                    token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token"
                        .to_string(),
                    redirect_url: "http://localhost:8765/oauth/callback".to_string(),
                    scopes: vec![
                        "offline_access".to_string(),
                        "User.Read".to_string(),
                        "Mail.ReadWrite".to_string(),
                        "Mail.Send".to_string(),
                        "Calendars.ReadWrite".to_string(),
                        "Contacts.Read".to_string(),
                    ],
                    api_base: None,
                },
            },
            push: PushConfig::default(),
        }
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
}
