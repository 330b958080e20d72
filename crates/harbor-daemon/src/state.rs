use crate::secrets::RuntimeSecrets;
use anyhow::Context;
use harbor_automation::AutomationEngine;
use harbor_config::{AppConfig, ConfigManager, ProviderConfig};
use harbor_core::ProviderKind;
use harbor_provider::{ProviderRegistry, ProviderSettings, RegistryConfig, SubscriptionRequest};
use harbor_security::SecretStore;
use harbor_storage::Storage;
use harbor_sync::{
    AccountService, SchedulerSettings, SyncOrchestrator, SyncScheduler, SyncSettings, TokenManager,
    TokenSettings,
};
use std::time::Duration;
use tracing::info;

const KEYCHAIN_SERVICE: &str = "io.harbor.daemon";

pub struct DaemonState {
    pub(crate) config: AppConfig,
    pub(crate) scheduler: SyncScheduler,
}

impl DaemonState {
    pub async fn initialize() -> anyhow::Result<Self> {
        let config_manager = ConfigManager::new().context("initialize config manager")?;
        let config = config_manager.load().context("load app config")?;

        let secrets = RuntimeSecrets::resolve(&SecretStore::new(KEYCHAIN_SERVICE))
            .context("resolve runtime secrets")?;

        let db_path = config_manager.database_path(&config);
        let storage = Storage::connect(&db_path)
            .await
            .context("initialize sqlite storage")?;

        let registry = ProviderRegistry::from_config(registry_config(&config, &secrets)?)
            .context("build provider registry")?;
        info!(
            config = %config_manager.config_path().display(),
            database = %db_path.display(),
            providers = ?registry.kinds(),
            "harbor daemon initialized"
        );

        let scheduler = build_scheduler(&config, storage, registry, &secrets)?;
        Ok(Self { config, scheduler })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.sync.poll_interval_secs.max(1))
    }

    pub fn snooze_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.sync.snooze_sweep_interval_secs.max(1))
    }
}

fn build_scheduler(
    config: &AppConfig,
    storage: Storage,
    registry: ProviderRegistry,
    secrets: &RuntimeSecrets,
) -> anyhow::Result<SyncScheduler> {
    let tokens = TokenManager::new(
        storage.clone(),
        registry.clone(),
        secrets.cipher()?,
        token_settings(config),
    );
    let automation = AutomationEngine::new(storage.clone());
    let orchestrator = SyncOrchestrator::new(
        storage.clone(),
        registry.clone(),
        tokens.clone(),
        automation,
        sync_settings(config),
    );
    let accounts = AccountService::new(storage.clone(), registry, tokens);

    Ok(SyncScheduler::new(
        storage,
        orchestrator,
        accounts,
        scheduler_settings(config),
    ))
}

/// Providers without a client id are left out of the registry.
fn registry_config(config: &AppConfig, secrets: &RuntimeSecrets) -> anyhow::Result<RegistryConfig> {
    let settings = |kind: ProviderKind| -> anyhow::Result<Option<ProviderSettings>> {
        let provider: &ProviderConfig = config.providers.get(kind);
        if provider.client_id.trim().is_empty() {
            info!(provider = %kind, "no client id configured; provider disabled");
            return Ok(None);
        }
        Ok(Some(ProviderSettings {
            profile: provider
                .oauth_profile()
                .with_context(|| format!("invalid {kind} oauth settings"))?,
            client_secret: secrets.client_secret(kind).map(str::to_string),
            api_base: provider
                .api_base_url()
                .with_context(|| format!("invalid {kind} api_base"))?,
        }))
    };

    Ok(RegistryConfig {
        gmail: settings(ProviderKind::Gmail)?,
        microsoft: settings(ProviderKind::Microsoft)?,
    })
}

fn token_settings(config: &AppConfig) -> TokenSettings {
    TokenSettings {
        refresh_threshold: chrono::Duration::seconds(config.tokens.refresh_threshold_secs.max(0)),
        lock_ttl: chrono::Duration::seconds(config.tokens.lock_ttl_secs.max(1)),
        lock_wait: Duration::from_secs(config.tokens.lock_wait_secs),
        ..TokenSettings::default()
    }
}

fn sync_settings(config: &AppConfig) -> SyncSettings {
    SyncSettings {
        initial_page_size: config.sync.initial_page_size.max(1),
        contact_limit: config.sync.contact_limit,
        error_threshold: config.sync.error_threshold,
    }
}

fn scheduler_settings(config: &AppConfig) -> SchedulerSettings {
    let push = &config.push;
    let request = (push.gmail_topic.is_some() || push.webhook_url.is_some()).then(|| SubscriptionRequest {
        topic_name: push.gmail_topic.clone(),
        webhook_url: push.webhook_url.clone(),
        client_state: None,
    });

    SchedulerSettings {
        max_parallel_accounts: config.sync.max_parallel_accounts,
        renew_before: chrono::Duration::hours(push.renew_before_hours.max(1)),
        push: request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_security::TokenCipher;

    fn secrets() -> RuntimeSecrets {
        RuntimeSecrets {
            token_key: TokenCipher::generate_key(),
            gmail_client_secret: Some("gmail-secret".to_string()),
            microsoft_client_secret: None,
        }
    }

    #[test]
    fn providers_without_client_id_are_skipped() {
        let mut config = AppConfig::default();
        config.providers.gmail.client_id = "gmail-client".to_string();

        let registry = registry_config(&config, &secrets()).expect("registry config");
        let gmail = registry.gmail.expect("gmail enabled");
        assert_eq!(gmail.profile.client_id, "gmail-client");
        assert_eq!(gmail.client_secret.as_deref(), Some("gmail-secret"));
        assert!(registry.microsoft.is_none());
    }

    #[test]
    fn invalid_api_base_is_reported() {
        let mut config = AppConfig::default();
        config.providers.microsoft.client_id = "graph-client".to_string();
        config.providers.microsoft.api_base = Some("not a url".to_string());

        let err = registry_config(&config, &secrets()).expect_err("bad api base");
        assert!(err.to_string().contains("api_base"));
    }

    #[test]
    fn push_is_enabled_only_with_a_target() {
        let mut config = AppConfig::default();
        assert!(scheduler_settings(&config).push.is_none());

        config.push.webhook_url = Some("https://hooks.example.com/graph".to_string());
        config.push.renew_before_hours = 6;
        let settings = scheduler_settings(&config);
        let request = settings.push.expect("push enabled");
        assert_eq!(request.webhook_url.as_deref(), Some("https://hooks.example.com/graph"));
        assert_eq!(settings.renew_before, chrono::Duration::hours(6));
    }

    #[test]
    fn config_values_reach_the_services() {
        let mut config = AppConfig::default();
        config.tokens.refresh_threshold_secs = 120;
        config.sync.error_threshold = 5;

        assert_eq!(token_settings(&config).refresh_threshold, chrono::Duration::seconds(120));
        assert_eq!(sync_settings(&config).error_threshold, 5);
    }
}
