use crate::{GmailAdapter, MicrosoftGraphAdapter, ProviderAdapter, ProviderError};
use harbor_core::{OAuthProfile, ProviderKind};
use harbor_security::OAuthWorkflow;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Everything needed to stand up one provider's adapter.
#[derive(Clone)]
pub struct ProviderSettings {
    pub profile: OAuthProfile,
    pub client_secret: Option<String>,
    /// Overrides the provider's public API host.
    pub api_base: Option<Url>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("profile", &self.profile)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub gmail: Option<ProviderSettings>,
    pub microsoft: Option<ProviderSettings>,
}

/// Maps a provider kind to its adapter.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: RegistryConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();

        if let Some(settings) = config.gmail {
            let oauth = OAuthWorkflow::new(settings.profile, settings.client_secret)?;
            let adapter = match settings.api_base {
                Some(base) => GmailAdapter::with_api_base(oauth, base.as_str())?,
                None => GmailAdapter::new(oauth)?,
            };
            registry.register(Arc::new(adapter));
        }

        if let Some(settings) = config.microsoft {
            let oauth = OAuthWorkflow::new(settings.profile, settings.client_secret)?;
            let adapter = match settings.api_base {
                Some(base) => MicrosoftGraphAdapter::with_api_base(oauth, base.as_str())?,
                None => MicrosoftGraphAdapter::new(oauth)?,
            };
            registry.register(Arc::new(adapter));
        }

        Ok(registry)
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn adapter(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::Unsupported(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(auth: &str, token: &str) -> ProviderSettings {
        ProviderSettings {
            profile: OAuthProfile {
                client_id: "client".to_string(),
                auth_url: Url::parse(auth).expect("url"),
                token_url: Url::parse(token).expect("url"),
                redirect_url: Url::parse("http://127.0.0.1:8765/oauth/callback").expect("url"),
                scopes: Vec::new(),
            },
            client_secret: Some("shh".to_string()),
            api_base: None,
        }
    }

    #[test]
    fn builds_configured_adapters_only() {
        let registry = ProviderRegistry::from_config(RegistryConfig {
            gmail: Some(settings(
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
            )),
            microsoft: None,
        })
        .expect("registry");

        assert_eq!(registry.kinds(), vec![ProviderKind::Gmail]);
        assert_eq!(registry.adapter(ProviderKind::Gmail).expect("gmail").kind(), ProviderKind::Gmail);
        assert!(matches!(
            registry.adapter(ProviderKind::Microsoft),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_insecure_token_endpoint() {
        let result = ProviderRegistry::from_config(RegistryConfig {
            gmail: None,
            microsoft: Some(settings(
                "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                "http://login.microsoftonline.com/common/oauth2/v2.0/token",
            )),
        });
        assert!(matches!(result, Err(ProviderError::OAuth(_))));
    }

    #[test]
    fn settings_debug_hides_secret() {
        let rendered = format!(
            "{:?}",
            settings("https://accounts.google.com/auth", "https://oauth2.googleapis.com/token")
        );
        assert!(!rendered.contains("shh"));
    }
}
