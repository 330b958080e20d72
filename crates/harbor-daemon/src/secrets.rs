use anyhow::Context;
use harbor_core::ProviderKind;
use harbor_security::{SecretKey, SecretStore, TokenCipher};
use std::fmt;
use tracing::info;

pub(crate) const TOKEN_KEY_ENV: &str = "HARBOR_TOKEN_KEY";
pub(crate) const GMAIL_SECRET_ENV: &str = "HARBOR_GMAIL_CLIENT_SECRET";
pub(crate) const MICROSOFT_SECRET_ENV: &str = "HARBOR_MICROSOFT_CLIENT_SECRET";

/// Secrets resolved once at start-up. Nothing below the daemon reads the
/// environment or the keychain itself.
pub(crate) struct RuntimeSecrets {
    pub(crate) token_key: String,
    pub(crate) gmail_client_secret: Option<String>,
    pub(crate) microsoft_client_secret: Option<String>,
}

impl fmt::Debug for RuntimeSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeSecrets")
            .field("token_key", &"[REDACTED]")
            .field("gmail_client_secret", &self.gmail_client_secret.as_ref().map(|_| "[REDACTED]"))
            .field(
                "microsoft_client_secret",
                &self.microsoft_client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RuntimeSecrets {
    pub(crate) fn resolve(store: &SecretStore) -> anyhow::Result<Self> {
        Self::resolve_with(store, |name| std::env::var(name).ok())
    }

    /// Environment first, keychain second. A missing token key is generated
    /// and written to the keychain so stored credentials stay readable
    /// across restarts.
    pub(crate) fn resolve_with(
        store: &SecretStore,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let lookup = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let token_key = match lookup(TOKEN_KEY_ENV) {
            Some(key) => key,
            None => match store
                .get(&SecretKey::token_encryption_key())
                .context("read token encryption key from keychain")?
            {
                Some(key) => key,
                None => {
                    let key = TokenCipher::generate_key();
                    store
                        .set(&SecretKey::token_encryption_key(), &key)
                        .context("store generated token encryption key")?;
                    info!(service = store.service_name(), "generated token encryption key");
                    key
                }
            },
        };
        TokenCipher::from_base64(&token_key).context("token encryption key is not a valid 32-byte key")?;

        let client_secret = |kind: ProviderKind, var: &str| -> anyhow::Result<Option<String>> {
            if let Some(secret) = lookup(var) {
                return Ok(Some(secret));
            }
            store
                .get(&SecretKey::client_secret(kind))
                .with_context(|| format!("read {kind} client secret from keychain"))
        };

        Ok(Self {
            token_key,
            gmail_client_secret: client_secret(ProviderKind::Gmail, GMAIL_SECRET_ENV)?,
            microsoft_client_secret: client_secret(ProviderKind::Microsoft, MICROSOFT_SECRET_ENV)?,
        })
    }

    pub(crate) fn cipher(&self) -> anyhow::Result<TokenCipher> {
        TokenCipher::from_base64(&self.token_key).context("build token cipher")
    }

    pub(crate) fn client_secret(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Gmail => self.gmail_client_secret.as_deref(),
            ProviderKind::Microsoft => self.microsoft_client_secret.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn environment_wins_and_debug_redacts() {
        let key = TokenCipher::generate_key();
        let store = SecretStore::new("io.harbor.test");
        let secrets = RuntimeSecrets::resolve_with(
            &store,
            env_of(&[
                (TOKEN_KEY_ENV, key.as_str()),
                (GMAIL_SECRET_ENV, "gmail-secret"),
                (MICROSOFT_SECRET_ENV, "graph-secret"),
            ]),
        )
        .expect("resolve");

        assert_eq!(secrets.client_secret(ProviderKind::Gmail), Some("gmail-secret"));
        assert_eq!(secrets.client_secret(ProviderKind::Microsoft), Some("graph-secret"));
        assert!(secrets.cipher().is_ok());

        let debug = format!("{secrets:?}");
        assert!(!debug.contains(&key));
        assert!(!debug.contains("gmail-secret"));
        assert!(!debug.contains("graph-secret"));
    }

    #[test]
    fn rejects_a_malformed_token_key() {
        let store = SecretStore::new("io.harbor.test");
        let err = RuntimeSecrets::resolve_with(
            &store,
            env_of(&[
                (TOKEN_KEY_ENV, "c2hvcnQ="),
                (GMAIL_SECRET_ENV, "gmail-secret"),
                (MICROSOFT_SECRET_ENV, "graph-secret"),
            ]),
        )
        .expect_err("short key");
        assert!(err.to_string().contains("32-byte"));
    }
}
