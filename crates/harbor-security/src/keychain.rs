use crate::SecurityError;
use harbor_core::ProviderKind;

/// OS keychain wrapper for secrets that must not live in the config file.
#[derive(Debug, Clone)]
pub struct SecretStore {
    service_name: String,
}

#[derive(Debug, Clone)]
pub struct SecretKey {
    pub namespace: String,
    pub id: String,
}

impl SecretKey {
    pub fn token_encryption_key() -> Self {
        Self {
            namespace: "tokens".to_string(),
            id: "encryption-key".to_string(),
        }
    }

    pub fn client_secret(provider: ProviderKind) -> Self {
        Self {
            namespace: "oauth-client".to_string(),
            id: provider.as_str().to_string(),
        }
    }

    pub fn as_username(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }
}

impl SecretStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn set(&self, key: &SecretKey, value: &str) -> Result<(), SecurityError> {
        let entry = keyring::Entry::new(&self.service_name, &key.as_username())?;
        entry.set_password(value)?;
        Ok(())
    }

    pub fn get(&self, key: &SecretKey) -> Result<Option<String>, SecurityError> {
        let entry = keyring::Entry::new(&self.service_name, &key.as_username())?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_provider() {
        assert_eq!(
            SecretKey::client_secret(ProviderKind::Microsoft).as_username(),
            "oauth-client:microsoft"
        );
        assert_eq!(
            SecretKey::token_encryption_key().as_username(),
            "tokens:encryption-key"
        );
    }
}
