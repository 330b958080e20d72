use crate::SecurityError;
use harbor_core::{OAuthProfile, TokenSet};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthPkceSession {
    pub authorization_url: String,
    pub csrf_state: String,
    pub pkce_verifier: String,
}

impl std::fmt::Debug for OAuthPkceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthPkceSession")
            .field("authorization_url", &self.authorization_url)
            .field("csrf_state", &"[REDACTED]")
            .field("pkce_verifier", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct OAuthWorkflow {
    profile: OAuthProfile,
    client_secret: Option<String>,
    http: reqwest::Client,
}

impl std::fmt::Debug for OAuthWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthWorkflow")
            .field("profile", &self.profile)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Known overly-broad scopes that should be rejected.
const DANGEROUS_SCOPES: &[&str] = &["*", "admin", "root", "full_access"];

impl OAuthWorkflow {
    /// Create a new OAuth workflow, validating the profile for security issues.
    pub fn new(profile: OAuthProfile, client_secret: Option<String>) -> Result<Self, SecurityError> {
        Self::validate_profile(&profile)?;
        // Token endpoints must not redirect; a redirect would leak the code or refresh token.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            profile,
            client_secret: client_secret.filter(|secret| !secret.trim().is_empty()),
            http,
        })
    }

    pub fn profile(&self) -> &OAuthProfile {
        &self.profile
    }

    fn validate_profile(profile: &OAuthProfile) -> Result<(), SecurityError> {
        if profile.auth_url.scheme() != "https" {
            return Err(SecurityError::OAuth(
                "Authorization URL must use HTTPS".to_string(),
            ));
        }
        if profile.token_url.scheme() != "https" {
            return Err(SecurityError::OAuth("Token URL must use HTTPS".to_string()));
        }

        // Loopback redirects may use plain HTTP; anything else must be HTTPS.
        let redirect_host = profile.redirect_url.host_str().unwrap_or("");
        let is_loopback = matches!(redirect_host, "127.0.0.1" | "localhost" | "[::1]");
        if !is_loopback && profile.redirect_url.scheme() != "https" {
            return Err(SecurityError::OAuth(
                "Redirect URL must use HTTPS unless it points to localhost".to_string(),
            ));
        }

        let client_id = profile.client_id.trim();
        if client_id.is_empty() {
            return Err(SecurityError::OAuth("Client ID is required".to_string()));
        }
        if client_id.len() > 512 {
            return Err(SecurityError::OAuth(
                "Client ID appears invalid (too long)".to_string(),
            ));
        }

        for scope in &profile.scopes {
            let lower = scope.to_lowercase();
            if DANGEROUS_SCOPES.iter().any(|&d| lower == d) {
                return Err(SecurityError::OAuth(format!(
                    "Scope '{scope}' is too broad and not allowed"
                )));
            }
        }

        if profile.auth_url.host_str().is_none() {
            return Err(SecurityError::OAuth(
                "Authorization URL must have a valid host".to_string(),
            ));
        }
        if profile.token_url.host_str().is_none() {
            return Err(SecurityError::OAuth(
                "Token URL must have a valid host".to_string(),
            ));
        }

        Ok(())
    }

    fn client(&self) -> Result<ConfiguredClient, SecurityError> {
        let mut client = BasicClient::new(ClientId::new(self.profile.client_id.clone()))
            .set_auth_uri(AuthUrl::new(self.profile.auth_url.as_str().to_string())?)
            .set_token_uri(TokenUrl::new(self.profile.token_url.as_str().to_string())?)
            .set_redirect_uri(RedirectUrl::new(
                self.profile.redirect_url.as_str().to_string(),
            )?);
        if let Some(secret) = &self.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        Ok(client)
    }

    pub fn begin_pkce_session(&self) -> Result<OAuthPkceSession, SecurityError> {
        let client = self.client()?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            // Both providers only hand out refresh tokens for offline consent.
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        for scope in &self.profile.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_state) = auth_request.url();

        Ok(OAuthPkceSession {
            authorization_url: auth_url.to_string(),
            csrf_state: csrf_state.secret().to_string(),
            pkce_verifier: pkce_verifier.secret().to_string(),
        })
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenSet, SecurityError> {
        let token = self
            .client()?
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| SecurityError::OAuth(err.to_string()))?;

        Ok(TokenSet {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|token| token.secret().to_string()),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
            scopes: self.granted_scopes(token.scopes()),
        })
    }

    /// Exchanges a refresh token. Providers that do not rotate refresh tokens
    /// omit one from the response, so the caller's token is carried forward.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, SecurityError> {
        let token = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| SecurityError::OAuth(err.to_string()))?;
        debug!(
            client_id = %self.profile.client_id,
            rotated = token.refresh_token().is_some(),
            "refresh token exchanged"
        );

        Ok(TokenSet {
            access_token: token.access_token().secret().to_string(),
            refresh_token: Some(
                token
                    .refresh_token()
                    .map(|token| token.secret().to_string())
                    .unwrap_or_else(|| refresh_token.to_string()),
            ),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
            scopes: self.granted_scopes(token.scopes()),
        })
    }

    fn granted_scopes(&self, granted: Option<&Vec<Scope>>) -> Vec<String> {
        match granted {
            Some(scopes) if !scopes.is_empty() => {
                scopes.iter().map(|scope| scope.to_string()).collect()
            }
            _ => self.profile.scopes.clone(),
        }
    }
}
