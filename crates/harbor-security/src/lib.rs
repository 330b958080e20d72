mod cipher;
mod error;
mod keychain;
mod oauth;

pub use cipher::TokenCipher;
pub use error::SecurityError;
pub use keychain::{SecretKey, SecretStore};
pub use oauth::{OAuthPkceSession, OAuthWorkflow};
