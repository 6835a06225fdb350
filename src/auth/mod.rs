pub mod credential;
pub mod manager;
pub mod oauth;
pub mod store;

pub use credential::{Credential, CredentialKey, CredentialState, TokenGrant};
pub use manager::{CredentialManager, ValidAccessToken};
pub use oauth::{OAuthRefresher, TokenRefresher};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
