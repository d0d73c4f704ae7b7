//!
//! Client for the remote key-management backend.
//!
//! Key material is owned entirely by the backend: every call is a fresh
//! remote round trip and nothing is cached in between, so a key revoked on
//! the backend stops resolving here immediately.
//!

use std::sync::Arc;

use async_trait::async_trait;
use pkarr::Keypair;

use crate::backend::BackendError;

/// Status sentinel carried in every key backend response. Anything other
/// than [`KeyStatus::Ok`] is a failure, even when the transport call itself
/// succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Ok,
    NotFound,
    /// Any status string this client does not know.
    Error,
}

/// Result of a `get_private_key` call: the backend's status sentinel plus
/// the raw key material on success.
#[derive(Debug, Clone)]
pub struct KeyResponse {
    pub status: KeyStatus,
    pub private_key: Vec<u8>,
}

/// Result of a `has_private_key` call.
#[derive(Debug, Clone)]
pub struct HasResponse {
    pub status: KeyStatus,
    pub exists: bool,
}

/// Remote key-management backend capability. Production talks HTTP
/// ([`crate::HttpKeyBackend`]); tests substitute a scripted fake.
#[async_trait]
pub trait KeyBackend: Send + Sync + 'static {
    async fn get_private_key(&self, name: &str) -> Result<KeyResponse, BackendError>;
    async fn has_private_key(&self, name: &str) -> Result<HasResponse, BackendError>;
    async fn put_private_key(&self, name: &str, secret: &[u8]) -> Result<KeyStatus, BackendError>;
}

#[derive(thiserror::Error, Debug)]
pub enum KeystoreError {
    /// Key material was rejected locally, before any remote call.
    #[error("invalid key material: {reason}")]
    InvalidKey { reason: &'static str },
    #[error("no key named \"{name}\" in the remote keystore")]
    KeyNotFound { name: String },
    /// The backend answered, but with a non-success status.
    #[error("key backend rejected the call for \"{name}\" with status {status:?}")]
    Rejected { name: String, status: KeyStatus },
    /// The backend could not be reached or its response was unusable.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The remote backend contract exposes no such primitive.
    #[error("the remote key backend does not support {operation}")]
    Unsupported { operation: &'static str },
}

impl KeystoreError {
    pub fn is_key_not_found(&self) -> bool {
        if let KeystoreError::KeyNotFound { .. } = self {
            return true;
        }
        false
    }

    pub fn is_invalid_key(&self) -> bool {
        if let KeystoreError::InvalidKey { .. } = self {
            return true;
        }
        false
    }

    pub fn is_unsupported(&self) -> bool {
        if let KeystoreError::Unsupported { .. } = self {
            return true;
        }
        false
    }
}

/// Thin client over the remote key backend. Holds no key material between
/// calls; the backend's state is the single source of truth.
#[derive(Clone)]
pub struct Keystore {
    backend: Arc<dyn KeyBackend>,
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore").finish_non_exhaustive()
    }
}

impl Keystore {
    pub fn new(backend: Arc<dyn KeyBackend>) -> Self {
        Self { backend }
    }

    /// Fetch the signing key for `name` from the remote backend.
    pub async fn get(&self, name: &str) -> Result<Keypair, KeystoreError> {
        let response = self.backend.get_private_key(name).await?;
        match response.status {
            KeyStatus::Ok => {}
            KeyStatus::NotFound => {
                return Err(KeystoreError::KeyNotFound {
                    name: name.to_string(),
                })
            }
            status => {
                return Err(KeystoreError::Rejected {
                    name: name.to_string(),
                    status,
                })
            }
        }
        let secret: [u8; 32] = response.private_key.as_slice().try_into().map_err(|_| {
            KeystoreError::InvalidKey {
                reason: "expected a 32 byte ed25519 secret",
            }
        })?;
        Ok(Keypair::from_secret_key(&secret))
    }

    /// Check whether the backend holds a key for `name`. A failing remote
    /// call is an error, never a `false` — "key absent" and "could not
    /// check" are distinct outcomes.
    pub async fn has(&self, name: &str) -> Result<bool, KeystoreError> {
        let response = self.backend.has_private_key(name).await?;
        match response.status {
            KeyStatus::Ok => Ok(response.exists),
            status => Err(KeystoreError::Rejected {
                name: name.to_string(),
                status,
            }),
        }
    }

    /// Store key material under `name`. Empty or malformed material is
    /// rejected locally before any remote call.
    pub async fn put(&self, name: &str, secret: &[u8]) -> Result<(), KeystoreError> {
        if secret.is_empty() {
            return Err(KeystoreError::InvalidKey {
                reason: "empty key material",
            });
        }
        if secret.len() != 32 {
            return Err(KeystoreError::InvalidKey {
                reason: "expected a 32 byte ed25519 secret",
            });
        }
        match self.backend.put_private_key(name, secret).await? {
            KeyStatus::Ok => Ok(()),
            status => Err(KeystoreError::Rejected {
                name: name.to_string(),
                status,
            }),
        }
    }

    /// Not supported: the remote backend contract exposes no deletion
    /// primitive. A backend that gains one must thread the capability
    /// through explicitly rather than silently succeed here.
    pub async fn delete(&self, _name: &str) -> Result<(), KeystoreError> {
        Err(KeystoreError::Unsupported {
            operation: "delete",
        })
    }

    /// Not supported: the remote backend contract exposes no enumeration
    /// primitive.
    pub async fn list(&self) -> Result<Vec<String>, KeystoreError> {
        Err(KeystoreError::Unsupported { operation: "list" })
    }
}
