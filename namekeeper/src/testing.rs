//!
//! Scripted test doubles for the collaborator seams: the naming library,
//! the remote key backend and the network handle. Used by this crate's
//! tests and, behind the `testing` feature, by downstream embedders.
//!

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use pkarr::{Keypair, PublicKey};

use crate::backend::BackendError;
use crate::keystore::{HasResponse, KeyBackend, KeyResponse, KeyStatus};
use crate::namesys::{NameSystem, PublishError};
use crate::network::{Network, NetworkCloseError};

/// One observed publish call.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub public_key: PublicKey,
    pub content: String,
    /// `None` for publishes under the default expiry policy.
    pub eol: Option<SystemTime>,
}

/// [`NameSystem`] fake with scripted results and a call log.
#[derive(Default)]
pub struct FakeNameSystem {
    queued: Mutex<VecDeque<Result<(), PublishError>>>,
    failing_content: Mutex<HashSet<String>>,
    published: Mutex<Vec<PublishRecord>>,
}

impl FakeNameSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result of the next unscripted publish call. Queued
    /// results are consumed in order; once drained, calls succeed.
    pub fn queue_result(&self, result: Result<(), PublishError>) {
        self.queued.lock().expect("fake lock poisoned").push_back(result);
    }

    /// Make every publish for `content` fail, regardless of call order.
    pub fn fail_for_content(&self, content: &str) {
        self.failing_content
            .lock()
            .expect("fake lock poisoned")
            .insert(content.to_string());
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().expect("fake lock poisoned").len()
    }

    /// Every publish observed so far, in call order.
    pub fn published(&self) -> Vec<PublishRecord> {
        self.published.lock().expect("fake lock poisoned").clone()
    }

    fn next_result(&self, content: &str) -> Result<(), PublishError> {
        let failing = self.failing_content.lock().expect("fake lock poisoned");
        if failing.contains(content) {
            return Err(PublishError::Failed(format!(
                "scripted failure for {content}"
            )));
        }
        drop(failing);
        self.queued
            .lock()
            .expect("fake lock poisoned")
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn record(&self, keypair: &Keypair, content: &str, eol: Option<SystemTime>) {
        self.published
            .lock()
            .expect("fake lock poisoned")
            .push(PublishRecord {
                public_key: keypair.public_key(),
                content: content.to_string(),
                eol,
            });
    }
}

#[async_trait]
impl NameSystem for FakeNameSystem {
    async fn publish(&self, keypair: &Keypair, content: &str) -> Result<(), PublishError> {
        self.record(keypair, content, None);
        self.next_result(content)
    }

    async fn publish_with_eol(
        &self,
        keypair: &Keypair,
        content: &str,
        eol: SystemTime,
    ) -> Result<(), PublishError> {
        self.record(keypair, content, Some(eol));
        self.next_result(content)
    }
}

/// [`KeyBackend`] fake: an in-memory key table with per-name status
/// overrides, scripted transport failures and a remote-call counter.
#[derive(Default)]
pub struct FakeKeyBackend {
    keys: Mutex<HashMap<String, Vec<u8>>>,
    statuses: Mutex<HashMap<String, KeyStatus>>,
    failing_transport: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeKeyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `secret` for `name` with an `Ok` status.
    pub fn insert(&self, name: &str, secret: &[u8]) {
        self.keys
            .lock()
            .expect("fake lock poisoned")
            .insert(name.to_string(), secret.to_vec());
    }

    /// Answer every call for `name` with `status` instead of the real
    /// lookup result.
    pub fn set_status(&self, name: &str, status: KeyStatus) {
        self.statuses
            .lock()
            .expect("fake lock poisoned")
            .insert(name.to_string(), status);
    }

    /// Fail every call for `name` at the transport level.
    pub fn fail_transport(&self, name: &str) {
        self.failing_transport
            .lock()
            .expect("fake lock poisoned")
            .insert(name.to_string());
    }

    /// Number of calls that reached this backend.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn check_transport(&self, name: &str) -> Result<(), BackendError> {
        let failing = self.failing_transport.lock().expect("fake lock poisoned");
        if failing.contains(name) {
            return Err(BackendError::Http {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(())
    }

    fn status_override(&self, name: &str) -> Option<KeyStatus> {
        self.statuses
            .lock()
            .expect("fake lock poisoned")
            .get(name)
            .copied()
    }
}

#[async_trait]
impl KeyBackend for FakeKeyBackend {
    async fn get_private_key(&self, name: &str) -> Result<KeyResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.check_transport(name)?;
        if let Some(status) = self.status_override(name) {
            return Ok(KeyResponse {
                status,
                private_key: Vec::new(),
            });
        }
        match self.keys.lock().expect("fake lock poisoned").get(name) {
            Some(secret) => Ok(KeyResponse {
                status: KeyStatus::Ok,
                private_key: secret.clone(),
            }),
            None => Ok(KeyResponse {
                status: KeyStatus::NotFound,
                private_key: Vec::new(),
            }),
        }
    }

    async fn has_private_key(&self, name: &str) -> Result<HasResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.check_transport(name)?;
        if let Some(status) = self.status_override(name) {
            return Ok(HasResponse {
                status,
                exists: false,
            });
        }
        let exists = self
            .keys
            .lock()
            .expect("fake lock poisoned")
            .contains_key(name);
        Ok(HasResponse {
            status: KeyStatus::Ok,
            exists,
        })
    }

    async fn put_private_key(&self, name: &str, secret: &[u8]) -> Result<KeyStatus, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.check_transport(name)?;
        if let Some(status) = self.status_override(name) {
            return Ok(status);
        }
        self.insert(name, secret);
        Ok(KeyStatus::Ok)
    }
}

/// [`Network`] fake that records bootstrap and close calls.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    bootstrap_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_close: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::Relaxed);
    }

    pub fn bootstrap_count(&self) -> usize {
        self.bootstrap_calls.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn bootstrapped(&self) {
        self.bootstrap_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn close(&self) -> Result<(), NetworkCloseError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_close.load(Ordering::Relaxed) {
            return Err(NetworkCloseError {
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}
