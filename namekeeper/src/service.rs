//!
//! The caller-facing naming facade and service lifecycle: validates publish
//! requests, delegates the cryptographic publish to the naming library,
//! tracks managed keys in the publication cache and owns the republish
//! scheduler.
//!

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pkarr::Keypair;
use url::Url;

use crate::backend::HttpKeyBackend;
use crate::cache::RecordCache;
use crate::keystore::{KeyBackend, Keystore, KeystoreError};
use crate::namesys::{DhtNameSystem, NameSystem, PublishError, DEFAULT_RECORD_LIFETIME};
use crate::network::{DhtNetwork, Network};
use crate::republisher::{CycleError, CycleOutcome, Republisher, DEFAULT_REPUBLISH_INTERVAL};

/// Errors from building a [`NameService`].
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("a key backend URL or an injected key backend is required")]
    MissingKeyBackend,
    #[error("Failed to build the pkarr client: {0}")]
    Pkarr(#[from] pkarr::errors::BuildError),
}

/// Caller-facing publish failure.
#[derive(thiserror::Error, Debug)]
pub enum ServicePublishError {
    /// The key is already under active management and
    /// [`ServiceSettings::allow_republish_via_publish`] is disabled; the
    /// republish cycle is the only refresh path in that configuration.
    #[error("\"{key_id}\" is already under active management")]
    AlreadyManaged { key_id: String },
    /// The naming library's error, propagated verbatim. No retry.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl ServicePublishError {
    pub fn is_already_managed(&self) -> bool {
        if let ServicePublishError::AlreadyManaged { .. } = self {
            return true;
        }
        false
    }
}

/// Settings for creating a [`NameService`].
#[derive(Clone)]
pub struct ServiceSettings {
    key_backend_url: Option<Url>,
    key_backend: Option<Arc<dyn KeyBackend>>,
    namesys: Option<Arc<dyn NameSystem>>,
    network: Option<Arc<dyn Network>>,
    pkarr_client: Option<pkarr::Client>,
    bootstrap_nodes: Option<Vec<String>>,
    republish_interval: Duration,
    record_lifetime: Duration,
    allow_republish_via_publish: bool,
}

impl std::fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("key_backend_url", &self.key_backend_url)
            .field("bootstrap_nodes", &self.bootstrap_nodes)
            .field("republish_interval", &self.republish_interval)
            .field("record_lifetime", &self.record_lifetime)
            .field(
                "allow_republish_via_publish",
                &self.allow_republish_via_publish,
            )
            .finish_non_exhaustive()
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            key_backend_url: None,
            key_backend: None,
            namesys: None,
            network: None,
            pkarr_client: None,
            bootstrap_nodes: None,
            republish_interval: DEFAULT_REPUBLISH_INTERVAL,
            record_lifetime: DEFAULT_RECORD_LIFETIME,
            allow_republish_via_publish: true,
        }
    }
}

impl ServiceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote key-management backend to fetch signing keys from.
    pub fn key_backend_url(&mut self, url: Url) -> &mut Self {
        self.key_backend_url = Some(url);
        self
    }

    /// Inject a key backend directly instead of the HTTP client.
    pub fn key_backend(&mut self, backend: Arc<dyn KeyBackend>) -> &mut Self {
        self.key_backend = Some(backend);
        self
    }

    /// Inject a naming library implementation.
    pub fn name_system(&mut self, namesys: Arc<dyn NameSystem>) -> &mut Self {
        self.namesys = Some(namesys);
        self
    }

    /// Inject a network handle implementation.
    pub fn network(&mut self, network: Arc<dyn Network>) -> &mut Self {
        self.network = Some(network);
        self
    }

    /// Set a custom pkarr client backing the default naming library and
    /// network handle.
    pub fn pkarr_client(&mut self, client: pkarr::Client) -> &mut Self {
        self.pkarr_client = Some(client);
        self
    }

    /// Bootstrap from these DHT nodes instead of the default network. The
    /// nodes are handed to the routing layer's builder as-is.
    pub fn bootstrap_nodes(&mut self, nodes: &[String]) -> &mut Self {
        self.bootstrap_nodes = Some(nodes.to_vec());
        self
    }

    /// Period between republish cycles.
    pub fn republish_interval(&mut self, period: Duration) -> &mut Self {
        self.republish_interval = period;
        self
    }

    /// Lifetime of records published under the default expiry policy, and
    /// the extension applied on every republish.
    pub fn record_lifetime(&mut self, lifetime: Duration) -> &mut Self {
        self.record_lifetime = lifetime;
        self
    }

    /// Whether `publish` may re-publish a key that is already under active
    /// management. Allowed by default; when disabled, such publishes fail
    /// with [`ServicePublishError::AlreadyManaged`].
    pub fn allow_republish_via_publish(&mut self, allow: bool) -> &mut Self {
        self.allow_republish_via_publish = allow;
        self
    }
}

/// The record lifecycle manager: publishes name records, tracks the set of
/// actively managed keys and keeps their records fresh on the DHT.
pub struct NameService {
    cache: RecordCache,
    keystore: Keystore,
    namesys: Arc<dyn NameSystem>,
    network: Arc<dyn Network>,
    republisher: Republisher,
    allow_republish_via_publish: bool,
}

impl std::fmt::Debug for NameService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameService")
            .field("cache", &self.cache)
            .field("republisher", &self.republisher)
            .finish_non_exhaustive()
    }
}

impl NameService {
    /// Build the service and start the republish scheduler.
    pub async fn start(settings: ServiceSettings) -> Result<Self, BuildError> {
        let backend: Arc<dyn KeyBackend> = match (&settings.key_backend, &settings.key_backend_url)
        {
            (Some(backend), _) => backend.clone(),
            (None, Some(url)) => Arc::new(HttpKeyBackend::new(url.clone())),
            (None, None) => return Err(BuildError::MissingKeyBackend),
        };
        let keystore = Keystore::new(backend);

        // One pkarr client backs both the naming library and the network
        // handle unless both are injected.
        let (namesys, network) = match (settings.namesys, settings.network) {
            (Some(namesys), Some(network)) => (namesys, network),
            (namesys, network) => {
                let client = match settings.pkarr_client {
                    Some(client) => client,
                    None => {
                        let mut builder = pkarr::Client::builder();
                        if let Some(nodes) = &settings.bootstrap_nodes {
                            builder.no_default_network().bootstrap(nodes).no_relays();
                        }
                        builder.build()?
                    }
                };
                let namesys = namesys.unwrap_or_else(|| {
                    Arc::new(DhtNameSystem::new_with_lifetime(
                        client.clone(),
                        settings.record_lifetime,
                    ))
                });
                let network = network.unwrap_or_else(|| Arc::new(DhtNetwork::new(client)));
                (namesys, network)
            }
        };

        let cache = RecordCache::new();
        let republisher = Republisher::new(
            cache.clone(),
            keystore.clone(),
            namesys.clone(),
            settings.republish_interval,
            settings.record_lifetime,
        );
        republisher.start();

        Ok(Self {
            cache,
            keystore,
            namesys,
            network,
            republisher,
            allow_republish_via_publish: settings.allow_republish_via_publish,
        })
    }

    /// Publish a record under the naming library's default expiry policy.
    ///
    /// With `cache` enabled, a successful publish puts the key under active
    /// management so the scheduler keeps its record fresh. Errors from the
    /// naming library propagate verbatim; this layer adds no retry.
    pub async fn publish(
        &self,
        keypair: &Keypair,
        cache: bool,
        key_id: &str,
        content: &str,
    ) -> Result<(), ServicePublishError> {
        self.check_republish_policy(key_id)?;
        self.namesys.publish(keypair, content).await?;
        if cache {
            self.cache.set(key_id, content);
        }
        Ok(())
    }

    /// Publish a record with an explicit expiry instant instead of the
    /// default lifetime.
    pub async fn publish_with_eol(
        &self,
        keypair: &Keypair,
        eol: SystemTime,
        cache: bool,
        key_id: &str,
        content: &str,
    ) -> Result<(), ServicePublishError> {
        self.check_republish_policy(key_id)?;
        self.namesys.publish_with_eol(keypair, content, eol).await?;
        if cache {
            self.cache.set(key_id, content);
        }
        Ok(())
    }

    fn check_republish_policy(&self, key_id: &str) -> Result<(), ServicePublishError> {
        if !self.allow_republish_via_publish && self.cache.has(key_id) {
            return Err(ServicePublishError::AlreadyManaged {
                key_id: key_id.to_string(),
            });
        }
        Ok(())
    }

    /// Fetch a signing key from the remote keystore.
    pub async fn get_key(&self, name: &str) -> Result<Keypair, KeystoreError> {
        self.keystore.get(name).await
    }

    /// Check whether the remote keystore holds a key for `name`.
    pub async fn has_key(&self, name: &str) -> Result<bool, KeystoreError> {
        self.keystore.has(name).await
    }

    /// Read-only view of the publication cache.
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Run one republish cycle immediately, outside the periodic schedule.
    pub async fn republish_once(&self) -> Result<CycleOutcome, CycleError> {
        self.republisher.republish_once().await
    }

    /// Wait until the routing layer has joined the DHT.
    pub async fn default_bootstrap(&self) {
        self.network.bootstrapped().await
    }

    /// Stop the republish scheduler, then release the network handles, in
    /// that order. Individual close failures are logged, never raised.
    pub async fn close(&self) {
        self.republisher.stop().await;
        if let Err(e) = self.network.close() {
            tracing::warn!("Error shutting down the routing layer: {e}");
        }
    }
}
