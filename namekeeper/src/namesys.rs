//!
//! Adapter over the external naming library.
//!
//! The library owns record signing, serialization and routing-layer
//! propagation; this module only drives its publish operation.
//!

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use pkarr::{Keypair, SignedPacket, SignedPacketBuilder};

/// Record lifetime used by [`NameSystem::publish`], the default expiry
/// policy.
pub const DEFAULT_RECORD_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors raised by a publish operation, propagated to callers verbatim.
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    /// The requested expiry instant does not lie in the future.
    #[error("record expiry must lie in the future")]
    ExpiryNotInFuture,
    #[error(transparent)]
    Dns(#[from] pkarr::dns::SimpleDnsError),
    #[error(transparent)]
    Sign(#[from] pkarr::errors::SignedPacketBuildError),
    #[error(transparent)]
    Dht(#[from] pkarr::errors::PublishError),
    /// Catch-all for [`NameSystem`] implementations outside this crate.
    #[error("publish failed: {0}")]
    Failed(String),
}

/// Publish capability of the external naming library. Assumed idempotent
/// per call: each call independently creates or overwrites the record for
/// that key.
#[async_trait]
pub trait NameSystem: Send + Sync + 'static {
    /// Publish a record binding `keypair`'s name to `content` with the
    /// library's default expiry policy.
    async fn publish(&self, keypair: &Keypair, content: &str) -> Result<(), PublishError>;

    /// Publish a record with an explicit expiry instant.
    async fn publish_with_eol(
        &self,
        keypair: &Keypair,
        content: &str,
        eol: SystemTime,
    ) -> Result<(), PublishError>;
}

/// Production [`NameSystem`] over a pkarr client: packs the content
/// reference into a signed TXT record with a TTL derived from the expiry
/// instant and hands it to the DHT.
#[derive(Debug, Clone)]
pub struct DhtNameSystem {
    client: pkarr::Client,
    record_lifetime: Duration,
}

impl DhtNameSystem {
    pub fn new(client: pkarr::Client) -> Self {
        Self::new_with_lifetime(client, DEFAULT_RECORD_LIFETIME)
    }

    pub fn new_with_lifetime(client: pkarr::Client, record_lifetime: Duration) -> Self {
        Self {
            client,
            record_lifetime,
        }
    }

    fn build_packet(
        &self,
        keypair: &Keypair,
        content: &str,
        ttl: u32,
    ) -> Result<SignedPacket, PublishError> {
        let packet = SignedPacketBuilder::default()
            .txt("_content".try_into()?, content.try_into()?, ttl)
            .build(keypair)?;
        Ok(packet)
    }
}

#[async_trait]
impl NameSystem for DhtNameSystem {
    async fn publish(&self, keypair: &Keypair, content: &str) -> Result<(), PublishError> {
        let eol = SystemTime::now() + self.record_lifetime;
        self.publish_with_eol(keypair, content, eol).await
    }

    async fn publish_with_eol(
        &self,
        keypair: &Keypair,
        content: &str,
        eol: SystemTime,
    ) -> Result<(), PublishError> {
        let remaining = eol
            .duration_since(SystemTime::now())
            .map_err(|_| PublishError::ExpiryNotInFuture)?;
        let ttl = remaining.as_secs().min(u32::MAX as u64) as u32;
        let packet = self.build_packet(keypair, content, ttl)?;
        self.client.publish(&packet, None).await?;
        tracing::debug!(
            "Published record for {} (ttl {ttl}s).",
            keypair.public_key()
        );
        Ok(())
    }
}
