//!
//! The routing-layer handle: opaque, injected at service construction,
//! used only for bootstrap readiness and shutdown.
//!

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
#[error("failed to close the routing layer: {reason}")]
pub struct NetworkCloseError {
    pub reason: String,
}

/// Peer-networking capability consumed by the service. Production wraps
/// the DHT client; tests substitute a fake.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Wait until the routing layer has joined the network.
    async fn bootstrapped(&self);

    /// Release the underlying network handles. Failures are reported to
    /// the caller for logging, never escalated further.
    fn close(&self) -> Result<(), NetworkCloseError>;
}

/// Production [`Network`] over the pkarr client's embedded mainline DHT.
#[derive(Debug, Clone)]
pub struct DhtNetwork {
    client: pkarr::Client,
}

impl DhtNetwork {
    pub fn new(client: pkarr::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for DhtNetwork {
    async fn bootstrapped(&self) {
        // None when the client was built without a DHT (relays only);
        // nothing to wait for in that case.
        if let Some(dht) = self.client.dht() {
            dht.as_async().bootstrapped().await;
        }
    }

    fn close(&self) -> Result<(), NetworkCloseError> {
        // The pkarr client shuts its actor down when the last clone is
        // dropped; releasing this handle is all there is to do.
        tracing::debug!("Releasing the DHT network handle.");
        Ok(())
    }
}
