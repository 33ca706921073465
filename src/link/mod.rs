//! Wireless transport link
//!
//! Owns the network association lifecycle below the broker session:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!                      ▲  (poll until associated)
//! ```
//!
//! Association is requested once and then polled at a fixed interval until
//! it comes up. There is no retry bound and no timeout: the device has no
//! other job, so the link layer waits forever. The actual radio/OS backend
//! sits behind [`Station`]; the production backend drives NetworkManager
//! (see [`station`]).

pub mod station;

pub use station::NmcliStation;

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::NetworkConfig;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// Link errors
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to run network backend: {0}")]
    BackendError(#[from] std::io::Error),

    #[error("Association rejected: {0}")]
    AssociationFailed(String),
}

/// Network backend seam: kicks off an association and reports its status.
#[allow(async_fn_in_trait)]
pub trait Station {
    async fn request_association(
        &mut self,
        ssid: &str,
        password: &str,
        hostname: &str,
    ) -> Result<(), LinkError>;

    async fn is_associated(&mut self) -> bool;
}

/// Association status query, consumed by the control loop.
#[allow(async_fn_in_trait)]
pub trait Link {
    /// Blocks cooperatively until the link is up.
    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn is_connected(&mut self) -> bool;
}

pub struct TransportLink<S: Station> {
    station: S,
    network: NetworkConfig,
    poll_interval: Duration,
    state: LinkState,
}

impl<S: Station> TransportLink<S> {
    pub fn new(station: S, network: NetworkConfig, poll_interval: Duration) -> Self {
        Self {
            station,
            network,
            poll_interval,
            state: LinkState::default(),
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }
}

impl<S: Station> Link for TransportLink<S> {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.state = LinkState::Connecting;
        info!(ssid = %self.network.ssid, "Associating with network");

        // A failed request is not fatal: the backend may already hold a
        // profile for this SSID, and the poll loop below is the contract.
        if let Err(e) = self
            .station
            .request_association(
                &self.network.ssid,
                &self.network.password,
                &self.network.hostname,
            )
            .await
        {
            warn!("Association request failed: {}", e);
        }

        while !self.station.is_associated().await {
            sleep(self.poll_interval).await;
        }

        self.state = LinkState::Connected;
        info!(ssid = %self.network.ssid, "Network associated");
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        let associated = self.station.is_associated().await;
        self.state = if associated {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };
        associated
    }
}
