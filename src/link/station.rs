use tokio::process::Command;
use tracing::{debug, warn};

use super::{LinkError, Station};

/// NetworkManager backend. Applies the device hostname, then asks `nmcli`
/// to join the configured SSID. Association progress is read back through
/// `nmcli -t -f STATE general`.
pub struct NmcliStation;

impl NmcliStation {
    pub fn new() -> Self {
        NmcliStation
    }

    async fn nmcli(args: &[&str]) -> Result<std::process::Output, LinkError> {
        debug!(?args, "nmcli");
        Ok(Command::new("nmcli").args(args).output().await?)
    }
}

impl Default for NmcliStation {
    fn default() -> Self {
        Self::new()
    }
}

impl Station for NmcliStation {
    async fn request_association(
        &mut self,
        ssid: &str,
        password: &str,
        hostname: &str,
    ) -> Result<(), LinkError> {
        let output = Self::nmcli(&["general", "hostname", hostname]).await?;
        if !output.status.success() {
            // Hostname is cosmetic for the broker session; keep going.
            warn!(
                hostname,
                "Could not set hostname: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let output =
            Self::nmcli(&["device", "wifi", "connect", ssid, "password", password]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LinkError::AssociationFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn is_associated(&mut self) -> bool {
        match Self::nmcli(&["-t", "-f", "STATE", "general"]).await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "connected"
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Network state query failed: {}", e);
                false
            }
        }
    }
}
