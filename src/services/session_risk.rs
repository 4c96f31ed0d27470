use crate::hotspot::RadioConfig;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Decides whether the admin session itself travels over the hotspot
///
/// A client is considered connected through the hotspot when its address lies
/// in one of the networks the hotspot hands out to its clients.
#[derive(Clone, Debug)]
pub struct SessionRiskDetector {
    served: Vec<IpNetwork>,
}

impl SessionRiskDetector {
    pub fn new(served: Vec<IpNetwork>) -> Self {
        Self { served }
    }

    pub fn served_networks(&self) -> &[IpNetwork] {
        &self.served
    }

    /// # Arguments
    /// * `client` - Address of the requesting client
    /// * `radio` - Radio settings currently in effect
    ///
    /// # Returns
    /// true if a disruptive apply could cut off this client
    pub fn is_self_connected(&self, client: IpAddr, radio: &RadioConfig) -> bool {
        if !radio.enabled || radio.device.is_empty() {
            return false;
        }

        let client = client.to_canonical();
        self.served.iter().any(|network| network.contains(client))
    }

    /// Like [`Self::is_self_connected`], but an unknown client address is
    /// treated as connected through the hotspot whenever it is running.
    pub fn is_possibly_self_connected(&self, client: Option<IpAddr>, radio: &RadioConfig) -> bool {
        match client {
            Some(client) => self.is_self_connected(client, radio),
            None => radio.enabled && !radio.device.is_empty(),
        }
    }
}
