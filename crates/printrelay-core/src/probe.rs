//! Reachability probes for destinations.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

/// Timeout for a single echo request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(4);

const PROBE_PAYLOAD: [u8; 32] = [0u8; 32];

/// Checks whether a network address currently answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if `address` answered. Failures are negative results, not errors.
    async fn probe(&self, address: &str) -> bool;
}

/// ICMP echo probe.
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    timeout: Duration,
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new(PROBE_TIMEOUT)
    }
}

impl IcmpProbe {
    /// Create a probe with the given echo timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn resolve(address: &str) -> Option<IpAddr> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Some(ip);
        }
        match tokio::net::lookup_host((address, 0)).await {
            Ok(mut addrs) => addrs.next().map(|sa| sa.ip()),
            Err(e) => {
                // Only happens when name resolution itself is down.
                tracing::debug!("Host {} could not be resolved: {}", address, e);
                None
            }
        }
    }

    async fn echo(&self, ip: IpAddr) -> Result<Duration, String> {
        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(|e| format!("icmp socket: {}", e))?;
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);
        pinger
            .ping(PingSequence(0), &PROBE_PAYLOAD)
            .await
            .map(|(_, rtt)| rtt)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ReachabilityProbe for IcmpProbe {
    async fn probe(&self, address: &str) -> bool {
        let Some(ip) = Self::resolve(address).await else {
            return false;
        };

        match self.echo(ip).await {
            Ok(rtt) => {
                tracing::debug!("{} answered in {:?}", address, rtt);
                true
            }
            Err(e) => {
                tracing::debug!("{} did not answer: {}", address, e);
                false
            }
        }
    }
}

/// Debug override that reports every destination as reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReachable;

#[async_trait]
impl ReachabilityProbe for AlwaysReachable {
    async fn probe(&self, address: &str) -> bool {
        tracing::info!("DEBUG network check passed for {}", address);
        true
    }
}
