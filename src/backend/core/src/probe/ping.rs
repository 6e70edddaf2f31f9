use async_trait::async_trait;
use parking_lot::Mutex;
use rand::random;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tracing::warn;

use super::{timeout_message, Probe, ProbeResult, ProbeTarget};

/// ICMP echo probe.
///
/// Needs a raw or unprivileged ICMP socket; when the socket cannot be opened the
/// check is reported `down` with the socket error.
pub struct PingProbe {
    timeout: Duration,
    v4: Mutex<Option<Arc<Client>>>,
    v6: Mutex<Option<Arc<Client>>>,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            v4: Mutex::new(None),
            v6: Mutex::new(None),
        }
    }

    fn client(&self, ip: IpAddr) -> std::io::Result<Arc<Client>> {
        let (slot, kind) = match ip {
            IpAddr::V4(_) => (&self.v4, ICMP::V4),
            IpAddr::V6(_) => (&self.v6, ICMP::V6),
        };
        let mut slot = slot.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Arc::new(Client::new(&Config::builder().kind(kind).build())?);
        *slot = Some(client.clone());
        Ok(client)
    }
}

async fn resolve(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host(format!("{host}:0"))
        .await?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "DNS resolution returned no addresses")
        })
}

#[async_trait]
impl Probe for PingProbe {
    async fn check(&self, target: &ProbeTarget) -> ProbeResult {
        let ProbeTarget::Host(host) = target else {
            return ProbeResult::down(format!("not a host target: {}", target));
        };

        let ip = match resolve(host).await {
            Ok(ip) => ip,
            Err(e) => return ProbeResult::down(format!("Failed to resolve {}: {}", host, e)),
        };

        let client = match self.client(ip) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Unable to open ICMP socket");
                return ProbeResult::down(format!("ICMP socket unavailable: {}", e));
            }
        };

        let mut pinger = client.pinger(ip, PingIdentifier(random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(PingSequence(0), &[0; 8]).await {
            Ok((_reply, rtt)) => ProbeResult::up(format!("Reply from {} in {} ms", ip, rtt.as_millis())),
            Err(surge_ping::SurgeError::Timeout { .. }) => {
                ProbeResult::down(timeout_message(self.timeout))
            }
            Err(e) => ProbeResult::down(format!("Ping failed: {}", e)),
        }
    }
}
