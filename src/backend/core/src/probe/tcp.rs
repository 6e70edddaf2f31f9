use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Probe, ProbeResult, ProbeTarget};

/// TCP connect probe. The executor bounds the connect with its timeout.
#[derive(Debug, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, target: &ProbeTarget) -> ProbeResult {
        let ProbeTarget::Socket { host, port } = target else {
            return ProbeResult::down(format!("not a host:port target: {}", target));
        };

        match TcpStream::connect((host.as_str(), *port)).await {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| target.to_string());
                ProbeResult::up(format!("Connected to {}", peer))
            }
            Err(e) => ProbeResult::down(format!("TCP connection failed: {}", e)),
        }
    }
}
