//! Target address parsing per check kind.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use url::Url;

use crate::error::{MonitraError, Result};
use crate::model::CheckKind;

/// A target address, parsed for the kind of check that will run against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Absolute http(s) URL
    Http(Url),
    /// Host and TCP port
    Socket { host: String, port: u16 },
    /// Host name or IP address for ICMP
    Host(String),
}

impl ProbeTarget {
    /// Parse `raw` for the given check kind.
    pub fn parse(kind: CheckKind, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MonitraError::invalid_target(raw, "target must not be empty"));
        }
        match kind {
            CheckKind::Http => parse_http(raw),
            CheckKind::Port => parse_socket(raw),
            CheckKind::Ping => parse_host(raw),
        }
    }

    /// Host part, without brackets for IPv6 literals.
    pub fn host(&self) -> &str {
        match self {
            Self::Http(url) => url.host_str().unwrap_or_default(),
            Self::Socket { host, .. } => host,
            Self::Host(host) => host,
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{}", url),
            Self::Socket { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Socket { host, port } => write!(f, "{}:{}", host, port),
            Self::Host(host) => f.write_str(host),
        }
    }
}

fn parse_http(raw: &str) -> Result<ProbeTarget> {
    let url = Url::parse(raw).map_err(|e| MonitraError::invalid_target(raw, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MonitraError::invalid_target(raw, "scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(MonitraError::invalid_target(raw, "URL has no host"));
    }
    Ok(ProbeTarget::Http(url))
}

fn parse_socket(raw: &str) -> Result<ProbeTarget> {
    if raw.contains("://") {
        let url = Url::parse(raw).map_err(|e| MonitraError::invalid_target(raw, e.to_string()))?;
        let host = url_host(&url).ok_or_else(|| MonitraError::invalid_target(raw, "URL has no host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| MonitraError::invalid_target(raw, "URL has no port"))?;
        return Ok(ProbeTarget::Socket { host, port });
    }

    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return socket(raw, addr.ip().to_string(), addr.port());
    }

    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| MonitraError::invalid_target(raw, "expected host:port"))?;
    if host.contains(':') {
        return Err(MonitraError::invalid_target(raw, "IPv6 addresses must be written as [addr]:port"));
    }
    validate_host(raw, host)?;
    let port = port
        .parse::<u16>()
        .map_err(|_| MonitraError::invalid_target(raw, "port must be a number in 1..=65535"))?;
    socket(raw, host.to_string(), port)
}

fn socket(raw: &str, host: String, port: u16) -> Result<ProbeTarget> {
    if port == 0 {
        return Err(MonitraError::invalid_target(raw, "port must be a number in 1..=65535"));
    }
    Ok(ProbeTarget::Socket { host, port })
}

fn parse_host(raw: &str) -> Result<ProbeTarget> {
    if raw.contains("://") {
        let url = Url::parse(raw).map_err(|e| MonitraError::invalid_target(raw, e.to_string()))?;
        let host = url_host(&url).ok_or_else(|| MonitraError::invalid_target(raw, "URL has no host"))?;
        return Ok(ProbeTarget::Host(host));
    }

    let bare = raw.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(ProbeTarget::Host(ip.to_string()));
    }
    validate_host(raw, raw)?;
    Ok(ProbeTarget::Host(raw.to_string()))
}

fn url_host(url: &Url) -> Option<String> {
    match url.host()? {
        url::Host::Domain(domain) if !domain.is_empty() => Some(domain.to_string()),
        url::Host::Domain(_) => None,
        url::Host::Ipv4(ip) => Some(ip.to_string()),
        url::Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

fn validate_host(raw: &str, host: &str) -> Result<()> {
    let valid = !host.is_empty()
        && host.len() <= 253
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MonitraError::invalid_target(raw, "invalid host name"))
    }
}
