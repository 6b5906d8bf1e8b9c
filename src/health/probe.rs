//! Per-protocol connectivity probes.
//!
//! # Responsibilities
//! - Map a protocol tag to the check that applies to it
//! - Measure connect latency with a hard per-attempt timeout
//! - Turn every I/O fault into a failed measurement, never an error

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;

use crate::model::Protocol;

/// Fixed per-attempt probe timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a probe did not reach its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// The protocol has no probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported protocol: {0}")]
pub struct UnsupportedProtocol(pub String);

/// Result of one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub latency_ms: Option<u64>,
    pub succeeded: bool,
    pub failure: Option<ProbeError>,
}

impl Measurement {
    pub fn reachable(latency_ms: u64) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            succeeded: true,
            failure: None,
        }
    }

    pub fn failed(failure: ProbeError) -> Self {
        Self {
            latency_ms: None,
            succeeded: false,
            failure: Some(failure),
        }
    }
}

/// Which check applies to a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeKind {
    Vmess,
    Vless,
    Shadowsocks,
    Trojan,
    Socks,
    Unsupported(String),
}

impl ProbeKind {
    pub fn for_protocol(protocol: &Protocol) -> Self {
        match protocol {
            Protocol::Vmess => ProbeKind::Vmess,
            Protocol::Vless => ProbeKind::Vless,
            Protocol::Shadowsocks => ProbeKind::Shadowsocks,
            Protocol::Trojan => ProbeKind::Trojan,
            Protocol::Socks => ProbeKind::Socks,
            Protocol::Http | Protocol::Other(_) => ProbeKind::Unsupported(protocol.to_string()),
        }
    }
}

/// Connectivity check for a single endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `address:port`.
    ///
    /// Failures to connect are reported inside the `Measurement`; only a
    /// protocol without a check is an `Err`.
    async fn probe(
        &self,
        protocol: &Protocol,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Measurement, UnsupportedProtocol>;
}

/// Prober that opens (and cleanly closes) a TCP connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

impl TcpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(
        &self,
        protocol: &Protocol,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Measurement, UnsupportedProtocol> {
        match ProbeKind::for_protocol(protocol) {
            ProbeKind::Vmess
            | ProbeKind::Vless
            | ProbeKind::Shadowsocks
            | ProbeKind::Trojan
            | ProbeKind::Socks => Ok(tcp_connect(address, port, timeout).await),
            ProbeKind::Unsupported(tag) => Err(UnsupportedProtocol(tag)),
        }
    }
}

/// Time a TCP connect to `address:port`.
pub async fn tcp_connect(address: &str, port: u16, timeout: Duration) -> Measurement {
    let start = Instant::now();

    match time::timeout(timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(mut stream)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(address, port, error = %e, "Probe connection did not close cleanly");
            }
            Measurement::reachable(latency_ms)
        }
        Ok(Err(e)) => {
            tracing::warn!(address, port, error = %e, "Probe failed: connection error");
            Measurement::failed(ProbeError::Connection(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(address, port, "Probe failed: timeout");
            Measurement::failed(ProbeError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_probe_kind_dispatch() {
        assert_eq!(ProbeKind::for_protocol(&Protocol::Trojan), ProbeKind::Trojan);
        assert_eq!(
            ProbeKind::for_protocol(&Protocol::Other("wireguard".into())),
            ProbeKind::Unsupported("wireguard".into())
        );
        assert_eq!(
            ProbeKind::for_protocol(&Protocol::Http),
            ProbeKind::Unsupported("http".into())
        );
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let m = TcpProber::new()
            .probe(&Protocol::Vless, "127.0.0.1", port, PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(m.succeeded);
        assert!(m.latency_ms.is_some());
        assert!(m.failure.is_none());
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Grab a free port, then close it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let m = TcpProber::new()
            .probe(&Protocol::Socks, "127.0.0.1", port, PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(!m.succeeded);
        assert_eq!(m.latency_ms, None);
        assert!(matches!(m.failure, Some(ProbeError::Connection(_))));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_a_failed_measurement() {
        let m = tcp_connect("no-such-host.invalid", 443, PROBE_TIMEOUT).await;
        assert!(!m.succeeded);
        assert_eq!(m.latency_ms, None);
    }

    #[tokio::test]
    async fn test_unsupported_protocol() {
        let err = TcpProber::new()
            .probe(&Protocol::Other("wireguard".into()), "127.0.0.1", 1, PROBE_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported protocol: wireguard");
    }
}
