//! Port liveness probing

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Whether something accepts connections on `port`
    async fn is_listening(&self, port: u16) -> bool;
}

/// TCP connect under a short timeout
#[derive(Debug, Clone)]
pub struct TcpPortProbe {
    host: String,
    timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_host("127.0.0.1", timeout)
    }

    pub fn with_host(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_listening(&self, port: u16) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), port));
        matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)))
    }
}
