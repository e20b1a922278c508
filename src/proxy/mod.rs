//! Reverse Proxy Surface
//!
//! HTTP listener, origin forwarding, and the admin endpoints.
//!
//! ```text
//! client ──▶ ProxyServer ──▶ TierController ──miss──▶ HttpOriginForwarder ──▶ origin
//!                                   ▲
//! scraper ──▶ AdminServer ──────────┘ (metrics, health, stats)
//! ```

pub mod origin;
mod server;

use std::net::SocketAddr;
use std::time::Duration;

pub use origin::{
    HttpOriginForwarder, OriginForwarder, OriginRequest, OriginResponse, DEFAULT_ORIGIN_TIMEOUT,
};
pub use server::{AdminServer, ProxyServer};

use crate::error::{Error, Result};

/// Default proxy listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9921";

/// Default admin listen address
pub const DEFAULT_ADMIN_ADDR: &str = "0.0.0.0:9922";

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the proxy listens on
    pub listen_addr: String,
    /// Address of the metrics/health endpoints
    pub admin_addr: String,
    /// Origin base URL
    pub origin: String,
    /// Origin round-trip timeout
    pub origin_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            admin_addr: DEFAULT_ADMIN_ADDR.to_string(),
            origin: "http://localhost:8080".to_string(),
            origin_timeout: DEFAULT_ORIGIN_TIMEOUT,
        }
    }
}

impl ProxyConfig {
    /// Parsed proxy address
    pub fn listen_socket(&self) -> Result<SocketAddr> {
        parse_addr("listen", &self.listen_addr)
    }

    /// Parsed admin address
    pub fn admin_socket(&self) -> Result<SocketAddr> {
        parse_addr("admin", &self.admin_addr)
    }

    /// Check that the configuration can start a proxy
    pub fn validate(&self) -> Result<()> {
        let listen = self.listen_socket()?;
        let admin = self.admin_socket()?;
        if listen == admin {
            return Err(Error::Config(format!(
                "Proxy and admin servers cannot share {}",
                listen
            )));
        }
        if self.origin_timeout.is_zero() {
            return Err(Error::Config("Origin timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn parse_addr(which: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Config(format!("Invalid {} address '{}': {}", which, addr, e)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_socket().unwrap().port(), 9921);
    }

    #[test]
    fn test_invalid_addresses() {
        let config = ProxyConfig {
            listen_addr: "not-an-addr".into(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = ProxyConfig {
            admin_addr: DEFAULT_LISTEN_ADDR.into(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ProxyConfig {
            origin_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }
}
