//! Transport negotiation
//!
//! WebSocket links through reverse proxies drop more often than raw sockets,
//! so by default ws/wss endpoints are rewritten to their raw-socket
//! equivalent before an attempt is made.

use crate::broker::endpoint::{BrokerEndpoint, Scheme};
use crate::config::TransportSection;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TransportNegotiator {
    prefer_raw_socket: bool,
    default_tcp_port: u16,
    default_tls_port: u16,
}

impl Default for TransportNegotiator {
    fn default() -> Self {
        Self::from_section(&TransportSection::default())
    }
}

impl TransportNegotiator {
    pub fn new(prefer_raw_socket: bool, default_tcp_port: u16, default_tls_port: u16) -> Self {
        Self {
            prefer_raw_socket,
            default_tcp_port,
            default_tls_port,
        }
    }

    pub fn from_section(section: &TransportSection) -> Self {
        Self::new(
            section.prefer_raw_socket,
            section.default_tcp_port,
            section.default_tls_port,
        )
    }

    /// Pick the transport for `endpoint`. Never fails.
    pub fn negotiate(&self, endpoint: &BrokerEndpoint) -> BrokerEndpoint {
        if !self.prefer_raw_socket || !endpoint.scheme.is_websocket() || endpoint.host.is_empty() {
            return endpoint.clone();
        }

        let scheme = endpoint.scheme.raw_equivalent();
        let port = if endpoint.explicit_port {
            endpoint.port
        } else {
            match scheme {
                Scheme::Mqtts => self.default_tls_port,
                _ => self.default_tcp_port,
            }
        };

        let negotiated = BrokerEndpoint {
            scheme,
            host: endpoint.host.clone(),
            port,
            explicit_port: endpoint.explicit_port,
            path: None,
            credentials: endpoint.credentials.clone(),
        };

        debug!(
            from = %endpoint,
            to = %negotiated,
            "Downgraded WebSocket endpoint to raw socket"
        );
        negotiated
    }
}
