use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::line::{DEFAULT_PORT, WELCOME_LINE};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a [`Listener`](crate::listener::Listener).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Address to bind. Defaults to every interface on [`DEFAULT_PORT`].
    pub listen: SocketAddr,
    /// Upper bound on a single line write to one peer.
    pub write_timeout: Duration,
    /// Line sent to each newly accepted peer, if any.
    pub welcome: Option<String>,
}

impl ListenerConfig {
    /// Listens on `port` on every interface.
    pub fn new(port: u16) -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            ..Self::default()
        }
    }

    pub fn with_listen_addr(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_welcome(mut self, welcome: Option<String>) -> Self {
        self.welcome = welcome;
        self
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            welcome: Some(WELCOME_LINE.to_string()),
        }
    }
}

/// Settings for an [`OutboundConnector`](crate::connector::OutboundConnector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Host name or IP address of the listener.
    pub host: String,
    pub port: u16,
    /// Display name sent as the first line and used to prefix chat lines.
    pub identity: String,
    /// Covers name resolution and the TCP handshake together.
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl ConnectorConfig {
    pub fn new(host: impl Into<String>, port: u16, identity: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            identity: identity.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// `host:port`, as handed to the resolver.
    pub fn remote(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_defaults_match_wire_conventions() {
        let config = ListenerConfig::default();
        assert_eq!(config.listen.port(), 5000);
        assert!(config.listen.ip().is_unspecified());
        assert_eq!(config.welcome.as_deref(), Some("System: Welcome to the chat!"));

        let config = ListenerConfig::new(6000).with_welcome(None);
        assert_eq!(config.listen.port(), 6000);
        assert_eq!(config.welcome, None);
    }

    #[test]
    fn connector_defaults_bound_connect_time() {
        let config = ConnectorConfig::new("192.168.0.4", 5000, "alice");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.remote(), "192.168.0.4:5000");
    }
}
