use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

/// Failures a caller can observe. Everything that goes wrong on an
/// established connection is handled by closing that connection instead.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("failed to send identity to {addr}")]
    Handshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("connection is closed; create a new connector to reconnect")]
    Closed,
}
