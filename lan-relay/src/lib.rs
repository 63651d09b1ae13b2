//! Line-based LAN chat relay.
//!
//! One process hosts a [`Listener`]; other processes join it with an
//! [`OutboundConnector`]. The wire protocol is plain newline-terminated UTF-8
//! over TCP. A joining peer's first line is its display name; everything
//! after that is relayed verbatim, tagged with the sender's address, to every
//! other peer and to the host's own callback. Payloads are opaque text.
//!
//! - [`listener`] binds, accepts peers, and broadcasts.
//! - [`worker`] is the host-side handle for one accepted peer.
//! - [`registry`] is the lock-guarded set of live workers.
//! - [`connector`] dials a host and exchanges lines with it.
//! - [`line`] holds the wire helpers and formatting shared by both sides.
//! - [`cli`] and [`console`] make up the terminal chat binary.
//!
//! Every connection runs a read task and a write task. Closing a connection
//! raises its close signal, which both tasks observe; no per-connection
//! fault ever reaches the listener or another peer.

pub mod cli;
pub mod config;
pub mod connector;
pub mod console;
pub mod error;
pub mod line;
mod link;
pub mod listener;
pub mod registry;
pub mod worker;

pub use config::{ConnectorConfig, ListenerConfig};
pub use connector::OutboundConnector;
pub use error::RelayError;
pub use line::MessageHandler;
pub use link::ConnectionState;
pub use listener::Listener;
pub use registry::PeerId;
pub use worker::ConnectionWorker;
