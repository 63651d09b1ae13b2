use std::{io, sync::Arc};

use parking_lot::Mutex;
use tokio::{io::BufReader, net::TcpStream, sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    config::ConnectorConfig,
    error::RelayError,
    line::{MessageHandler, chat_line, write_line},
    link::{self, ConnectionState, Link, QueueError, pump_reads, pump_writes},
};

/// Joining side of the relay: one connection to a host.
///
/// Built unconnected; [`connect`](Self::connect) dials the host with a
/// bounded timeout and sends the identity line. Once closed, a connector
/// stays closed; build a new one to try again.
pub struct OutboundConnector {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectorConfig,
    on_message: MessageHandler,
    link: Link,
    outbox: Mutex<Option<mpsc::Receiver<String>>>,
}

impl OutboundConnector {
    pub fn new<F>(config: ConnectorConfig, on_message: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let (link, outbox) = Link::new();
        Self {
            inner: Arc::new(Inner {
                config,
                on_message: Arc::new(on_message),
                link,
                outbox: Mutex::new(Some(outbox)),
            }),
        }
    }

    /// Connects, sends the identity line and starts receiving.
    ///
    /// Connecting an already connected connector is a no-op. Failures are
    /// returned, never retried, and leave the connector closed.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let inner = &self.inner;
        if !inner
            .link
            .transition(ConnectionState::Unconnected, ConnectionState::Connecting)
        {
            return match inner.link.state() {
                ConnectionState::Connected => Ok(()),
                ConnectionState::Connecting => Err(RelayError::AlreadyConnecting),
                _ => Err(RelayError::Closed),
            };
        }

        let addr = inner.config.remote();
        let connect_timeout = inner.config.connect_timeout;
        let stream = match timeout(connect_timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                warn!(remote = %addr, error = %source, "failed to connect to host");
                inner.close();
                return Err(RelayError::Connect { addr, source });
            }
            Err(_) => {
                warn!(remote = %addr, timeout = ?connect_timeout, "timed out connecting to host");
                inner.close();
                return Err(RelayError::ConnectTimeout {
                    addr,
                    timeout: connect_timeout,
                });
            }
        };

        if let Err(error) = stream.set_nodelay(true) {
            debug!(remote = %addr, ?error, "failed to disable nagle");
        }
        let (reader, mut writer) = stream.into_split();

        let write_timeout = inner.config.write_timeout;
        let identity = &inner.config.identity;
        let handshake = match timeout(write_timeout, write_line(&mut writer, identity)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "identity line was not accepted in time",
            )),
        };
        if let Err(source) = handshake {
            warn!(remote = %addr, error = %source, "failed to send identity");
            inner.close();
            return Err(RelayError::Handshake { addr, source });
        }

        let outbox = inner.outbox.lock().take();
        let Some(outbox) = outbox else {
            inner.close();
            return Err(RelayError::Closed);
        };
        if !inner
            .link
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            // disconnect() won while the handshake was in flight.
            return Err(RelayError::Closed);
        }

        let pump = Arc::clone(inner);
        tokio::spawn(async move {
            let close_signal = pump.link.close_signal();
            if let Err(error) = pump_writes(writer, outbox, close_signal, write_timeout).await {
                debug!(?error, "write to host failed");
            }
            pump.close();
        });

        let pump = Arc::clone(inner);
        tokio::spawn(async move {
            let close_signal = pump.link.close_signal();
            let on_message = Arc::clone(&pump.on_message);
            let reader = BufReader::new(reader);
            let result = pump_reads(reader, close_signal, |line| on_message(line)).await;
            if let Err(error) = result {
                debug!(?error, "read from host failed");
            }
            pump.close();
        });

        info!(remote = %addr, identity = %identity, "connected to host");
        Ok(())
    }

    /// Sends `"<identity>: <text>"`. Ignored when not connected or `text` is empty.
    pub fn send_chat(&self, text: &str) {
        if text.is_empty() || !self.is_connected() {
            return;
        }
        self.send_raw(&chat_line(&self.inner.config.identity, text));
    }

    /// Sends one line as-is. Ignored when not connected.
    ///
    /// Lines sent before [`disconnect`](Self::disconnect) are still written
    /// before the socket is released. If the host falls too far behind the
    /// connection is closed.
    pub fn send_raw(&self, line: &str) {
        match self.inner.link.enqueue(line.to_owned()) {
            Ok(()) => {}
            Err(QueueError::Full) => {
                let remote = self.inner.config.remote();
                warn!(%remote, "host is not keeping up, disconnecting");
                self.inner.close();
            }
            Err(QueueError::Closed) => self.inner.close(),
        }
    }

    /// Tears the connection down. Idempotent; later sends are ignored.
    pub fn disconnect(&self) {
        self.inner.close();
    }

    /// Same as [`disconnect`](Self::disconnect).
    pub fn close(&self) {
        self.inner.close();
    }

    /// Resolves once the connection starts closing, for whatever reason.
    pub async fn closed(&self) {
        let mut close_signal = self.inner.link.close_signal();
        link::closed(&mut close_signal).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.is_connected()
    }

    pub fn identity(&self) -> &str {
        &self.inner.config.identity
    }
}

impl Drop for OutboundConnector {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    fn close(&self) {
        if !self.link.begin_close() {
            return;
        }
        self.link.finish_close();
        info!(remote = %self.config.remote(), "disconnected from host");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_connector_refuses_to_connect() {
        let connector = OutboundConnector::new(
            ConnectorConfig::new("127.0.0.1", 9, "alice"),
            |_: String| {},
        );
        connector.send_chat("ignored");
        connector.disconnect();
        connector.disconnect();

        assert_eq!(connector.state(), ConnectionState::Closed);
        assert!(matches!(connector.connect().await, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn closed_resolves_after_disconnect() {
        let connector = OutboundConnector::new(
            ConnectorConfig::new("127.0.0.1", 9, "alice"),
            |_: String| {},
        );
        connector.disconnect();

        timeout(std::time::Duration::from_secs(1), connector.closed())
            .await
            .expect("closed() resolves");
    }
}
