use std::{
    fmt, io,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    line::{MessageHandler, tag_line},
    link::{ConnectionState, Link, QueueError, pump_reads, pump_writes},
    registry::{PeerId, PeerRegistry},
};

/// Host-side handle for one accepted peer.
///
/// Lines the peer sends are tagged with its address, relayed to every other
/// registered peer and handed to the listener's callback. Lines for the peer
/// are queued with [`ConnectionWorker::send`] and written by a background
/// task. Any I/O fault closes the worker, which unregisters it.
pub struct ConnectionWorker {
    id: PeerId,
    peer: SocketAddr,
    link: Link,
    registry: Weak<PeerRegistry>,
    on_message: MessageHandler,
}

/// Socket halves and queue a worker hands to its pump tasks on start.
pub(crate) struct WorkerIo {
    pub(crate) reader: BufReader<OwnedReadHalf>,
    pub(crate) writer: OwnedWriteHalf,
    pub(crate) outbox: mpsc::Receiver<String>,
}

impl ConnectionWorker {
    /// Wraps an accepted socket and queues `welcome` ahead of anything else.
    /// On error the socket is dropped, which closes it.
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        registry: &Arc<PeerRegistry>,
        on_message: MessageHandler,
        welcome: Option<&str>,
    ) -> io::Result<(Arc<Self>, WorkerIo)> {
        stream.set_nodelay(true)?;

        let (link, outbox) = Link::new();
        // The TCP handshake already completed in accept().
        link.transition(ConnectionState::Unconnected, ConnectionState::Connected);
        if let Some(welcome) = welcome {
            // First line into an empty queue.
            let _ = link.enqueue(welcome.to_owned());
        }

        let (reader, writer) = stream.into_split();
        let worker = Arc::new(Self {
            id: registry.next_id(),
            peer,
            link,
            registry: Arc::downgrade(registry),
            on_message,
        });
        let io = WorkerIo {
            reader: BufReader::new(reader),
            writer,
            outbox,
        };
        Ok((worker, io))
    }

    /// Spawns the read and write pumps.
    pub(crate) fn start(self: &Arc<Self>, io: WorkerIo, write_timeout: Duration) {
        let WorkerIo {
            reader,
            writer,
            outbox,
        } = io;

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let close_signal = worker.link.close_signal();
            if let Err(error) = pump_writes(writer, outbox, close_signal, write_timeout).await {
                debug!(peer = %worker.peer, ?error, "write to peer failed");
            }
            worker.close();
        });

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let close_signal = worker.link.close_signal();
            let result = pump_reads(reader, close_signal, |line| worker.relay(line)).await;
            if let Err(error) = result {
                debug!(peer = %worker.peer, ?error, "read from peer failed");
            }
            worker.close();
        });
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Queues one line for this peer. Best effort: a dead connection, or a
    /// peer too far behind to take another line, is closed instead of
    /// reporting an error.
    pub fn send(&self, line: &str) {
        match self.link.enqueue(line.to_owned()) {
            Ok(()) => {}
            Err(QueueError::Full) => {
                warn!(peer = %self.peer, "peer is not keeping up, disconnecting");
                self.close();
            }
            Err(QueueError::Closed) => self.close(),
        }
    }

    /// Disconnects the peer and unregisters it. Safe to call repeatedly and
    /// from several tasks at once; only the first call does anything.
    pub fn close(&self) {
        if !self.link.begin_close() {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.link.finish_close();
        info!(peer = %self.peer, "peer disconnected");
    }

    fn relay(&self, line: String) {
        let tagged = tag_line(self.peer.ip(), &line);
        if let Some(registry) = self.registry.upgrade() {
            registry.fan_out(&tagged, Some(self.id));
        }
        (self.on_message)(tagged);
    }
}

impl fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.link.state())
            .finish()
    }
}
