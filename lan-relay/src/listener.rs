use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    config::ListenerConfig,
    error::RelayError,
    line::MessageHandler,
    link::closed,
    registry::PeerRegistry,
    worker::ConnectionWorker,
};

/// Pause after a failed accept() so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Host side of the relay.
///
/// Accepts peers, relays each line a peer sends to every other peer, and
/// hands every line it sees (relayed or broadcast locally) to its callback.
pub struct Listener {
    config: ListenerConfig,
    on_message: MessageHandler,
    session: Mutex<Option<Session>>,
}

/// State of one start()..stop() cycle.
struct Session {
    local_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    shutdown: watch::Sender<bool>,
}

impl Listener {
    pub fn new<F>(config: ListenerConfig, on_message: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self {
            config,
            on_message: Arc::new(on_message),
            session: Mutex::new(None),
        }
    }

    /// Binds the configured address and starts accepting peers.
    ///
    /// Returns the bound address. Calling it while already running returns
    /// the current address without rebinding. A bind failure leaves the
    /// listener stopped; it is not retried.
    pub async fn start(&self) -> Result<SocketAddr, RelayError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let addr = self.config.listen;
        let bind_error = |source| {
            warn!(%addr, error = %source, "failed to bind listener");
            RelayError::Bind { addr, source }
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let mut session = self.session.lock();
        if let Some(existing) = session.as_ref() {
            // Lost a race with a concurrent start(); our socket closes on drop.
            return Ok(existing.local_addr);
        }

        let registry = Arc::new(PeerRegistry::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&registry),
            Arc::clone(&self.on_message),
            self.config.clone(),
            shutdown_rx,
        ));
        *session = Some(Session {
            local_addr,
            registry,
            shutdown,
        });

        info!(addr = %local_addr, "listening for peers");
        Ok(local_addr)
    }

    /// Stops accepting and disconnects every peer. Idempotent.
    ///
    /// Lines already queued for a peer, such as a final broadcast, are still
    /// written before its socket is released.
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.shutdown.send_replace(true);
        for worker in session.registry.seal() {
            worker.close();
        }
        info!(addr = %session.local_addr, "listener stopped");
    }

    /// Sends `line` to every connected peer and to the local callback.
    ///
    /// Never blocks on a peer and never fails; a peer whose connection is
    /// already dead is closed instead.
    pub fn broadcast(&self, line: &str) {
        if let Some(registry) = self.registry() {
            registry.fan_out(line, None);
        }
        (self.on_message)(line.to_owned());
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.lock().as_ref().map(|session| session.local_addr)
    }

    pub fn peer_count(&self) -> usize {
        self.registry().map_or(0, |registry| registry.len())
    }

    /// Snapshot of the connected peers.
    pub fn peers(&self) -> Vec<Arc<ConnectionWorker>> {
        self.registry()
            .map(|registry| registry.snapshot())
            .unwrap_or_default()
    }

    fn registry(&self) -> Option<Arc<PeerRegistry>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.registry))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<PeerRegistry>,
    on_message: MessageHandler,
    config: ListenerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        select! {
            biased;
            _ = closed(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => admit_peer(stream, peer, &registry, &on_message, &config),
                Err(error) => {
                    warn!(?error, "failed to accept connection");
                    sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop exited");
}

fn admit_peer(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<PeerRegistry>,
    on_message: &MessageHandler,
    config: &ListenerConfig,
) {
    let welcome = config.welcome.as_deref();
    let (worker, io) = match ConnectionWorker::new(
        stream,
        peer,
        registry,
        Arc::clone(on_message),
        welcome,
    ) {
        Ok(parts) => parts,
        Err(error) => {
            warn!(%peer, ?error, "failed to set up peer connection");
            return;
        }
    };

    if !registry.insert(Arc::clone(&worker)) {
        // stop() sealed the registry while this peer was being accepted.
        worker.close();
        return;
    }

    info!(%peer, "peer connected");
    worker.start(io, config.write_timeout);
}
