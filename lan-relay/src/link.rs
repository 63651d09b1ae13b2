//! Socket plumbing shared by the host-side worker and the joining connector.
//!
//! A [`Link`] owns the connection state, the outbound queue and the close
//! signal. The socket halves themselves live in two pump tasks: one reads
//! lines until the peer goes away, the other drains the outbound queue.
//! Both pumps watch the close signal, so closing a link is what cancels
//! its blocking reads and releases the socket. Lines queued before the
//! close are still written before the write half is dropped.

use std::{
    fmt, io,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::timeout,
};

use crate::line::{read_line, write_line};

/// Lines a connection may have waiting for its write pump. A peer that lets
/// its queue fill up is disconnected.
pub(crate) const OUTBOX_CAPACITY: usize = 128;

/// Lifecycle of one connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Unconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub(crate) struct Link {
    state: AtomicU8,
    outbox: mpsc::Sender<String>,
    close_signal: watch::Sender<bool>,
}

impl Link {
    /// Creates an unconnected link and the receiving end of its outbound queue.
    pub(crate) fn new() -> (Self, mpsc::Receiver<String>) {
        let (outbox, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (close_signal, _) = watch::channel(false);
        let link = Self {
            state: AtomicU8::new(ConnectionState::Unconnected as u8),
            outbox,
            close_signal,
        };
        (link, outbox_rx)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Moves `from` to `to` only if the link is still in `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queues one line for the write pump.
    ///
    /// Never waits. Lines queued while not connected are dropped. On error
    /// the owner should close the link.
    pub(crate) fn enqueue(&self, line: String) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.outbox.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Starts closing. Returns `false` if another caller already did.
    ///
    /// The winner raises the close signal and must call [`Link::finish_close`]
    /// once its own bookkeeping is done.
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.state();
        loop {
            if matches!(current, ConnectionState::Closing | ConnectionState::Closed) {
                return false;
            }
            match self.state.compare_exchange(
                current as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = ConnectionState::from_u8(actual),
            }
        }
        self.close_signal.send_replace(true);
        true
    }

    pub(crate) fn finish_close(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub(crate) fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_signal.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueError {
    /// The peer is not keeping up with what is sent to it.
    Full,
    /// The write pump is gone.
    Closed,
}

/// Resolves once the close signal has been raised, including before the call.
pub(crate) async fn closed(signal: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the wait; the link is gone either way.
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Reads lines and hands each to `on_line` until end of stream or close.
///
/// Returns `Ok(())` when the peer hangs up or the link is closed locally,
/// and the I/O error otherwise.
pub(crate) async fn pump_reads<R, F>(
    mut reader: R,
    mut close_signal: watch::Receiver<bool>,
    mut on_line: F,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String),
{
    loop {
        select! {
            biased;
            _ = closed(&mut close_signal) => return Ok(()),
            line = read_line(&mut reader) => match line? {
                Some(line) => on_line(line),
                None => return Ok(()),
            },
        }
    }
}

/// Writes queued lines in order, each bounded by `write_timeout`.
///
/// After the close signal, lines that were already queued are still written,
/// all within one more `write_timeout`, before the writer is dropped.
pub(crate) async fn pump_writes<W>(
    mut writer: W,
    mut outbox: mpsc::Receiver<String>,
    mut close_signal: watch::Receiver<bool>,
    write_timeout: Duration,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        select! {
            biased;
            _ = closed(&mut close_signal) => break,
            queued = outbox.recv() => match queued {
                Some(line) => match timeout(write_timeout, write_line(&mut writer, &line)).await {
                    Ok(result) => result?,
                    Err(_) => return Err(write_timed_out(write_timeout)),
                },
                None => return Ok(()),
            },
        }
    }

    outbox.close();
    let flush = async {
        while let Some(line) = outbox.recv().await {
            write_line(&mut writer, &line).await?;
        }
        Ok(())
    };
    match timeout(write_timeout, flush).await {
        Ok(result) => result,
        Err(_) => Err(write_timed_out(write_timeout)),
    }
}

fn write_timed_out(write_timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("write did not complete within {write_timeout:?}"),
    )
}
