//! Transport seam between rooms and the outside world.
//!
//! The room runtime only ever talks to a [`ClientRef`]: an outbound frame
//! sink plus a close signal. The WebSocket adapter lives in [`ws`]; the
//! channel-backed [`LocalClient`] serves embedded use and tests.

pub mod ws;

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound handle to one connected client.
pub trait ClientRef: Send + Sync + fmt::Debug {
    /// Queue a binary frame for delivery. Must not block.
    fn send(&self, frame: Bytes);
    /// Close the connection with a protocol close code.
    fn close(&self, code: u16);
    fn is_open(&self) -> bool;
}

/// What a [`LocalClient`]'s peer observes.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Bytes),
    Close(u16),
}

/// In-process transport endpoint: frames land on an unbounded channel.
pub struct LocalClient {
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
    close_code: AtomicU16,
}

impl LocalClient {
    /// Create a connected pair: the server-side handle and the client-side
    /// receiver.
    pub fn pair() -> (Arc<Self>, LocalClientReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
                close_code: AtomicU16::new(0),
            }),
            LocalClientReceiver { rx },
        )
    }

    /// Close code observed, if closed.
    pub fn close_code(&self) -> Option<u16> {
        if self.closed.load(Ordering::SeqCst) {
            Some(self.close_code.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}

impl ClientRef for LocalClient {
    fn send(&self, frame: Bytes) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.tx.send(TransportEvent::Frame(frame));
        }
    }

    fn close(&self, code: u16) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_code.store(code, Ordering::SeqCst);
            let _ = self.tx.send(TransportEvent::Close(code));
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClient")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Client-side view of a [`LocalClient`] pair.
pub struct LocalClientReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl LocalClientReceiver {
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    /// Next binary frame, skipping nothing; `None` on close or shutdown.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        match self.rx.recv().await {
            Some(TransportEvent::Frame(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
