//! Bounded, closable FIFO between the dial factory and `accept()` callers.

use std::sync::Mutex as StdMutex;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use border0_core::{Border0Error, Border0Result};

/// Why an item could not be enqueued. The item is handed back so the caller
/// decides how to dispose of it.
#[derive(Debug)]
pub enum PushError<T> {
    /// The queue was closed.
    Closed(T),
    /// The queue stayed full until the deadline.
    Full(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(item) | Self::Full(item) => item,
        }
    }
}

/// Bounded FIFO with close semantics.
///
/// Pushes block while the queue is full. After [`AcceptQueue::close`] every
/// push fails with [`PushError::Closed`], items still queued are dropped, and
/// every pending or later [`AcceptQueue::pop`] returns the close error.
pub struct AcceptQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    closed: CancellationToken,
    /// Sends and the close flag are serialized here, so nothing lands in the
    /// channel after `close` has drained it.
    gate: StdMutex<Gate>,
}

#[derive(Default)]
struct Gate {
    closed: bool,
    /// Set when the queue was closed by a fatal error rather than by its owner.
    fatal: Option<Border0Error>,
}

impl<T: Send> AcceptQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            gate: StdMutex::new(Gate::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Enqueue, waiting for room until the queue is closed.
    pub async fn push(&self, item: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(item));
        }
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(PushError::Closed(item)),
            permit = self.tx.reserve() => permit,
        };
        self.commit(permit, item)
    }

    /// Enqueue, waiting for room until `deadline` or until the queue is closed.
    pub async fn push_until(&self, item: T, deadline: Instant) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(item));
        }
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(PushError::Closed(item)),
            permit = self.tx.reserve() => permit,
            _ = time::sleep_until(deadline) => return Err(PushError::Full(item)),
        };
        self.commit(permit, item)
    }

    fn commit(
        &self,
        permit: Result<mpsc::Permit<'_, T>, SendError<()>>,
        item: T,
    ) -> Result<(), PushError<T>> {
        let gate = self.gate();
        match permit {
            Ok(permit) if !gate.closed => {
                permit.send(item);
                Ok(())
            }
            _ => Err(PushError::Closed(item)),
        }
    }

    /// Dequeue the oldest item, waiting until one arrives or the queue closes.
    pub async fn pop(&self) -> Border0Result<T> {
        let mut rx = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(self.close_error()),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.close_error()),
            item = rx.recv() => item.ok_or_else(|| self.close_error()),
        }
    }

    /// Close the queue and drop everything still in it. Idempotent.
    pub async fn close(&self) {
        self.gate().closed = true;
        self.closed.cancel();
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0usize;
        while let Ok(item) = rx.try_recv() {
            drop(item);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "closed queued items that were never accepted");
        }
    }

    /// Close the queue because of `err`; later pops return `err`.
    pub async fn fail(&self, err: Border0Error) {
        self.gate().fatal.get_or_insert(err);
        self.close().await;
    }

    fn close_error(&self) -> Border0Error {
        self.gate()
            .fatal
            .clone()
            .unwrap_or(Border0Error::QueueClosed)
    }

    fn gate(&self) -> std::sync::MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|p| p.into_inner())
    }
}
