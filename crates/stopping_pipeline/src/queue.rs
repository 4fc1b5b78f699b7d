//! src/queue.rs
//!
//! A FIFO channel with an explicit end-of-stream signal.
//!
//! `StoppingQueue<T>` carries [`Message<T>`] values over a crossbeam channel.
//! Producers `put` payloads and `close` the queue by enqueuing one
//! [`Message::EndMarker`] per consumer. Consumers `get` until they see a marker
//! and never read again afterwards.
//!
//! Alongside the channel the queue keeps join accounting: every enqueued
//! message (markers included) increments an outstanding counter, every
//! `task_done` decrements it, and `wait_completion` blocks until it reaches
//! zero.
//!
//! # Lifecycle
//!
//! ```text
//!   Open ──close()──▶ Closing ──last marker read──▶ Drained ──discard()──▶ Discarded
//!     └───────────────────────────discard()───────────────────────────────────┘
//! ```
//!
//! `discard` is terminal: blocked `get`/`put` callers wake up with
//! [`QueueError::Discarded`] and every later call fails the same way.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::iter::FusedIterator;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::QueueError;

/// A value travelling through a [`StoppingQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    Item(T),
    /// No further payloads will arrive for the consumer that reads this.
    EndMarker,
}

impl<T> Message<T> {
    pub fn is_end_marker(&self) -> bool {
        matches!(self, Message::EndMarker)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Message::Item(item) => Some(item),
            Message::EndMarker => None,
        }
    }
}

/// Observable lifecycle of a queue. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueState {
    /// Accepting puts and gets, no marker enqueued yet.
    Open,
    /// At least one marker enqueued, consumers still running.
    Closing,
    /// Every enqueued marker has been read.
    Drained,
    Discarded,
}

/// What [`StoppingQueue::discard_pending`] removed from the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardedCounts {
    pub items: usize,
    pub markers: usize,
}

#[derive(Debug)]
struct Accounting {
    state: QueueState,
    /// Enqueued but not yet acknowledged, markers included.
    outstanding: usize,
    markers_sent: usize,
    markers_seen: usize,
}

/// Multi-producer, multi-consumer FIFO queue with end-markers and join
/// accounting. Share it between threads with `Arc`.
pub struct StoppingQueue<T> {
    name: String,
    capacity: Option<usize>,
    tx: Sender<Message<T>>,
    rx: Receiver<Message<T>>,
    accounting: Mutex<Accounting>,
    settled: Condvar,
    // Dropping the sender disconnects `discard_rx`, waking every select below.
    discard_tx: Mutex<Option<Sender<()>>>,
    discard_rx: Receiver<()>,
}

impl<T> StoppingQueue<T> {
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::with_capacity(name, None)
    }

    /// Creates a queue whose `put` blocks while `capacity` messages are waiting.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_capacity(name, Some(capacity))
    }

    /// `None` means unbounded.
    pub fn with_capacity(name: impl Into<String>, capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let (discard_tx, discard_rx) = bounded(0);

        Self {
            name: name.into(),
            capacity,
            tx,
            rx,
            accounting: Mutex::new(Accounting {
                state: QueueState::Open,
                outstanding: 0,
                markers_sent: 0,
                markers_seen: 0,
            }),
            settled: Condvar::new(),
            discard_tx: Mutex::new(Some(discard_tx)),
            discard_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Messages currently waiting in the channel, markers included.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Enqueued messages not yet acknowledged with [`task_done`](Self::task_done).
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    /// Enqueues a payload, blocking while a bounded queue is full.
    pub fn put(&self, item: T) -> Result<(), QueueError> {
        {
            let mut acc = self.lock();
            self.ensure_live(&acc)?;
            acc.outstanding += 1;
        }
        self.send(Message::Item(item), 0)
    }

    /// Enqueues exactly one end-marker.
    pub fn close(&self) -> Result<(), QueueError> {
        self.close_n(1)
    }

    /// Enqueues `consumers` end-markers, one for each consumer that must stop.
    ///
    /// All markers are registered before any is sent, so the queue cannot be
    /// reported as drained while some of them are still in flight.
    pub fn close_n(&self, consumers: usize) -> Result<(), QueueError> {
        {
            let mut acc = self.lock();
            self.ensure_live(&acc)?;
            acc.outstanding += consumers;
            acc.markers_sent += consumers;
            if acc.state == QueueState::Open && consumers > 0 {
                acc.state = QueueState::Closing;
            }
        }
        for sent in 0..consumers {
            self.send(Message::EndMarker, consumers - sent)?;
        }
        Ok(())
    }

    /// Blocking dequeue of the next payload or end-marker.
    ///
    /// The caller owns one acknowledgement per successful call and must pay it
    /// with [`task_done`](Self::task_done).
    pub fn get(&self) -> Result<Message<T>, QueueError> {
        self.ensure_live(&self.lock())?;
        let received = select! {
            recv(self.rx) -> msg => msg.ok(),
            recv(self.discard_rx) -> _ => None,
        };
        self.received(received)
    }

    /// Like [`get`](Self::get), failing with [`QueueError::Timeout`] after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Message<T>, QueueError> {
        self.ensure_live(&self.lock())?;
        let received = select! {
            recv(self.rx) -> msg => msg.ok(),
            recv(self.discard_rx) -> _ => None,
            default(timeout) => {
                return Err(QueueError::Timeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        };
        self.received(received)
    }

    /// Acknowledges one dequeued message as processed.
    pub fn task_done(&self) -> Result<(), QueueError> {
        let mut acc = self.lock();
        if acc.outstanding == 0 {
            return Err(QueueError::UnbalancedAck(self.name.clone()));
        }
        acc.outstanding -= 1;
        if acc.outstanding == 0 {
            self.settled.notify_all();
        }
        Ok(())
    }

    /// Blocks until every enqueued message has been acknowledged.
    ///
    /// Fails if the queue is discarded while messages are still unacknowledged.
    pub fn wait_completion(&self) -> Result<(), QueueError> {
        let acc = self
            .settled
            .wait_while(self.lock(), |acc| {
                acc.outstanding > 0 && acc.state != QueueState::Discarded
            })
            .unwrap_or_else(PoisonError::into_inner);
        if acc.outstanding > 0 {
            return Err(QueueError::Discarded(self.name.clone()));
        }
        Ok(())
    }

    /// Bounded [`wait_completion`](Self::wait_completion). Returns `true` once
    /// nothing is outstanding, `false` if the timeout expired first.
    pub fn wait_completion_timeout(&self, timeout: Duration) -> bool {
        let (acc, _) = self
            .settled
            .wait_timeout_while(self.lock(), timeout, |acc| {
                acc.outstanding > 0 && acc.state != QueueState::Discarded
            })
            .unwrap_or_else(PoisonError::into_inner);
        acc.outstanding == 0
    }

    /// Lazily yields payloads until an end-marker is read.
    ///
    /// Each payload is acknowledged when the next one is requested or when the
    /// iterator is dropped. A drained queue cannot be iterated again: a
    /// consumer that calls this after every sent marker has been read gets
    /// [`QueueError::AlreadyDrained`] instead of blocking, so consumers must
    /// obtain their `Drain` before the producer closes the queue.
    pub fn drain(&self) -> Result<Drain<'_, T>, QueueError> {
        let acc = self.lock();
        match acc.state {
            QueueState::Drained => Err(QueueError::AlreadyDrained(self.name.clone())),
            QueueState::Discarded => Err(QueueError::Discarded(self.name.clone())),
            QueueState::Open | QueueState::Closing => Ok(Drain {
                queue: self,
                unacked: false,
                finished: false,
            }),
        }
    }

    /// Pops and acknowledges everything currently waiting in the queue.
    ///
    /// Used to clear end-markers left behind by consumers that exited early.
    pub fn discard_pending(&self) -> DiscardedCounts {
        let mut counts = DiscardedCounts::default();
        let mut acc = self.lock();
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                Message::Item(_) => counts.items += 1,
                Message::EndMarker => {
                    counts.markers += 1;
                    acc.markers_seen += 1;
                }
            }
            acc.outstanding = acc.outstanding.saturating_sub(1);
        }
        self.refresh_drained(&mut acc);
        if acc.outstanding == 0 {
            self.settled.notify_all();
        }
        counts
    }

    /// Moves the queue to its terminal state, dropping anything still queued.
    pub fn discard(&self) {
        let mut acc = self.lock();
        if acc.state == QueueState::Discarded {
            return;
        }
        acc.state = QueueState::Discarded;
        // Wake blocked callers before freeing space, so a blocked put cannot
        // slip into the slot emptied below.
        self.discard_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        while let Ok(_dropped) = self.rx.try_recv() {
            acc.outstanding = acc.outstanding.saturating_sub(1);
        }
        self.settled.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Accounting> {
        self.accounting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self, acc: &Accounting) -> Result<(), QueueError> {
        if acc.state == QueueState::Discarded {
            return Err(QueueError::Discarded(self.name.clone()));
        }
        Ok(())
    }

    /// Sends an already accounted message. On failure the accounting for this
    /// message and the `unsent_markers - 1` that would have followed it is
    /// rolled back.
    fn send(&self, msg: Message<T>, unsent_markers: usize) -> Result<(), QueueError> {
        let delivered = select! {
            send(self.tx, msg) -> res => res.is_ok(),
            recv(self.discard_rx) -> _ => false,
        };
        if delivered {
            return Ok(());
        }

        let mut acc = self.lock();
        let unsent = unsent_markers.max(1);
        acc.outstanding = acc.outstanding.saturating_sub(unsent);
        acc.markers_sent = acc.markers_sent.saturating_sub(unsent_markers);
        self.settled.notify_all();
        Err(QueueError::Discarded(self.name.clone()))
    }

    fn received(&self, received: Option<Message<T>>) -> Result<Message<T>, QueueError> {
        let msg = received.ok_or_else(|| QueueError::Discarded(self.name.clone()))?;
        if msg.is_end_marker() {
            let mut acc = self.lock();
            acc.markers_seen += 1;
            self.refresh_drained(&mut acc);
        }
        Ok(msg)
    }

    fn refresh_drained(&self, acc: &mut Accounting) {
        if acc.state == QueueState::Closing
            && acc.markers_seen >= acc.markers_sent
            && self.rx.is_empty()
        {
            acc.state = QueueState::Drained;
        }
    }
}

impl<T> std::fmt::Debug for StoppingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let acc = self.lock();
        f.debug_struct("StoppingQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.rx.len())
            .field("state", &acc.state)
            .field("outstanding", &acc.outstanding)
            .finish()
    }
}

/// Iterator returned by [`StoppingQueue::drain`].
pub struct Drain<'q, T> {
    queue: &'q StoppingQueue<T>,
    unacked: bool,
    finished: bool,
}

impl<T> Drain<'_, T> {
    fn ack(&mut self) {
        if !self.unacked {
            return;
        }
        self.unacked = false;
        if let Err(e) = self.queue.task_done() {
            tracing::warn!(queue = self.queue.name(), "drain acknowledgement failed: {}", e);
        }
    }
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.finished {
            return None;
        }
        self.ack();

        match self.queue.get() {
            Ok(Message::Item(item)) => {
                self.unacked = true;
                Some(item)
            }
            Ok(Message::EndMarker) => {
                self.unacked = true;
                self.ack();
                self.finished = true;
                None
            }
            Err(e) => {
                tracing::debug!(queue = self.queue.name(), "drain stopped: {}", e);
                self.finished = true;
                None
            }
        }
    }
}

impl<T> FusedIterator for Drain<'_, T> {}

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        self.ack();
    }
}
