//! Bounded buffer of backend log lines.
//!
//! Backends log from inside operations that already hold the dispatcher
//! lock, so the ring has its own lock and never takes the dispatcher's.
//! Lines for the host listener are queued and only handed over by
//! [`LogRing::deliver_pending`], which the dispatcher calls once its lock
//! is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::LogSink;

/// Lines kept before the oldest are dropped.
pub const DEFAULT_RING_CAPACITY: usize = 200;

/// Host listener called with every line after it is buffered.
///
/// It runs outside the dispatcher lock and may call back into the host API.
pub type LogListener = Arc<dyn Fn(&str) + Send + Sync>;

pub struct LogRing {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
    listener: Mutex<Option<LogListener>>,
    pending: Mutex<Vec<String>>,
    dropped: AtomicU64,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            listener: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer one line. Trailing newlines are stripped.
    ///
    /// With a listener installed the line is also queued for the next
    /// [`LogRing::deliver_pending`].
    pub fn push(&self, line: &str) {
        let line = line.trim_end_matches(['\n', '\r']);
        {
            let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            lines.push_back(line.to_owned());
            while lines.len() > self.capacity {
                lines.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::info!(target: "calc::backend", "{line}");

        let listening = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if listening {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line.to_owned());
        }
    }

    /// Hand queued lines to the listener, oldest first.
    ///
    /// Must not be called while holding a lock the listener might take.
    pub fn deliver_pending(&self) {
        let lines = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        if lines.is_empty() {
            return;
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            for line in &lines {
                listener(line);
            }
        }
    }

    /// Take every buffered line, oldest first.
    pub fn drain(&self) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines discarded because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Install or clear the listener. Lines queued for a cleared listener
    /// are discarded.
    pub fn set_listener(&self, listener: Option<LogListener>) {
        let clearing = listener.is_none();
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = listener;
        if clearing {
            self.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// A sink that feeds this ring, for handing to backends.
    pub fn sink(self: &Arc<Self>) -> LogSink {
        let ring = Arc::clone(self);
        Arc::new(move |line: &str| ring.push(line))
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}
