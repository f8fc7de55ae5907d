//! Shared cancellation signal for every stage of a pipeline.
//!
//! The token combines an atomic flag, for cheap polling inside retry loops,
//! with a zero-capacity crossbeam channel that is never sent on. Triggering
//! drops the only sender, which disconnects the channel and wakes every
//! `select!` currently waiting on it.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
}

/// Observer side of the cancellation signal, held by stage workers.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
    signal: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
            }),
            signal: rx,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Channel that becomes disconnected once cancellation is triggered.
    ///
    /// Use it as an extra arm in `crossbeam_channel::select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        let sender = match self.shared.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }

    /// A handle that can only trigger cancellation.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            token: self.clone(),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable trigger handed to external parties (signal handlers, supervisors).
#[derive(Debug, Clone)]
pub struct Canceller {
    token: CancellationToken,
}

impl Canceller {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
