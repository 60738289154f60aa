//! Retransmission timer driver.
//!
//! Reliable delivery requires that unacknowledged frames are re-sent if no
//! ack arrives within a bounded time.  [`RetransmitTimer`] provides the one
//! timer a connection needs:
//!
//! - [`arm`](RetransmitTimer::arm) spawns a tokio task that sleeps for the
//!   fixed timeout and then posts an [`Expiry`] on an internal channel.
//! - [`cancel`](RetransmitTimer::cancel) aborts that task.
//! - [`expired`](RetransmitTimer::expired) is polled by the send loop next to
//!   the socket inside `tokio::select!`.
//!
//! The timer task never touches the socket or the window.  All reactions to
//! an expiry happen on the send loop, so no state is shared with it.  Each arm
//! carries a generation number; an expiry that was already queued when the
//! timer was cancelled is recognised as stale and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A timer expiry delivered to the send loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Sequence number of the oldest unacknowledged frame when armed.
    pub oldest: u8,
    generation: u64,
}

/// Single retransmission timer for one connection.
#[derive(Debug)]
pub struct RetransmitTimer {
    duration: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Expiry>,
    rx: mpsc::UnboundedReceiver<Expiry>,
}

impl RetransmitTimer {
    /// A disarmed timer that will fire `duration` after each arm.
    pub fn new(duration: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            duration,
            generation: 0,
            task: None,
            tx,
            rx,
        }
    }

    /// `true` while an expiry is pending.
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Start the countdown for `oldest`, replacing any running countdown.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, oldest: u8) {
        self.cancel();
        let expiry = Expiry {
            oldest,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        let duration = self.duration;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // The receiver lives as long as the timer; a send error only
            // means the connection is being dropped.
            let _ = tx.send(expiry);
        }));
        log::trace!("[timer] armed for seq {oldest} ({:?})", self.duration);
    }

    /// Disarm the timer.  Any expiry already queued becomes stale.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::trace!("[timer] cancelled");
        }
        self.generation += 1;
    }

    /// Wait for the current countdown to fire.
    ///
    /// Never resolves while the timer is disarmed, so it can sit in a
    /// `select!` unconditionally.  Cancel-safe: dropping the future loses no
    /// expiry.
    pub async fn expired(&mut self) -> Expiry {
        loop {
            match self.rx.recv().await {
                Some(expiry) if expiry.generation == self.generation && self.task.is_some() => {
                    self.task = None;
                    log::trace!("[timer] expired for seq {}", expiry.oldest);
                    return expiry;
                }
                Some(_stale) => continue,
                // Unreachable while `self.tx` is alive.
                None => std::future::pending::<()>().await,
            }
        }
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
