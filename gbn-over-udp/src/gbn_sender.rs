//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] segments application buffers into DATA frames and keeps a
//! sliding window of up to `W` of them in flight.
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `DATA_ACK(s)` means every frame up to and
//!   including `s` arrived in order.
//! - A new ack inside `(last_acked, highest_sent]` slides the window.  The
//!   window then doubles (capped at `W_max`), or drops back to 1 if a timeout
//!   happened since the previous ack.
//! - A duplicate ack, or a malformed frame where an ack was expected, costs
//!   one retry and rewinds `next_seq` to `last_acked + 1`; the caller then
//!   resends the whole outstanding window (go back N).
//! - A timeout halves the window, costs one retry and rewinds the same way.
//! - Resending a frame the receiver already holds provokes an ack that adds
//!   nothing.  Such echoes are counted when an ack covers them and absorbed
//!   without spending a retry.
//! - More than `max_attempts` consecutive retries without progress is fatal.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.
//!
//! # Sequence-number layout
//!
//! ```text
//!  last_acked        next_seq       highest_sent
//!      │                 │               │
//!  ────┼─────────────────┼───────────────┼──────────▶ seq space
//!      │ <─ in flight ──▶│<─ rewound ───▶│<─ unsent ─▶
//! ```

use std::collections::VecDeque;

use crate::config::Config;
use crate::frame::Frame;
use crate::seq;

/// What an inbound `DATA_ACK` did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The window slid forward by this many frames.
    Advanced { frames: usize },
    /// The ack repeats `last_acked`.
    Duplicate,
    /// The ack predates `last_acked` or names a frame never sent; ignored.
    Stale,
}

/// How the sender reacts to a duplicate ack, malformed ack, or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// `next_seq` rewound to `from`; `frames` frames must be resent.
    GoBack { from: u8, frames: usize },
    /// Stale duplicate from before the last go-back; nothing to do.
    Absorbed,
    /// The retry budget is spent; the transfer has failed.
    Exhausted { attempts: u32 },
}

/// Counters kept across the lifetime of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// DATA frames handed out for transmission, first sends and resends.
    pub frames_sent: u64,
    /// Subset of `frames_sent` that were resends.
    pub retransmissions: u64,
    /// Retransmission timer expiries.
    pub timeouts: u64,
    /// Rewinds of `next_seq` (timeouts plus duplicate-ack triggers).
    pub go_backs: u64,
}

/// Go-Back-N send-side state for one connection.
#[derive(Debug)]
pub struct GbnSender {
    /// Cumulative ack received so far (left window edge is one past it).
    last_acked: u8,

    /// Current window size `W`.
    window: usize,

    /// `W_max`.
    max_window: usize,

    max_payload: usize,

    max_attempts: u32,

    /// Consecutive retries without progress.
    retries: u32,

    /// Set by a timeout, cleared by the next advancing ack.
    timed_out: bool,

    /// Unacknowledged payloads; the front one is numbered `last_acked + 1`.
    pending: VecDeque<Vec<u8>>,

    /// Frames from the front transmitted in the current pass.
    in_flight: usize,

    /// Frames from the front transmitted at least once.
    sent: usize,

    /// Frames from the front resent in the current pass.
    resent: usize,

    /// Duplicate acks still expected that carry no news.
    absorb: usize,

    stats: SenderStats,
}

impl GbnSender {
    /// Create a sender with nothing queued, using `config`'s window bounds,
    /// segment size and retry budget.
    pub fn new(config: &Config) -> Self {
        Self {
            last_acked: seq::NONE_ACKED,
            window: config.initial_window.max(1),
            max_window: config.max_window.max(1),
            max_payload: config.max_payload.max(1),
            max_attempts: config.max_attempts,
            retries: 0,
            timed_out: false,
            pending: VecDeque::new(),
            in_flight: 0,
            sent: 0,
            resent: 0,
            absorb: 0,
            stats: SenderStats::default(),
        }
    }

    /// Segment `data` into frames of at most `max_payload` bytes and queue
    /// them behind anything already pending.  Returns the number of frames.
    pub fn enqueue(&mut self, data: &[u8]) -> usize {
        let before = self.pending.len();
        self.pending
            .extend(data.chunks(self.max_payload).map(<[u8]>::to_vec));
        self.pending.len() - before
    }

    /// Next frame the window admits, or `None` when the window is full or
    /// every queued frame is in flight.
    ///
    /// Admission follows `(next_seq − last_acked) mod SEQ_SPACE ≤ W`.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let payload = self.pending.get(self.in_flight)?;
        let next = self.next_seq();
        if !seq::in_window(self.last_acked, next, self.window) {
            return None;
        }
        let frame = Frame::data(next, payload.clone());

        self.in_flight += 1;
        self.stats.frames_sent += 1;
        if self.in_flight > self.sent {
            self.sent = self.in_flight;
        } else {
            self.resent += 1;
            self.stats.retransmissions += 1;
        }
        Some(frame)
    }

    /// Process a cumulative `DATA_ACK(ack)`.
    pub fn on_ack(&mut self, ack: u8) -> AckOutcome {
        if ack == self.last_acked {
            return AckOutcome::Duplicate;
        }
        if !seq::in_window(self.last_acked, ack, self.sent) {
            return AckOutcome::Stale;
        }

        let frames = seq::distance(self.last_acked, ack);
        self.pending.drain(..frames);
        self.last_acked = ack;
        self.sent -= frames;
        self.in_flight = self.in_flight.saturating_sub(frames);
        self.retries = 0;

        // Each resent copy covered by this ack is answered with an ack at or
        // below it.  One of them is this ack; the rest arrive as duplicates.
        let echoes = self.resent.min(frames);
        self.resent -= echoes;
        self.absorb += echoes.saturating_sub(1);

        self.window = if self.timed_out {
            1
        } else {
            (self.window * 2).min(self.max_window)
        };
        self.timed_out = false;

        AckOutcome::Advanced { frames }
    }

    /// React to a duplicate ack or a frame that should have been an ack.
    pub fn on_duplicate(&mut self) -> Recovery {
        if self.absorb > 0 {
            self.absorb -= 1;
            return Recovery::Absorbed;
        }
        if let Some(exhausted) = self.spend_retry() {
            return exhausted;
        }
        // Every frame sent after the missing one provokes its own duplicate;
        // this one is already handled, the rest carry no news.
        self.absorb = self.in_flight.saturating_sub(2);
        self.go_back()
    }

    /// React to the retransmission timer expiring without progress.
    pub fn on_timeout(&mut self) -> Recovery {
        self.stats.timeouts += 1;
        self.window = (self.window / 2).max(1);
        self.timed_out = true;
        self.absorb = 0;
        if let Some(exhausted) = self.spend_retry() {
            return exhausted;
        }
        self.go_back()
    }

    fn spend_retry(&mut self) -> Option<Recovery> {
        self.retries += 1;
        (self.retries > self.max_attempts).then_some(Recovery::Exhausted {
            attempts: self.retries,
        })
    }

    fn go_back(&mut self) -> Recovery {
        let frames = self.in_flight;
        self.in_flight = 0;
        self.resent = 0;
        self.stats.go_backs += 1;
        Recovery::GoBack {
            from: self.next_seq(),
            frames,
        }
    }

    /// Sequence number the next transmitted frame will carry.
    pub fn next_seq(&self) -> u8 {
        seq::add(self.last_acked, 1 + self.in_flight)
    }

    pub fn last_acked(&self) -> u8 {
        self.last_acked
    }

    /// Current window size `W`.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Frames transmitted in the current pass and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Oldest unacknowledged frame that is on the wire, if any.
    pub fn oldest_unacked(&self) -> Option<u8> {
        (self.in_flight > 0).then(|| seq::add(self.last_acked, 1))
    }

    /// `true` once every queued frame has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }
}
