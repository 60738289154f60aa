//! Go-Back-N receive-side state machine.
//!
//! [`GbnReceiver`] implements the receiver side of Go-Back-N:
//!
//! - Only the frame numbered `largest_in_order + 1` is accepted.
//! - Out-of-order or duplicate frames are **discarded**, never buffered.
//! - After every valid DATA frame (accepted or not) the caller sends a
//!   cumulative `DATA_ACK(largest_in_order)`, so a gap shows up at the sender
//!   as a duplicate ack.
//!
//! Corrupted frames never reach this module: the connection layer drops them
//! before decoding succeeds, and the sender's timer recovers them.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::seq;

/// Result of offering a DATA frame to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// In-order frame; payload appended to the application buffer.
    Accepted,
    /// Duplicate or out-of-order frame; discarded.
    Discarded,
}

/// Go-Back-N receive-side state for one connection.
#[derive(Debug)]
pub struct GbnReceiver {
    /// Highest sequence number delivered in order (cumulative ack value).
    largest_in_order: u8,

    /// In-order payload bytes waiting for the application.
    app_buffer: VecDeque<u8>,
}

impl Default for GbnReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl GbnReceiver {
    /// A receiver that has delivered nothing yet.
    pub fn new() -> Self {
        Self {
            largest_in_order: seq::NONE_ACKED,
            app_buffer: VecDeque::new(),
        }
    }

    /// Process an inbound DATA frame.
    ///
    /// The caller must follow up with `DATA_ACK(`[`ack_number`]`)` in both
    /// outcomes.
    ///
    /// [`ack_number`]: GbnReceiver::ack_number
    pub fn on_data(&mut self, seqnum: u8, payload: &[u8]) -> Delivery {
        if seq::in_window(self.largest_in_order, seqnum, 1) {
            self.app_buffer.extend(payload.iter().copied());
            self.largest_in_order = seqnum;
            Delivery::Accepted
        } else {
            Delivery::Discarded
        }
    }

    /// Cumulative acknowledgement to place in the next `DATA_ACK`.
    pub fn ack_number(&self) -> u8 {
        self.largest_in_order
    }

    /// Bytes delivered in order but not yet read by the application.
    pub fn buffered(&self) -> usize {
        self.app_buffer.len()
    }

    /// Copy up to `buf.len()` in-order bytes into `buf`, returning the count.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.app_buffer.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.app_buffer.drain(..n)) {
            *dst = src;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let r = GbnReceiver::new();
        assert_eq!(r.ack_number(), seq::NONE_ACKED);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn in_order_frame_accepted() {
        let mut r = GbnReceiver::new();
        assert_eq!(r.on_data(0, b"hello"), Delivery::Accepted);
        assert_eq!(r.ack_number(), 0);
        assert_eq!(r.buffered(), 5);
    }

    #[test]
    fn future_frame_discarded() {
        let mut r = GbnReceiver::new();
        r.on_data(0, b"a");

        assert_eq!(r.on_data(2, b"gap"), Delivery::Discarded);
        assert_eq!(r.ack_number(), 0, "cumulative ack must not advance past a gap");
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn duplicate_frame_discarded() {
        let mut r = GbnReceiver::new();
        r.on_data(0, b"hello");

        assert_eq!(r.on_data(0, b"hello"), Delivery::Discarded);
        assert_eq!(r.buffered(), 5, "duplicate payload must not be delivered twice");
    }

    #[test]
    fn gap_filled_by_retransmission() {
        let mut r = GbnReceiver::new();
        assert_eq!(r.on_data(0, b"ab"), Delivery::Accepted);
        assert_eq!(r.on_data(2, b"ef"), Delivery::Discarded);
        assert_eq!(r.on_data(1, b"cd"), Delivery::Accepted);
        assert_eq!(r.on_data(2, b"ef"), Delivery::Accepted);

        let mut buf = [0u8; 6];
        assert_eq!(r.read(&mut buf), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn read_drains_partially() {
        let mut r = GbnReceiver::new();
        r.on_data(0, b"hello world");

        let mut buf = [0u8; 5];
        assert_eq!(r.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(r.buffered(), 6);
    }

    #[test]
    fn read_into_larger_buffer() {
        let mut r = GbnReceiver::new();
        r.on_data(0, b"hi");

        let mut buf = [0u8; 100];
        assert_eq!(r.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn sequence_wraps_past_255() {
        let mut r = GbnReceiver::new();
        for i in 0..300usize {
            let seqnum = seq::add(seq::FIRST_DATA_SEQ, i);
            assert_eq!(r.on_data(seqnum, &[i as u8]), Delivery::Accepted);
        }
        assert_eq!(r.ack_number(), seq::add(seq::FIRST_DATA_SEQ, 299));
        assert_eq!(r.buffered(), 300);

        // The frame from one lap ago must not be mistaken for the next one.
        assert_eq!(r.on_data(r.ack_number(), b"stale"), Delivery::Discarded);
    }
}
