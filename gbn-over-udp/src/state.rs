//! Connection finite-state machine (FSM).
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy and the [`ControlBlock`] that owns the current state together with
//! the bound peer address.  Legal transitions are enforced here; the frame
//! exchanges that drive them live in [`crate::connection`].
//!
//! ```text
//!  CLOSED ──SYN sent──▶ SYN_SENT ──SYN_ACK──▶ ESTABLISHED
//!    │                                          │     │
//!    └──SYN rcvd──▶ SYN_RCVD ──SYN_ACK sent─────┘     │
//!                                                     │
//!    CLOSED ◀──FIN_ACK── FIN_SENT ◀──FIN sent─────────┤
//!    CLOSED ◀──FIN_ACK sent── FIN_RCVD ◀──FIN rcvd────┘
//! ```
//!
//! Any state may fall back to `CLOSED` on teardown (reset, exhausted
//! attempts, or release of the channel).

use std::net::SocketAddr;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN_ACK.
    SynSent,
    /// SYN received and peer bound; SYN_ACK about to be sent.
    SynRcvd,
    /// Handshake complete; DATA may flow.
    Established,
    /// Local side sent FIN; waiting for FIN_ACK.
    FinSent,
    /// Peer's FIN received; FIN_ACK pending in `close`.
    FinRcvd,
}

impl ConnectionState {
    /// DATA frames are only sent or accepted while established.
    pub fn allows_data(self) -> bool {
        self == ConnectionState::Established
    }

    /// `true` when `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Closed)
                | (Closed, SynSent)
                | (Closed, SynRcvd)
                | (SynSent, Established)
                | (SynRcvd, Established)
                | (Established, FinSent)
                | (Established, FinRcvd)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynRcvd => "SYN_RCVD",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinSent => "FIN_SENT",
            ConnectionState::FinRcvd => "FIN_RCVD",
        };
        f.write_str(name)
    }
}

/// Attempted transition that the FSM does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// How an inbound SYN should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynDisposition {
    /// First SYN of a passive open: peer bound, state is now `SynRcvd`.
    Fresh,
    /// Retransmitted SYN from the bound peer: re-send SYN_ACK, state unchanged.
    Duplicate,
    /// SYN from an address other than the bound peer: answer with RST.
    Reject,
    /// SYN arriving while the connection is closing: drop it.
    Ignore,
}

/// Per-connection state record: FSM state plus the bound peer.
#[derive(Debug, Default)]
pub struct ControlBlock {
    state: ConnectionState,
    peer: Option<SocketAddr>,
}

impl ControlBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `true` when `addr` is the bound peer.
    pub fn is_peer(&self, addr: SocketAddr) -> bool {
        self.peer == Some(addr)
    }

    /// Bind the remote address (active open, before SYN is sent).
    pub fn bind_peer(&mut self, addr: SocketAddr) {
        self.peer = Some(addr);
    }

    /// Move to `next`, rejecting transitions the FSM does not allow.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state != next {
            log::debug!("[fsm] {} → {}", self.state, next);
        }
        self.state = next;
        Ok(())
    }

    /// Fall back to `CLOSED`, which every state may do.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            log::debug!("[fsm] {} → {}", self.state, ConnectionState::Closed);
            self.state = ConnectionState::Closed;
        }
    }

    /// Classify an inbound SYN from `from`.
    ///
    /// A fresh SYN binds the peer and moves `Closed → SynRcvd`.  A repeat from
    /// the bound peer during or after the handshake is idempotent: the state
    /// is left untouched so an established session is never reset.
    pub fn on_syn(&mut self, from: SocketAddr) -> SynDisposition {
        match self.state {
            ConnectionState::Closed if self.peer.is_none() => {
                self.peer = Some(from);
                self.state = ConnectionState::SynRcvd;
                log::debug!("[fsm] CLOSED → SYN_RCVD (peer {from})");
                SynDisposition::Fresh
            }
            _ if !self.is_peer(from) => SynDisposition::Reject,
            ConnectionState::SynRcvd | ConnectionState::Established => SynDisposition::Duplicate,
            _ => SynDisposition::Ignore,
        }
    }
}
