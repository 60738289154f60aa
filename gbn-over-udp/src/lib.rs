//! `gbn-over-udp`: a reliable, ordered byte stream over UDP using Go-Back-N.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────┐  DATA frames  ┌─────────────┐
//!  │ GbnSender │──────────────▶│ GbnReceiver │
//!  └────┬──────┘               └──────┬──────┘
//!       │     cumulative DATA_ACK     │
//!       │◀────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │  (FSM, timer, owns the channel)   │
//!  └────┬──────────────────────────────┘
//!       │ raw datagrams
//!  ┌────▼──────┐      ┌───────────┐
//!  │ Simulator │─────▶│  Socket   │  (tokio UdpSocket)
//!  └───────────┘      └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]: wire format and checksum
//! - [`seq`]: modular sequence-number arithmetic
//! - [`config`]: protocol parameters and validation
//! - [`state`]: connection FSM and control block
//! - [`gbn_sender`]: sliding window, adaptive window size, retry budget
//! - [`gbn_receiver`]: in-order delivery and cumulative acks
//! - [`timer`]: retransmission timer driver
//! - [`connection`]: handshake, transfer loops and teardown
//! - [`socket`]: datagram channel trait and UDP implementation
//! - [`simulator`]: loss/corruption injection for tests and lossy runs

pub mod config;
pub mod connection;
pub mod frame;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{Config, ConfigError};
pub use connection::{ConnError, Connection};
pub use frame::{Frame, FrameError, FrameType};
pub use simulator::{Simulator, SimulatorConfig};
pub use socket::{Channel, Socket};
pub use state::ConnectionState;
