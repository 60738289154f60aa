//! Fault-injecting channel for tests and lossy runs of the CLI.
//!
//! Real networks drop and corrupt datagrams.  To exercise the reliability
//! mechanisms without depending on actual network conditions, [`Simulator`]
//! wraps any [`Channel`] and applies a fault model to every outbound datagram:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Packet loss  | Drop the datagram with probability `loss_rate`.        |
//! | Corruption   | Flip exactly one bit with probability `corrupt_rate`.  |
//! | Scripted drop| Drop the next datagram(s) matching a frame type and,   |
//! |              | optionally, a sequence number.                         |
//!
//! The RNG is seeded from [`SimulatorConfig::seed`] when one is given, so a
//! failing run can be replayed.  Counters of what passed through are kept in
//! [`SimStats`] for assertions in tests.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ConfigError;
use crate::frame::FrameType;
use crate::socket::{Channel, Socket};

/// Configuration for the fault-injection model.
///
/// Probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram that survived loss has one bit flipped.
    pub corrupt_rate: f64,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn lossy(loss_rate: f64, corrupt_rate: f64) -> Self {
        Self {
            loss_rate,
            corrupt_rate,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("loss", self.loss_rate), ("corruption", self.corrupt_rate)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        Ok(())
    }
}

/// One-shot rule that drops matching datagrams.
#[derive(Debug, Clone, Copy)]
struct DropRule {
    kind: FrameType,
    seqnum: Option<u8>,
    remaining: usize,
}

impl DropRule {
    fn matches(&self, kind: FrameType, seqnum: u8) -> bool {
        self.kind == kind && self.seqnum.is_none_or(|s| s == seqnum)
    }
}

/// Counters of datagrams seen by a [`Simulator`].
#[derive(Debug, Default)]
pub struct SimStats {
    sent: [AtomicU64; FrameType::ALL.len()],
    dropped: AtomicU64,
    corrupted: AtomicU64,
}

impl SimStats {
    /// Datagrams of `kind` handed to the simulator, including dropped ones.
    pub fn sent(&self, kind: FrameType) -> u64 {
        self.sent[kind.index()].load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn corrupted(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }
}

/// What the fault model decided for one datagram.
enum Fate {
    Deliver,
    Drop,
    Corrupt { byte: usize, bit: u8 },
}

/// A fault-injecting wrapper around a datagram channel.
#[derive(Debug)]
pub struct Simulator<C = Socket> {
    inner: C,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    rules: Mutex<Vec<DropRule>>,
    stats: SimStats,
}

impl<C: Channel> Simulator<C> {
    /// Wrap `inner`, rejecting probabilities outside `[0, 1]`.
    pub fn new(inner: C, config: SimulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            inner,
            config,
            rng: Mutex::new(rng),
            rules: Mutex::new(Vec::new()),
            stats: SimStats::default(),
        })
    }

    /// A simulator that injects no random faults; only scripted drops apply.
    pub fn reliable(inner: C) -> Self {
        Self {
            inner,
            config: SimulatorConfig::default(),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            rules: Mutex::new(Vec::new()),
            stats: SimStats::default(),
        }
    }

    /// Drop the next `count` outbound frames of `kind` (carrying `seqnum`, if
    /// given).
    pub fn drop_next(&self, kind: FrameType, seqnum: Option<u8>, count: usize) {
        if count == 0 {
            return;
        }
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules.push(DropRule {
            kind,
            seqnum,
            remaining: count,
        });
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Decide the fate of `datagram`.  Locks are released before any await.
    fn judge(&self, datagram: &[u8]) -> Fate {
        let kind = datagram.first().and_then(|&b| FrameType::try_from(b).ok());
        let seqnum = datagram.get(1).copied().unwrap_or(0);

        if let Some(kind) = kind {
            self.stats.sent[kind.index()].fetch_add(1, Ordering::Relaxed);

            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rule) = rules.iter_mut().find(|r| r.matches(kind, seqnum)) {
                rule.remaining -= 1;
                rules.retain(|r| r.remaining > 0);
                log::debug!("[sim] scripted drop of {kind}({seqnum})");
                return Fate::Drop;
            }
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if self.config.loss_rate > 0.0 && rng.random_bool(self.config.loss_rate) {
            return Fate::Drop;
        }
        if !datagram.is_empty()
            && self.config.corrupt_rate > 0.0
            && rng.random_bool(self.config.corrupt_rate)
        {
            return Fate::Corrupt {
                byte: rng.random_range(0..datagram.len()),
                bit: rng.random_range(0..8),
            };
        }
        Fate::Deliver
    }
}

impl<C: Channel> Channel for Simulator<C> {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        match self.judge(datagram) {
            Fate::Deliver => self.inner.send_to(datagram, dest).await,
            Fate::Drop => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("[sim] dropped {} bytes to {dest}", datagram.len());
                Ok(())
            }
            Fate::Corrupt { byte, bit } => {
                self.stats.corrupted.fetch_add(1, Ordering::Relaxed);
                log::trace!("[sim] corrupted byte {byte} bit {bit} to {dest}");
                let mut damaged = datagram.to_vec();
                damaged[byte] ^= 1 << bit;
                self.inner.send_to(&damaged, dest).await
            }
        }
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        self.inner.recv_from().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
