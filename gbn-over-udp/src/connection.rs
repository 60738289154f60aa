//! Go-Back-N connection: handshake, windowed transfer and teardown.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(buf) / recv(buf) / close()
//!      ▼
//!  Connection<C>
//!    ├── ControlBlock    (FSM state, bound peer)
//!    ├── GbnSender       (segmentation, sliding window, retry budget)
//!    ├── GbnReceiver     (in-order delivery, cumulative ack)
//!    ├── RetransmitTimer (expiry events for the send loop)
//!    └── C: Channel      (UDP socket, simulator, or Arc of either)
//! ```
//!
//! Every operation is a single async control loop.  The send loop multiplexes
//! the channel and the timer with `tokio::select!`; handshake and close steps
//! wait on the channel with a fixed deadline.  All reactions, including those
//! to a timer expiry, run on the loop itself, so nothing here is shared across
//! tasks.
//!
//! # Usage
//!
//! ```ignore
//! let socket = Socket::bind_for(server).await?;
//! let mut conn = Connection::connect(socket, server, Config::default()).await?;
//! conn.send(b"hello").await?;
//! conn.close().await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::frame::{Frame, FrameError, FrameType};
use crate::gbn_receiver::{Delivery, GbnReceiver};
use crate::gbn_sender::{AckOutcome, GbnSender, Recovery, SenderStats};
use crate::socket::{is_transient_io_error, Channel, Socket};
use crate::state::{ConnectionState, ControlBlock, SynDisposition};
use crate::timer::{Expiry, RetransmitTimer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by connection operations.
#[derive(Error, Debug)]
pub enum ConnError {
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("{op} gave up after {attempts} attempts")]
    AttemptsExhausted { op: &'static str, attempts: u32 },

    #[error("{op} is not allowed in state {state}")]
    BadState {
        op: &'static str,
        state: ConnectionState,
    },

    #[error("connection reset by peer")]
    Reset,

    #[error("connection refused by {0}")]
    Refused(SocketAddr),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("no frame received within {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("frame could not be encoded: {0}")]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// Inbound classification
// ---------------------------------------------------------------------------

/// One receive from the channel, classified.
#[derive(Debug)]
enum Inbound {
    /// A frame whose checksum verified.
    Frame(Frame, SocketAddr),
    /// A datagram that failed to decode.
    Corrupt(SocketAddr, FrameError),
    /// A transient receive error; treated as if nothing arrived.
    Nothing,
}

async fn next_inbound<C: Channel>(channel: &C) -> Result<Inbound, ConnError> {
    match channel.recv_from().await {
        Ok((bytes, from)) => Ok(match Frame::decode(&bytes) {
            Ok(frame) => Inbound::Frame(frame, from),
            Err(e) => Inbound::Corrupt(from, e),
        }),
        Err(e) if is_transient_io_error(&e) => {
            log::trace!("[gbn] transient receive error: {e}");
            Ok(Inbound::Nothing)
        }
        Err(e) => Err(e.into()),
    }
}

/// What woke up the send loop.
enum Event {
    Inbound(Result<Inbound, ConnError>),
    Expired(Expiry),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A reliable, ordered byte stream to one peer over a datagram channel.
///
/// Obtain one via [`Connection::connect`] or [`Connection::accept`].  The
/// channel is owned by the connection and dropped exactly once, when the
/// connection reaches `CLOSED`.
#[derive(Debug)]
pub struct Connection<C = Socket> {
    cb: ControlBlock,
    sender: GbnSender,
    receiver: GbnReceiver,
    timer: RetransmitTimer,
    config: Config,
    channel: Option<C>,
    local_addr: SocketAddr,
}

impl<C: Channel> Connection<C> {
    fn new(channel: C, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        let local_addr = channel.local_addr()?;
        Ok(Self {
            cb: ControlBlock::new(),
            sender: GbnSender::new(&config),
            receiver: GbnReceiver::new(),
            timer: RetransmitTimer::new(config.timeout),
            config,
            channel: Some(channel),
            local_addr,
        })
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: send SYN to `peer` and wait for SYN_ACK.
    ///
    /// The SYN is re-sent after every timeout or unexpected reply, up to
    /// `max_attempts` times.  An RST from the peer fails with
    /// [`ConnError::Refused`].
    pub async fn connect(channel: C, peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        let mut conn = Self::new(channel, config)?;
        let opened = conn.active_open(peer).await;
        conn.fail_on_io(opened)?;
        Ok(conn)
    }

    async fn active_open(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.cb.bind_peer(peer);
        self.enter("connect", ConnectionState::SynSent)?;

        let syn = Frame::control(FrameType::Syn, 0);
        let mut attempts = 0u32;
        loop {
            if attempts > self.config.max_attempts {
                log::error!("[gbn] no SYN_ACK from {peer} after {attempts} SYNs");
                return Err(self.abort(ConnError::AttemptsExhausted {
                    op: "connect",
                    attempts,
                }));
            }
            self.transmit(&syn).await?;
            attempts += 1;
            log::debug!("[gbn] → SYN to {peer} (attempt {attempts})");

            let deadline = Instant::now() + self.config.timeout;
            while let Some(inbound) = self.recv_until(deadline).await? {
                match inbound {
                    Inbound::Frame(frame, from) if from == peer => match frame.kind {
                        FrameType::SynAck => {
                            self.enter("connect", ConnectionState::Established)?;
                            log::info!("[gbn] connected to {peer}");
                            return Ok(());
                        }
                        FrameType::Rst => {
                            log::warn!("[gbn] {peer} refused the connection");
                            return Err(self.abort(ConnError::Refused(peer)));
                        }
                        other => {
                            log::warn!("[gbn] expected SYN_ACK, got {other}; retrying");
                            break;
                        }
                    },
                    Inbound::Frame(frame, from) if frame.kind == FrameType::Syn => {
                        self.answer_syn(from).await?;
                    }
                    Inbound::Corrupt(from, e) if from == peer => {
                        log::warn!("[gbn] corrupt reply during handshake ({e}); retrying");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Passive open: wait for a SYN, bind its sender as the peer and answer
    /// with SYN_ACK.
    ///
    /// A lost SYN_ACK is repaired later: the client re-sends SYN and the
    /// established connection answers it again from `send` or `recv`.
    pub async fn accept(channel: C, config: Config) -> Result<Self, ConnError> {
        let mut conn = Self::new(channel, config)?;
        let opened = conn.passive_open().await;
        conn.fail_on_io(opened)?;
        Ok(conn)
    }

    async fn passive_open(&mut self) -> Result<(), ConnError> {
        log::debug!("[gbn] listening on {}", self.local_addr);

        let peer = loop {
            let channel = self.channel("accept")?;
            match next_inbound(channel).await? {
                Inbound::Frame(frame, from) if frame.kind == FrameType::Syn => {
                    if self.cb.on_syn(from) == SynDisposition::Fresh {
                        break from;
                    }
                }
                Inbound::Frame(frame, from) => {
                    log::debug!("[gbn] ignoring {} from {from} while listening", frame.kind);
                }
                Inbound::Corrupt(from, e) => {
                    log::warn!("[gbn] discarding corrupt datagram from {from}: {e}");
                }
                Inbound::Nothing => {}
            }
        };

        self.transmit(&Frame::control(FrameType::SynAck, 0)).await?;
        self.enter("accept", ConnectionState::Established)?;
        log::info!("[gbn] accepted connection from {peer}");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Reliably deliver all of `buf` to the peer, in order.
    ///
    /// Returns once every frame is acknowledged.  A channel failure, an
    /// exhausted retry budget or a reset closes the connection and discards
    /// whatever was still queued.
    pub async fn send(&mut self, buf: &[u8]) -> Result<usize, ConnError> {
        let sent = self.send_all(buf).await;
        self.fail_on_io(sent)
    }

    async fn send_all(&mut self, buf: &[u8]) -> Result<usize, ConnError> {
        self.require_data("send")?;
        if buf.is_empty() {
            return Ok(0);
        }
        let frames = self.sender.enqueue(buf);
        log::debug!("[gbn] sending {} bytes in {frames} frame(s)", buf.len());

        loop {
            while let Some(frame) = self.sender.next_frame() {
                self.transmit(&frame).await?;
                log::debug!(
                    "[gbn] → DATA seq={} len={} window={}",
                    frame.seqnum,
                    frame.payload.len(),
                    self.sender.window()
                );
            }
            if self.sender.is_complete() {
                self.timer.cancel();
                return Ok(buf.len());
            }
            if !self.timer.is_armed() {
                if let Some(oldest) = self.sender.oldest_unacked() {
                    self.timer.arm(oldest);
                }
            }

            let event = {
                let channel = self.channel.as_ref().ok_or(ConnError::BadState {
                    op: "send",
                    state: self.cb.state(),
                })?;
                tokio::select! {
                    inbound = next_inbound(channel) => Event::Inbound(inbound),
                    expiry = self.timer.expired() => Event::Expired(expiry),
                }
            };

            match event {
                Event::Expired(expiry) => {
                    log::warn!(
                        "[gbn] timeout waiting for DATA_ACK {} (window {})",
                        expiry.oldest,
                        self.sender.window()
                    );
                    let recovery = self.sender.on_timeout();
                    self.recover("send", recovery)?;
                }
                Event::Inbound(inbound) => self.on_inbound_while_sending(inbound?).await?,
            }
        }
    }

    async fn on_inbound_while_sending(&mut self, inbound: Inbound) -> Result<(), ConnError> {
        let frame = match inbound {
            Inbound::Frame(frame, from) if self.cb.is_peer(from) => frame,
            Inbound::Frame(frame, from) => {
                if frame.kind == FrameType::Syn {
                    self.answer_syn(from).await?;
                }
                return Ok(());
            }
            Inbound::Corrupt(from, e) if self.cb.is_peer(from) => {
                log::warn!("[gbn] malformed frame where an ack was expected: {e}");
                let recovery = self.sender.on_duplicate();
                return self.recover("send", recovery);
            }
            Inbound::Corrupt(..) | Inbound::Nothing => return Ok(()),
        };

        match frame.kind {
            FrameType::DataAck => match self.sender.on_ack(frame.seqnum) {
                AckOutcome::Advanced { frames } => {
                    self.timer.cancel();
                    log::debug!(
                        "[gbn] ← DATA_ACK {} (slid {frames}, window {})",
                        frame.seqnum,
                        self.sender.window()
                    );
                }
                AckOutcome::Duplicate => {
                    log::debug!("[gbn] ← duplicate DATA_ACK {}", frame.seqnum);
                    let recovery = self.sender.on_duplicate();
                    self.recover("send", recovery)?;
                }
                AckOutcome::Stale => {
                    log::trace!("[gbn] ← stale DATA_ACK {}", frame.seqnum);
                }
            },
            FrameType::Data => {
                self.ack_data(&frame).await?;
            }
            FrameType::Syn => {
                let peer = self.peer_addr("send")?;
                self.answer_syn(peer).await?;
            }
            FrameType::Fin => {
                self.timer.cancel();
                self.enter("send", ConnectionState::FinRcvd)?;
                log::info!("[gbn] peer closed while sending");
                return Err(ConnError::PeerClosed);
            }
            FrameType::Rst => {
                log::warn!("[gbn] reset by peer while sending");
                return Err(self.abort(ConnError::Reset));
            }
            FrameType::SynAck | FrameType::FinAck => {
                log::trace!("[gbn] ignoring stale {}", frame.kind);
            }
        }
        Ok(())
    }

    fn recover(&mut self, op: &'static str, recovery: Recovery) -> Result<(), ConnError> {
        match recovery {
            Recovery::GoBack { from, frames } => {
                self.timer.cancel();
                log::warn!("[gbn] going back to seq {from} ({frames} frame(s) outstanding)");
                Ok(())
            }
            Recovery::Absorbed => Ok(()),
            Recovery::Exhausted { attempts } => {
                log::error!("[gbn] {op}: retry budget spent after {attempts} attempts");
                Err(self.abort(ConnError::AttemptsExhausted { op, attempts }))
            }
        }
    }

    /// Read in-order bytes from the peer into `buf`.
    ///
    /// Returns `Ok(0)` at end of stream, once the peer has sent FIN and every
    /// delivered byte has been read.  Bytes that do not fit stay buffered for
    /// the next call.
    ///
    /// An empty `buf` also returns `Ok(0)`, at once and without reading the
    /// channel, so end of stream can only be told apart with a non-empty
    /// buffer.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        if self.receiver.buffered() > 0 {
            return Ok(self.receiver.read(buf));
        }
        if self.cb.state() == ConnectionState::FinRcvd {
            return Ok(0);
        }
        self.require_data("recv")?;
        if buf.is_empty() {
            return Ok(0);
        }
        let received = self.recv_frame(buf).await;
        self.fail_on_io(received)
    }

    async fn recv_frame(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        loop {
            let inbound = {
                let channel = self.channel("recv")?;
                match self.config.recv_timeout {
                    Some(limit) => tokio::time::timeout(limit, next_inbound(channel))
                        .await
                        .map_err(|_| ConnError::Timeout(limit))??,
                    None => next_inbound(channel).await?,
                }
            };

            let frame = match inbound {
                Inbound::Frame(frame, from) if self.cb.is_peer(from) => frame,
                Inbound::Frame(frame, from) => {
                    if frame.kind == FrameType::Syn {
                        self.answer_syn(from).await?;
                    }
                    continue;
                }
                Inbound::Corrupt(from, e) => {
                    log::warn!("[gbn] discarding corrupt datagram from {from}: {e}");
                    continue;
                }
                Inbound::Nothing => continue,
            };

            match frame.kind {
                FrameType::Data => {
                    if self.ack_data(&frame).await? == Delivery::Accepted {
                        return Ok(self.receiver.read(buf));
                    }
                }
                FrameType::Fin => {
                    self.enter("recv", ConnectionState::FinRcvd)?;
                    log::info!("[gbn] ← FIN; end of stream");
                    return Ok(0);
                }
                FrameType::Syn => {
                    let peer = self.peer_addr("recv")?;
                    self.answer_syn(peer).await?;
                }
                FrameType::Rst => {
                    log::warn!("[gbn] reset by peer while receiving");
                    return Err(self.abort(ConnError::Reset));
                }
                FrameType::SynAck | FrameType::DataAck | FrameType::FinAck => {
                    log::trace!("[gbn] ignoring stale {}", frame.kind);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close the connection and release the channel.
    ///
    /// From `ESTABLISHED` this sends FIN and waits for FIN_ACK, retrying up to
    /// `max_attempts` times.  After the peer's FIN (`FIN_RCVD`) it answers
    /// with FIN_ACK and lingers, re-answering retransmitted FINs.  Closing an
    /// already-closed connection is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        let closed = match self.cb.state() {
            ConnectionState::Closed => {
                self.teardown();
                Ok(())
            }
            ConnectionState::Established => self.active_close().await,
            ConnectionState::FinRcvd => self.passive_close().await,
            state => {
                log::debug!("[gbn] closing from {state} without handshake");
                self.teardown();
                Ok(())
            }
        };
        self.fail_on_io(closed)
    }

    async fn active_close(&mut self) -> Result<(), ConnError> {
        self.timer.cancel();
        self.enter("close", ConnectionState::FinSent)?;

        let fin = Frame::control(FrameType::Fin, 0);
        let mut attempts = 0u32;
        loop {
            if attempts > self.config.max_attempts {
                log::error!("[gbn] no FIN_ACK after {attempts} FINs");
                return Err(self.abort(ConnError::AttemptsExhausted {
                    op: "close",
                    attempts,
                }));
            }
            self.transmit(&fin).await?;
            attempts += 1;
            log::debug!("[gbn] → FIN (attempt {attempts})");

            let deadline = Instant::now() + self.config.timeout;
            while let Some(inbound) = self.recv_until(deadline).await? {
                let (frame, from) = match inbound {
                    Inbound::Frame(frame, from) => (frame, from),
                    _ => continue,
                };
                if !self.cb.is_peer(from) {
                    if frame.kind == FrameType::Syn {
                        self.answer_syn(from).await?;
                    }
                    continue;
                }
                match frame.kind {
                    FrameType::FinAck => {
                        log::info!("[gbn] ← FIN_ACK; closed");
                        self.teardown();
                        return Ok(());
                    }
                    // Simultaneous close: acknowledge theirs, keep waiting for ours.
                    FrameType::Fin => {
                        self.transmit(&Frame::control(FrameType::FinAck, 0)).await?;
                    }
                    // Our last DATA_ACK was lost; the peer is still resending.
                    FrameType::Data => {
                        let ack = self.receiver.ack_number();
                        self.transmit(&Frame::control(FrameType::DataAck, ack)).await?;
                    }
                    FrameType::Rst => return Err(self.abort(ConnError::Reset)),
                    _ => {}
                }
            }
        }
    }

    async fn passive_close(&mut self) -> Result<(), ConnError> {
        let fin_ack = Frame::control(FrameType::FinAck, 0);
        self.transmit(&fin_ack).await?;
        log::debug!("[gbn] → FIN_ACK; lingering {:?}", self.config.linger);

        let mut deadline = Instant::now() + self.config.linger;
        while let Some(inbound) = self.recv_until(deadline).await? {
            match inbound {
                Inbound::Frame(frame, from) if self.cb.is_peer(from) => {
                    if frame.kind == FrameType::Fin {
                        log::debug!("[gbn] ← FIN again; → FIN_ACK");
                        self.transmit(&fin_ack).await?;
                        deadline = Instant::now() + self.config.linger;
                    }
                }
                Inbound::Frame(frame, from) if frame.kind == FrameType::Syn => {
                    self.answer_syn(from).await?;
                }
                _ => {}
            }
        }

        log::info!("[gbn] closed");
        self.teardown();
        Ok(())
    }

    /// Move to `CLOSED`, stop the timer and drop the channel.
    fn teardown(&mut self) {
        self.timer.cancel();
        self.cb.close();
        if self.channel.take().is_some() {
            log::debug!("[gbn] channel released");
        }
    }

    fn abort(&mut self, err: ConnError) -> ConnError {
        self.teardown();
        err
    }

    /// Channel I/O errors are fatal: tear down before passing them up.
    fn fail_on_io<T>(&mut self, result: Result<T, ConnError>) -> Result<T, ConnError> {
        match result {
            Err(err @ ConnError::Io(_)) => {
                log::error!("[gbn] {err}; closing");
                Err(self.abort(err))
            }
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.cb.state()
    }

    /// The bound remote address, once a handshake has started.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.cb.peer()
    }

    /// Current send window size.
    pub fn window(&self) -> usize {
        self.sender.window()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `true` once the channel has been dropped.
    pub fn is_released(&self) -> bool {
        self.channel.is_none()
    }

    /// Send-side counters.
    pub fn stats(&self) -> SenderStats {
        self.sender.stats()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn channel(&self, op: &'static str) -> Result<&C, ConnError> {
        self.channel.as_ref().ok_or(ConnError::BadState {
            op,
            state: self.cb.state(),
        })
    }

    fn peer_addr(&self, op: &'static str) -> Result<SocketAddr, ConnError> {
        self.cb.peer().ok_or(ConnError::BadState {
            op,
            state: self.cb.state(),
        })
    }

    /// DATA may only flow while established and the channel is held.
    fn require_data(&self, op: &'static str) -> Result<(), ConnError> {
        let state = self.cb.state();
        if state.allows_data() && self.channel.is_some() {
            Ok(())
        } else {
            Err(ConnError::BadState { op, state })
        }
    }

    fn enter(&mut self, op: &'static str, next: ConnectionState) -> Result<(), ConnError> {
        self.cb
            .transition(next)
            .map_err(|e| ConnError::BadState { op, state: e.from })
    }

    /// Wait for the next datagram until `deadline`; `None` once it passes.
    async fn recv_until(&self, deadline: Instant) -> Result<Option<Inbound>, ConnError> {
        let channel = self.channel("recv")?;
        match tokio::time::timeout_at(deadline, next_inbound(channel)).await {
            Ok(inbound) => inbound.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn transmit(&self, frame: &Frame) -> Result<(), ConnError> {
        let peer = self.peer_addr("transmit")?;
        self.transmit_to(frame, peer).await
    }

    async fn transmit_to(&self, frame: &Frame, dest: SocketAddr) -> Result<(), ConnError> {
        let bytes = frame.encode()?;
        self.channel("transmit")?.send_to(&bytes, dest).await?;
        log::trace!("[gbn] → {}({}) to {dest}", frame.kind, frame.seqnum);
        Ok(())
    }

    /// Hand a DATA frame to the receiver and acknowledge it cumulatively.
    async fn ack_data(&mut self, frame: &Frame) -> Result<Delivery, ConnError> {
        let delivery = self.receiver.on_data(frame.seqnum, &frame.payload);
        let ack = self.receiver.ack_number();
        log::debug!(
            "[gbn] ← DATA seq={} len={} {:?}; → DATA_ACK {ack}",
            frame.seqnum,
            frame.payload.len(),
            delivery
        );
        self.transmit(&Frame::control(FrameType::DataAck, ack)).await?;
        Ok(delivery)
    }

    /// Answer a SYN according to the handshake rules.
    async fn answer_syn(&mut self, from: SocketAddr) -> Result<(), ConnError> {
        match self.cb.on_syn(from) {
            SynDisposition::Duplicate => {
                log::debug!("[gbn] ← duplicate SYN; → SYN_ACK");
                self.transmit(&Frame::control(FrameType::SynAck, 0)).await
            }
            SynDisposition::Reject => {
                log::info!("[gbn] rejecting SYN from {from}");
                self.transmit_to(&Frame::control(FrameType::Rst, 0), from).await
            }
            SynDisposition::Fresh | SynDisposition::Ignore => Ok(()),
        }
    }
}
