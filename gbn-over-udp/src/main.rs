//! Entry point for `gbn-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** mode (accept one
//! connection, write the received stream to a file or stdout) or **client**
//! mode (send a file or stdin).  All protocol work is delegated to the
//! library; `main.rs` owns only process setup (logging, argument parsing,
//! file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use gbn_over_udp::{Config, Connection, Simulator, SimulatorConfig, Socket};

/// Reliable file transfer with Go-Back-N over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one connection and write the received stream out.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// File to write; stdout if omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Connect to a server and send a file.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// File to send; stdin if omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// Protocol and fault-injection knobs shared by both modes.
#[derive(Args)]
struct Tuning {
    /// Probability of dropping each outbound datagram.
    #[arg(long, global = true, default_value_t = 0.0)]
    loss: f64,
    /// Probability of flipping one bit in each outbound datagram.
    #[arg(long, global = true, default_value_t = 0.0)]
    corrupt: f64,
    /// Seed for the fault injector.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Retransmission timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,
    /// Retries per step before giving up.
    #[arg(long, global = true, default_value_t = gbn_over_udp::config::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    /// Largest send window.
    #[arg(long, global = true, default_value_t = gbn_over_udp::config::DEFAULT_MAX_WINDOW)]
    window: usize,
    /// Largest payload per DATA frame.
    #[arg(long, global = true, default_value_t = gbn_over_udp::frame::MAX_PAYLOAD)]
    max_payload: usize,
}

impl Tuning {
    fn config(&self) -> Config {
        Config::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_attempts(self.max_attempts)
            .with_window(1, self.window)
            .with_max_payload(self.max_payload)
    }

    fn simulator(&self) -> SimulatorConfig {
        SimulatorConfig {
            loss_rate: self.loss,
            corrupt_rate: self.corrupt,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config();
    config.validate().context("invalid protocol parameters")?;

    match cli.mode {
        Mode::Server { bind, output } => {
            log::info!("Starting server on {bind}");
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            let channel = Simulator::new(socket, cli.tuning.simulator())?;
            let conn = Connection::accept(channel, config)
                .await
                .context("accepting connection")?;

            let received = match output {
                Some(path) => {
                    let file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    serve(conn, file).await?
                }
                None => serve(conn, tokio::io::stdout()).await?,
            };
            log::info!("Received {received} bytes");
        }
        Mode::Client { server, input } => {
            log::info!("Starting client, connecting to {server}");
            let data = match input {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut data = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut data)
                        .await
                        .context("reading stdin")?;
                    data
                }
            };

            let socket = Socket::bind_for(server).await.context("binding client socket")?;
            let channel = Simulator::new(socket, cli.tuning.simulator())?;
            let mut conn = Connection::connect(channel, server, config)
                .await
                .with_context(|| format!("connecting to {server}"))?;
            let sent = conn.send(&data).await.context("sending")?;
            conn.close().await.context("closing")?;
            log::info!("Sent {sent} bytes");
        }
    }
    Ok(())
}

/// Copy the connection's byte stream into `out` until the peer closes.
async fn serve<W>(mut conn: Connection<Simulator>, mut out: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8 * 1024];
    let mut total = 0u64;
    loop {
        let n = conn.recv(&mut buf).await.context("receiving")?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await.context("writing output")?;
        total += n as u64;
    }
    out.flush().await.context("flushing output")?;
    conn.close().await.context("closing")?;
    Ok(total)
}
