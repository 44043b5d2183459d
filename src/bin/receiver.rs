//! Receiving endpoint driver: argument intake, output file, reassembly.

use std::fs::File;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gbn::link::Link;
use gbn::loss::Faults;
use gbn::receiver::{self, Receiver};
use gbn::wire::CHUNK_SIZE;

/// Go-Back-N file receiver over raw IP.
#[derive(Parser, Debug)]
#[command(name = "receiver", about = "Reassemble a file from the protocol-222 transport")]
struct Cli {
    /// IP address to listen on.
    receiver_ip: Ipv4Addr,

    /// IP address of the sender.
    sender_ip: Ipv4Addr,

    /// Bits in the sequence number field (1-8).
    n_bits: u8,

    /// File the reassembled stream is written to (truncated on startup).
    output_file: PathBuf,

    /// Receive window size, at most 2^n_bits.
    window_size: u8,

    /// Loss probability for incoming data segments, in [0, 1).
    p_data: f64,

    /// Loss probability for outgoing acks, in [0, 1).
    p_ack: f64,

    /// Network interface to bind the socket to.
    #[arg(long)]
    interface: Option<String>,

    /// Seed for the loss simulation RNG.
    #[arg(long, default_value_t = 0x7E57)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    if !(1..=8).contains(&cli.n_bits) {
        bail!("n_bits must be between 1 and 8");
    }
    if cli.window_size == 0 || cli.window_size as u16 > 1 << cli.n_bits {
        bail!("window size must be between 1 and 2^n_bits");
    }
    for (p, name) in [(cli.p_data, "p_data"), (cli.p_ack, "p_ack")] {
        if !(0.0..1.0).contains(&p) {
            bail!("{name} must lie in [0, 1)");
        }
    }

    let mut out = File::create(&cli.output_file)
        .with_context(|| format!("creating {}", cli.output_file.display()))?;

    info!(
        window = cli.window_size,
        p_data = cli.p_data,
        p_ack = cli.p_ack,
        seed = cli.seed,
        "waiting for segments from {}",
        cli.sender_ip
    );

    let mut link = Link::open(cli.receiver_ip, cli.sender_ip, cli.interface.as_deref())?;
    let rx = Receiver::new(cli.n_bits, cli.window_size, CHUNK_SIZE);
    let faults = Faults::new(cli.p_data, cli.p_ack, cli.seed);
    receiver::run(rx, faults, &mut link, &mut out)?;

    Ok(())
}
