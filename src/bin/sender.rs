//! Sending endpoint driver: argument intake, file chunking, transfer.

use std::fs::File;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gbn::link::Link;
use gbn::sender::{self, chunk_payloads, Mode, Sender};
use gbn::wire::CHUNK_SIZE;

/// Go-Back-N file sender over raw IP.
#[derive(Parser, Debug)]
#[command(name = "sender", about = "Transmit a file over the protocol-222 transport")]
struct Cli {
    /// IP address to send from.
    sender_ip: Ipv4Addr,

    /// IP address of the receiver.
    receiver_ip: Ipv4Addr,

    /// Bits in the sequence number field (1-8).
    n_bits: u8,

    /// File to transmit.
    input_file: PathBuf,

    /// Send window size, below 2^n_bits.
    window_size: u8,

    /// Use Selective Repeat fast retransmit (0/1).
    q_sr: u8,

    /// Use selective acknowledgments (0/1).
    q_sack: u8,

    /// Use congestion control (reserved, must be 0).
    q_cc: u8,

    /// Network interface to bind the socket to.
    #[arg(long)]
    interface: Option<String>,
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
    if cli.window_size == 0 || cli.window_size as u16 >= 1 << cli.n_bits {
        bail!("window size must be between 1 and 2^n_bits - 1");
    }
    for (flag, name) in [(cli.q_sr, "Q_SR"), (cli.q_sack, "Q_SACK"), (cli.q_cc, "Q_CC")] {
        if flag > 1 {
            bail!("{name} must be 0 or 1");
        }
    }
    if cli.q_sr == 1 && cli.q_sack == 1 {
        bail!("Selective Repeat and selective acknowledgments are mutually exclusive");
    }
    if cli.q_cc == 1 {
        bail!("congestion control is unsupported");
    }

    let mode = if cli.q_sr == 1 {
        Mode::SelectiveRepeat
    } else if cli.q_sack == 1 {
        Mode::Sack
    } else {
        Mode::GoBackN
    };

    let input = File::open(&cli.input_file)
        .with_context(|| format!("opening {}", cli.input_file.display()))?;
    let payloads = chunk_payloads(input)?;

    let total: usize = payloads.iter().map(Vec::len).sum();
    if total > 0 && total % CHUNK_SIZE == 0 {
        // Only a short final segment marks the end of the stream.
        warn!(
            bytes = total,
            "input length is a multiple of {CHUNK_SIZE}; the receiver cannot detect the end of this transfer"
        );
    }

    info!(
        bytes = total,
        segments = payloads.len(),
        ?mode,
        "starting transfer to {}",
        cli.receiver_ip
    );

    let mut link = Link::open(cli.sender_ip, cli.receiver_ip, cli.interface.as_deref())?;
    let tx = Sender::new(cli.n_bits, cli.window_size, mode, payloads);
    sender::run(tx, &mut link)?;

    Ok(())
}
