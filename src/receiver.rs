//! Receiving endpoint: in-order reassembly and acknowledgment.
//!
//! `Receiver` is pure state-machine logic; it never touches a socket. The
//! event loop in [`run`] owns the link, the output sink and the loss gates,
//! and feeds segments in one at a time. Each surviving DATA segment yields
//! zero or more in-order payloads plus exactly one ack carrying the next
//! expected sequence number; out-of-order segments inside the receive
//! window are buffered until the gap before them closes.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::{debug, error, info};

use crate::err::Error;
use crate::link::Link;
use crate::loss::Faults;
use crate::seq::SeqSpace;
use crate::wire::{Kind, SackBlock, Segment, MAX_BLOCKS};

pub struct Receiver {
    space: SeqSpace,
    win: u8,
    chunk_size: usize,
    /// Next sequence number to deliver.
    expected: u8,
    /// Segments received inside the window but ahead of `expected`. Keys
    /// are at modular distance 1..=win-1 from `expected`, never `expected`
    /// itself.
    out_of_order: BTreeMap<u8, Vec<u8>>,
    /// One past the final (short) segment, once one has been seen.
    end_seq: Option<u8>,
}

/// What one incoming segment produced.
pub struct Delivery {
    /// Payloads now deliverable in order, oldest first.
    pub chunks: Vec<Vec<u8>>,
    /// The acknowledgment to transmit; `None` only for discarded ACKs.
    pub ack: Option<Segment>,
}

impl Receiver {
    pub fn new(n_bits: u8, win: u8, chunk_size: usize) -> Self {
        let space = SeqSpace::new(n_bits);
        assert!(win >= 1 && win as u16 <= space.modulus());

        Receiver {
            space,
            win,
            chunk_size,
            expected: 0,
            out_of_order: BTreeMap::new(),
            end_seq: None,
        }
    }

    pub fn expected(&self) -> u8 {
        self.expected
    }

    /// Number of segments waiting in the out-of-order buffer.
    pub fn buffered(&self) -> usize {
        self.out_of_order.len()
    }

    /// The stream is complete: the short final segment and everything
    /// before it has been delivered.
    pub fn finished(&self) -> bool {
        self.end_seq == Some(self.expected)
    }

    pub fn on_segment(&mut self, seg: &Segment) -> Delivery {
        if seg.kind == Kind::Ack {
            error!(num = seg.num, "protocol error: receiver got an ACK segment");
            return Delivery {
                chunks: Vec::new(),
                ack: None,
            };
        }

        let num = seg.num;

        // A short payload is the end-of-stream marker, wherever it lands
        // in the window.
        if seg.payload.len() < self.chunk_size {
            self.end_seq = Some(self.space.next(num));
        }

        let mut chunks = Vec::new();
        if num == self.expected {
            debug!(num, "in-order segment");
            chunks.push(seg.payload.clone());
            self.expected = self.space.next(self.expected);

            // Drain every contiguous run the buffer now completes.
            while let Some(payload) = self.out_of_order.remove(&self.expected) {
                debug!(num = self.expected, "delivering buffered segment");
                chunks.push(payload);
                self.expected = self.space.next(self.expected);
            }
        } else {
            let dist = self.space.distance(num, self.expected);
            if (1..self.win).contains(&dist) {
                if self.out_of_order.contains_key(&num) {
                    debug!(num, "duplicate of a buffered segment");
                } else {
                    debug!(num, expected = self.expected, "buffering out-of-order segment");
                    self.out_of_order.insert(num, seg.payload.clone());
                }
            } else {
                debug!(num, expected = self.expected, "segment outside receive window");
            }
        }

        // Ack everything strictly before `expected`; echo the sender's
        // SACK capability and describe the buffer when it is set.
        let ack = if seg.sack {
            Segment::sack_ack(self.expected, self.win, self.sack_blocks())
        } else {
            Segment::ack(self.expected, self.win)
        };

        Delivery {
            chunks,
            ack: Some(ack),
        }
    }

    /// Coalesce the out-of-order buffer into at most [`MAX_BLOCKS`] SACK
    /// blocks, ordered by modular distance from `expected` so a buffer that
    /// straddles the top of the sequence space still forms a single run.
    fn sack_blocks(&self) -> Vec<SackBlock> {
        let mut keys: Vec<u8> = self.out_of_order.keys().copied().collect();
        keys.sort_by_key(|&k| self.space.distance(k, self.expected));

        let mut blocks: Vec<SackBlock> = Vec::new();
        for &k in &keys {
            match blocks.last_mut() {
                Some(block) if self.space.add(block.left, block.len as u16) == k => {
                    block.len += 1;
                }
                _ => {
                    if blocks.len() == MAX_BLOCKS {
                        // Runs past the third do not fit in the header.
                        break;
                    }
                    blocks.push(SackBlock { left: k, len: 1 });
                }
            }
        }

        blocks
    }
}

/// Drive the receiver over the link until the final ack has been sent.
///
/// Applies the ingress gate to every filtered segment and the egress gate
/// to every ack; termination is only reached on an ack that actually left,
/// so a lost final ack keeps the receiver alive for the retransmission.
pub fn run<W: Write>(
    mut rx: Receiver,
    mut faults: Faults,
    link: &mut Link,
    out: &mut W,
) -> Result<(), Error> {
    loop {
        let Some(seg) = link.recv(None)? else { continue };

        if faults.drop_data() {
            debug!(num = seg.num, "simulated loss of incoming segment");
            continue;
        }

        let delivery = rx.on_segment(&seg);

        for chunk in &delivery.chunks {
            out.write_all(chunk)?;
        }
        if !delivery.chunks.is_empty() {
            out.flush()?;
        }

        let Some(ack) = delivery.ack else { continue };

        if faults.drop_ack() {
            debug!(num = ack.num, "simulated loss of outgoing ack");
            continue;
        }

        debug!(num = ack.num, blocks = ack.blocks.len(), "sending ack");
        link.send(&ack)?;

        if rx.finished() {
            info!("transfer complete");
            return Ok(());
        }
    }
}
