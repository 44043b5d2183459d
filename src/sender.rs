//! Sending endpoint: sliding-window transmission and retransmission.
//!
//! `Sender` is pure state-machine logic; the event loop in [`run`] owns the
//! link and the single retransmission timer. Chunks move from the payload
//! queue into the in-flight buffer as window space opens, leave it on
//! cumulative acks, and are resent by one of three disjoint paths: the
//! timer (whole buffer), the third duplicate ack (one segment, Selective
//! Repeat mode), or the peer's SACK blocks (the gaps below the highest
//! SACKed segment).

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::err::Error;
use crate::link::Link;
use crate::seq::SeqSpace;
use crate::wire::{Kind, SackBlock, Segment, CHUNK_SIZE};

/// Quiet time before the in-flight buffer is retransmitted wholesale.
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Which retransmission refinement runs on top of the timer. The modes are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Cumulative acks and the timer only.
    GoBackN,
    /// Resend the segment the peer keeps asking for on the third identical
    /// cumulative ack.
    SelectiveRepeat,
    /// Resend the gaps the peer's SACK blocks reveal.
    Sack,
}

pub struct Sender {
    space: SeqSpace,
    win: u8,
    /// Window last advertised by the receiver; starts at our own.
    peer_win: u8,
    mode: Mode,
    /// Negotiated SACK state; each ack can switch it.
    sack_active: bool,
    queue: VecDeque<Vec<u8>>,
    /// Sent-but-unacknowledged segments in transmission order. Keys are
    /// exactly the modular range `[unack, current)`.
    buffer: VecDeque<(u8, Vec<u8>)>,
    /// Oldest unacknowledged sequence number (left window edge).
    unack: u8,
    /// Next sequence number to assign (right window edge).
    current: u8,
    /// Repeated-ack tracker for fast retransmit.
    dup_acks: (u32, Option<u8>),
    timeouts: u64,
}

impl Sender {
    pub fn new(n_bits: u8, win: u8, mode: Mode, payloads: VecDeque<Vec<u8>>) -> Self {
        let space = SeqSpace::new(n_bits);
        assert!(win >= 1 && (win as u16) < space.modulus());

        Sender {
            space,
            win,
            peer_win: win,
            mode,
            sack_active: mode == Mode::Sack,
            queue: payloads,
            buffer: VecDeque::new(),
            unack: 0,
            current: 0,
            dup_acks: (0, None),
            timeouts: 0,
        }
    }

    pub fn unack(&self) -> u8 {
        self.unack
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn in_flight(&self) -> usize {
        self.buffer.len()
    }

    /// Timer-driven retransmission rounds so far.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn finished(&self) -> bool {
        self.queue.is_empty() && self.buffer.is_empty() && self.unack == self.current
    }

    fn sack_flag(&self) -> bool {
        self.mode == Mode::Sack && self.sack_active
    }

    fn data(&self, num: u8, payload: Vec<u8>) -> Segment {
        Segment::data(num, self.win, self.sack_flag(), payload)
    }

    /// Move queued chunks into the window while it has room. Returns the
    /// freshly assigned DATA segments to transmit.
    pub fn fill_window(&mut self) -> Vec<Segment> {
        let limit = self.win.min(self.peer_win) as usize;
        let mut out = Vec::new();

        while self.buffer.len() < limit {
            let Some(payload) = self.queue.pop_front() else { break };

            debug!(num = self.current, len = payload.len(), "sending segment");
            self.buffer.push_back((self.current, payload.clone()));
            out.push(self.data(self.current, payload));
            self.current = self.space.next(self.current);
        }

        out
    }

    /// Process one acknowledgment. Returns the retransmissions it
    /// triggered, in original transmission order.
    pub fn on_ack(&mut self, seg: &Segment) -> Vec<Segment> {
        if seg.kind == Kind::Data {
            error!(num = seg.num, "protocol error: sender got a DATA segment");
            return Vec::new();
        }

        self.peer_win = seg.win;
        if self.mode == Mode::Sack {
            self.sack_active = seg.sack;
        }

        let ack = seg.num;
        debug!(ack, win = seg.win, "ack received");

        let retransmit = match self.mode {
            Mode::SelectiveRepeat => self.fast_retransmit(ack).into_iter().collect(),
            Mode::Sack if self.sack_active && !seg.blocks.is_empty() => {
                self.selective_retransmit(&seg.blocks)
            }
            _ => Vec::new(),
        };

        self.advance(ack);
        retransmit
    }

    /// The timer fired: resend the whole in-flight buffer and reset the
    /// duplicate-ack tracker.
    pub fn on_timeout(&mut self) -> Vec<Segment> {
        self.timeouts += 1;
        self.dup_acks = (0, None);
        debug!(
            unack = self.unack,
            in_flight = self.buffer.len(),
            "retransmission timeout"
        );

        self.buffer
            .iter()
            .map(|(num, payload)| self.data(*num, payload.clone()))
            .collect()
    }

    /// Count repeated cumulative acks; the third identical one means the
    /// segment at `ack` was lost while later ones got through.
    fn fast_retransmit(&mut self, ack: u8) -> Option<Segment> {
        self.dup_acks = match self.dup_acks {
            (count, Some(prev)) if prev == ack => (count + 1, Some(prev)),
            _ => (0, Some(ack)),
        };

        if self.dup_acks.0 < 2 {
            return None;
        }
        self.dup_acks = (0, None);

        let payload = self
            .buffer
            .iter()
            .find(|(num, _)| *num == ack)
            .map(|(_, payload)| payload.clone());
        let Some(payload) = payload else {
            debug!(ack, "third duplicate ack but nothing in flight to resend");
            return None;
        };

        debug!(ack, "fast retransmit");
        Some(self.data(ack, payload))
    }

    /// Expand the SACK blocks into the individually acknowledged sequence
    /// numbers and resend every in-flight segment below the highest of
    /// them that the set misses. Segments above it are left to the
    /// cumulative-ack and timer paths.
    fn selective_retransmit(&mut self, blocks: &[SackBlock]) -> Vec<Segment> {
        let mut acked = Vec::new();
        for block in blocks {
            for i in 0..block.len {
                acked.push(self.space.add(block.left, i as u16));
            }
        }
        let Some(&highest) = acked.last() else {
            return Vec::new();
        };

        let Some(final_idx) = self.buffer.iter().position(|(num, _)| *num == highest) else {
            debug!(highest, "highest SACKed segment no longer in flight");
            return Vec::new();
        };

        let gaps: Vec<(u8, Vec<u8>)> = self
            .buffer
            .iter()
            .take(final_idx)
            .filter(|(num, _)| !acked.contains(num))
            .map(|(num, payload)| (*num, payload.clone()))
            .collect();

        gaps.into_iter()
            .map(|(num, payload)| {
                debug!(num, "selective retransmit");
                self.data(num, payload)
            })
            .collect()
    }

    /// Cumulative advance: `ack` names the next segment the peer expects,
    /// so everything in `[unack, ack)` leaves the buffer. An ack outside
    /// `[unack, current]` matches no outstanding segment and is dropped.
    fn advance(&mut self, ack: u8) {
        let extent = self.space.distance(self.current, self.unack);
        if self.space.distance(ack, self.unack) > extent {
            debug!(ack, "ack outside the in-flight window");
            return;
        }

        while let Some((num, _)) = self.buffer.front() {
            if *num == ack {
                break;
            }
            self.buffer.pop_front();
        }
        self.unack = ack;
    }
}

/// Split the input into transmission payloads: every chunk carries exactly
/// [`CHUNK_SIZE`] bytes except a shorter final one, which doubles as the
/// end-of-stream marker on the wire.
pub fn chunk_payloads<R: Read>(mut input: R) -> std::io::Result<VecDeque<Vec<u8>>> {
    let mut chunks = VecDeque::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut filled = 0;

    loop {
        let n = match input.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    chunks.push_back(buf[..filled].to_vec());
                }
                return Ok(chunks);
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        filled += n;
        if filled == CHUNK_SIZE {
            chunks.push_back(buf.to_vec());
            filled = 0;
        }
    }
}

/// Drive the sender over the link until every chunk is acknowledged.
///
/// The timer deadline re-arms on every pass through the send state; a wait
/// that elapses without a filtered segment retransmits the whole buffer.
pub fn run(mut tx: Sender, link: &mut Link) -> Result<(), Error> {
    loop {
        for seg in tx.fill_window() {
            link.send(&seg)?;
        }

        if tx.finished() {
            info!(timeouts = tx.timeouts(), "all segments acknowledged");
            return Ok(());
        }

        match link.recv(Some(RETRANSMIT_TIMEOUT))? {
            Some(seg) => {
                for seg in tx.on_ack(&seg) {
                    link.send(&seg)?;
                }
            }
            None => {
                for seg in tx.on_timeout() {
                    link.send(&seg)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(n: usize) -> VecDeque<Vec<u8>> {
        (0..n).map(|i| vec![i as u8; CHUNK_SIZE]).collect()
    }

    fn keys(tx: &Sender) -> Vec<u8> {
        tx.buffer.iter().map(|(num, _)| *num).collect()
    }

    fn sack_ack(num: u8, win: u8, blocks: &[(u8, u8)]) -> Segment {
        Segment::sack_ack(
            num,
            win,
            blocks
                .iter()
                .map(|&(left, len)| SackBlock { left, len })
                .collect(),
        )
    }

    #[test]
    fn window_fill_respects_both_window_limits() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(6));

        let sent = tx.fill_window();
        assert_eq!(sent.len(), 4);
        assert_eq!(keys(&tx), vec![0, 1, 2, 3]);
        assert_eq!(tx.current(), 4);

        // The peer shrank its window to 2: no room until more acks come.
        let rtx = tx.on_ack(&Segment::ack(2, 2));
        assert!(rtx.is_empty());
        assert_eq!(keys(&tx), vec![2, 3]);
        assert!(tx.fill_window().is_empty());

        let _ = tx.on_ack(&Segment::ack(4, 4));
        let sent = tx.fill_window();
        assert_eq!(sent.len(), 2);
        assert_eq!(keys(&tx), vec![4, 5]);
    }

    #[test]
    fn data_segments_are_discarded() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(2));
        tx.fill_window();

        let rtx = tx.on_ack(&Segment::data(0, 4, false, vec![1]));
        assert!(rtx.is_empty());
        assert_eq!(tx.unack(), 0);
        assert_eq!(tx.in_flight(), 2);
    }

    #[test]
    fn cumulative_ack_evicts_the_acked_prefix() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(4));
        tx.fill_window();

        tx.on_ack(&Segment::ack(3, 4));
        assert_eq!(tx.unack(), 3);
        assert_eq!(keys(&tx), vec![3]);
    }

    #[test]
    fn repeated_ack_is_idempotent() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(4));
        tx.fill_window();

        tx.on_ack(&Segment::ack(2, 4));
        let (unack, current, in_flight) = (tx.unack(), tx.current(), tx.in_flight());
        tx.on_ack(&Segment::ack(2, 4));
        assert_eq!((tx.unack(), tx.current(), tx.in_flight()), (unack, current, in_flight));
    }

    #[test]
    fn ack_outside_the_window_is_ignored() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(4));
        tx.fill_window();
        tx.on_ack(&Segment::ack(2, 4));

        // 30 names nothing in [2, 4].
        tx.on_ack(&Segment::ack(30, 4));
        assert_eq!(tx.unack(), 2);
        assert_eq!(keys(&tx), vec![2, 3]);
    }

    #[test]
    fn buffer_keys_are_always_the_unack_current_range() {
        let mut tx = Sender::new(3, 4, Mode::GoBackN, chunks(10));
        let space = SeqSpace::new(3);

        for ack in [2u8, 4, 7, 1] {
            tx.fill_window();
            tx.on_ack(&Segment::ack(ack, 4));

            let expect: Vec<u8> = (0..space.distance(tx.current(), tx.unack()))
                .map(|i| space.add(tx.unack(), i as u16))
                .collect();
            assert_eq!(keys(&tx), expect);
        }
    }

    #[test]
    fn timeout_resends_the_whole_buffer_in_order() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(3));
        tx.fill_window();

        let rtx = tx.on_timeout();
        assert_eq!(rtx.iter().map(|s| s.num).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(rtx.iter().all(|s| s.kind == Kind::Data));
        assert_eq!(tx.in_flight(), 3, "timeout keeps segments in flight");
        assert_eq!(tx.timeouts(), 1);
    }

    #[test]
    fn third_duplicate_ack_fast_retransmits_once() {
        let mut tx = Sender::new(5, 4, Mode::SelectiveRepeat, chunks(4));
        tx.fill_window();

        // Segment 1 was lost; 2 and 3 each draw another ack for 1.
        assert!(tx.on_ack(&Segment::ack(1, 4)).is_empty());
        assert!(tx.on_ack(&Segment::ack(1, 4)).is_empty());

        let rtx = tx.on_ack(&Segment::ack(1, 4));
        assert_eq!(rtx.len(), 1);
        assert_eq!(rtx[0].num, 1);
        assert_eq!(rtx[0].kind, Kind::Data);
        assert!(!rtx[0].sack);

        // The counter reset: the next duplicate starts a fresh count.
        assert!(tx.on_ack(&Segment::ack(1, 4)).is_empty());
    }

    #[test]
    fn duplicate_count_resets_when_the_ack_moves() {
        let mut tx = Sender::new(5, 4, Mode::SelectiveRepeat, chunks(4));
        tx.fill_window();

        tx.on_ack(&Segment::ack(1, 4));
        tx.on_ack(&Segment::ack(1, 4));
        assert!(tx.on_ack(&Segment::ack(2, 4)).is_empty());
        assert!(tx.on_ack(&Segment::ack(2, 4)).is_empty());

        let rtx = tx.on_ack(&Segment::ack(2, 4));
        assert_eq!(rtx.len(), 1);
        assert_eq!(rtx[0].num, 2);
    }

    #[test]
    fn fast_retransmit_skips_a_segment_no_longer_in_flight() {
        let mut tx = Sender::new(5, 4, Mode::SelectiveRepeat, chunks(1));
        tx.fill_window();

        // Everything acked; three stray duplicates must not panic.
        for _ in 0..3 {
            assert!(tx.on_ack(&Segment::ack(1, 4)).is_empty());
        }
        assert!(tx.finished());
    }

    #[test]
    fn timeout_resets_the_duplicate_counter() {
        let mut tx = Sender::new(5, 4, Mode::SelectiveRepeat, chunks(4));
        tx.fill_window();

        tx.on_ack(&Segment::ack(1, 4));
        tx.on_ack(&Segment::ack(1, 4));
        tx.on_timeout();

        // Two more duplicates only reach count 1 after the reset.
        assert!(tx.on_ack(&Segment::ack(1, 4)).is_empty());
        assert!(tx.on_ack(&Segment::ack(1, 4)).is_empty());
    }

    #[test]
    fn sack_blocks_trigger_exactly_the_gap_retransmits() {
        let mut tx = Sender::new(5, 10, Mode::Sack, chunks(10));
        let sent = tx.fill_window();
        assert!(sent.iter().all(|s| s.sack), "SACK mode flags its data");

        // Acks for 0 and 1 arrived; 2, 5 and 7 were lost on the wire.
        tx.on_ack(&sack_ack(2, 10, &[]));
        let rtx = tx.on_ack(&sack_ack(2, 10, &[(3, 2), (6, 1), (8, 2)]));

        assert_eq!(rtx.iter().map(|s| s.num).collect::<Vec<_>>(), vec![2, 5, 7]);
        assert!(rtx.iter().all(|s| s.sack));
    }

    #[test]
    fn sack_expansion_wraps_the_sequence_space() {
        let mut tx = Sender::new(3, 4, Mode::Sack, chunks(10));
        tx.fill_window();
        tx.on_ack(&sack_ack(4, 4, &[]));
        tx.fill_window();
        tx.on_ack(&sack_ack(6, 4, &[]));
        tx.fill_window();
        assert_eq!(keys(&tx), vec![6, 7, 0, 1]);

        // Block (7, 3) covers 7, 0 and 1, leaving 6 as the gap.
        let rtx = tx.on_ack(&sack_ack(6, 4, &[(7, 3)]));
        assert_eq!(rtx.iter().map(|s| s.num).collect::<Vec<_>>(), vec![6]);
    }

    #[test]
    fn segments_above_the_highest_sacked_one_are_left_alone() {
        let mut tx = Sender::new(5, 10, Mode::Sack, chunks(10));
        tx.fill_window();

        // Only 3 got through out of order: the gaps below it are 0..=2,
        // while 4..=9 stay with the cumulative/timer path.
        let rtx = tx.on_ack(&sack_ack(0, 10, &[(3, 1)]));
        assert_eq!(rtx.iter().map(|s| s.num).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn peer_opting_out_of_sack_downgrades_the_sender() {
        let mut tx = Sender::new(5, 4, Mode::Sack, chunks(6));
        tx.fill_window();

        // A plain ack means the receiver does not speak SACK.
        tx.on_ack(&Segment::ack(4, 4));
        let sent = tx.fill_window();
        assert!(sent.iter().all(|s| !s.sack));
    }

    #[test]
    fn finishes_when_queue_drains_and_window_empties() {
        let mut tx = Sender::new(5, 4, Mode::GoBackN, chunks(2));
        assert!(!tx.finished());

        tx.fill_window();
        assert!(!tx.finished());

        tx.on_ack(&Segment::ack(2, 4));
        assert!(tx.finished());
    }

    #[test]
    fn stop_and_wait_degenerate_case() {
        let mut tx = Sender::new(1, 1, Mode::GoBackN, chunks(3));

        for turn in 0..3u8 {
            let sent = tx.fill_window();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].num, turn % 2);
            tx.on_ack(&Segment::ack((turn + 1) % 2, 1));
        }
        assert!(tx.finished());
    }

    #[test]
    fn chunking_splits_at_the_chunk_size() {
        let input = vec![7u8; 130];
        let chunks = chunk_payloads(&input[..]).unwrap();
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![64, 64, 2]
        );
    }

    #[test]
    fn chunking_exact_multiple_has_no_short_tail() {
        let input = vec![7u8; 128];
        let chunks = chunk_payloads(&input[..]).unwrap();
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![64, 64]
        );
    }

    #[test]
    fn chunking_empty_input_yields_nothing() {
        assert!(chunk_payloads(std::io::empty()).unwrap().is_empty());
    }
}
