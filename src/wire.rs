//! Wire format of the transport header.
//!
//! The header rides directly on an IPv4 datagram with protocol number 222
//! and is 6 to 15 bytes long depending on how many SACK blocks it carries:
//!
//! ```text
//!  0                   1                   2
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |T|   options   |        payload length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     hlen      |      num      |      win      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     blen      |    left_1     |   length_1    |  hlen >= 9
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     pad_2     |    left_2     |   length_2    |  hlen >= 12
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     pad_3     |    left_3     |   length_3    |  hlen == 15
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `T` is 0 for DATA and 1 for ACK. Option bit 0 advertises SACK support;
//! the remaining bits are reserved as zero. `num` is the segment's sequence
//! number on DATA and the next expected sequence number on ACK. Fields past
//! the advertised `hlen` are absent, not zero; a decoder must never read
//! them. The only valid `hlen` values are 6, 9, 12 and 15.

use crate::err::Error;

/// IP protocol number the transport is bound to.
pub const PROTOCOL: u8 = 222;

/// Payload bytes per non-final DATA segment. A DATA payload shorter than
/// this marks the end of the stream.
pub const CHUNK_SIZE: usize = 64;

/// Header length without SACK blocks.
pub const BASE_HLEN: usize = 6;

/// Upper bound on SACK blocks per ack; further runs are dropped.
pub const MAX_BLOCKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Data,
    Ack,
}

/// A contiguous run of received out-of-order sequence numbers, as carried
/// in an ack. `len` counts sequence numbers and may wrap the run past the
/// top of the sequence space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub left: u8,
    pub len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: Kind,
    /// Option bit 0: the peer understands SACK blocks.
    pub sack: bool,
    pub num: u8,
    pub win: u8,
    pub blocks: Vec<SackBlock>,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn data(num: u8, win: u8, sack: bool, payload: Vec<u8>) -> Self {
        Segment {
            kind: Kind::Data,
            sack,
            num,
            win,
            blocks: Vec::new(),
            payload,
        }
    }

    pub fn ack(num: u8, win: u8) -> Self {
        Segment {
            kind: Kind::Ack,
            sack: false,
            num,
            win,
            blocks: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn sack_ack(num: u8, win: u8, blocks: Vec<SackBlock>) -> Self {
        assert!(blocks.len() <= MAX_BLOCKS);

        Segment {
            kind: Kind::Ack,
            sack: true,
            num,
            win,
            blocks,
            payload: Vec::new(),
        }
    }

    fn hlen(&self) -> u8 {
        (BASE_HLEN + 3 * self.blocks.len()) as u8
    }

    pub fn encode(&self) -> Vec<u8> {
        let hlen = self.hlen() as usize;
        let mut buf = Vec::with_capacity(hlen + self.payload.len());

        let kind_bit = match self.kind {
            Kind::Data => 0u8,
            Kind::Ack => 1u8 << 7,
        };
        buf.push(kind_bit | self.sack as u8);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.push(hlen as u8);
        buf.push(self.num);
        buf.push(self.win);

        if !self.blocks.is_empty() {
            buf.push(self.blocks.len() as u8);
            for (i, block) in self.blocks.iter().enumerate() {
                if i > 0 {
                    // pad_2 / pad_3
                    buf.push(0);
                }
                buf.push(block.left);
                buf.push(block.len);
            }
        }

        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < BASE_HLEN {
            return Err(Error::TruncatedHeader(buf.len()));
        }

        let kind = if buf[0] & 0x80 != 0 {
            Kind::Ack
        } else {
            Kind::Data
        };
        let sack = buf[0] & 0x01 != 0;
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let hlen = buf[3];
        let num = buf[4];
        let win = buf[5];

        let max_blocks = match hlen {
            6 => 0,
            9 => 1,
            12 => 2,
            15 => 3,
            _ => return Err(Error::BadHeaderLen(hlen)),
        };

        if buf.len() < hlen as usize {
            return Err(Error::TruncatedHeader(buf.len()));
        }

        let mut blocks = Vec::new();
        if max_blocks > 0 {
            // blen may undersell what hlen has room for; never oversell it.
            let count = usize::min(buf[6] as usize, max_blocks);
            for i in 0..count {
                let (left_at, len_at) = match i {
                    0 => (7, 8),
                    1 => (10, 11),
                    _ => (13, 14),
                };
                blocks.push(SackBlock {
                    left: buf[left_at],
                    len: buf[len_at],
                });
            }
        }

        let body = &buf[hlen as usize..];
        if body.len() < len {
            return Err(Error::TruncatedPayload {
                want: len,
                have: body.len(),
            });
        }

        Ok(Segment {
            kind,
            sack,
            num,
            win,
            blocks,
            payload: body[..len].to_vec(),
        })
    }
}
