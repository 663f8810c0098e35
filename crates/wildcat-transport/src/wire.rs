//! # Wildcat Wire Format
//!
//! Two frame kinds, both closed by the same trailing checksum.
//!
//! ## Data frame
//!
//! ```text
//! | seq (2B, BE) | payload (0..N bytes) | checksum (2B, BE) |
//! ```
//!
//! ## Ack frame
//!
//! ```text
//! | base (2B, BE) | bitmap (ceil(window/8) bytes) | checksum (2B, BE) |
//! ```
//!
//! The checksum is the low 16 bits of CRC-32 (ISO-HDLC polynomial — the
//! zlib `crc32`) over every byte before it. `base` is the receiver's next
//! expected sequence number; bitmap bit `i` — counted as a plain offset from
//! `base`, LSB-first within each byte — marks `(base + i) mod 2^16` as
//! received and buffered. Unused high bits of the last bitmap byte are zero.
//!
//! Decoding is total on any input of at least [`MIN_FRAME_LEN`] bytes and
//! never verifies the checksum; validity is a separate, shared check
//! ([`frame_is_valid`]) that callers gate on before trusting a frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Bytes of the leading big-endian sequence/base field.
pub const SEQ_LEN: usize = 2;

/// Bytes of the trailing big-endian checksum field.
pub const CHECKSUM_LEN: usize = 2;

/// Smallest parseable frame: the fixed fields around an empty body.
pub const MIN_FRAME_LEN: usize = SEQ_LEN + CHECKSUM_LEN;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

// ─── Checksum ────────────────────────────────────────────────────────────────

/// Low 16 bits of CRC-32 over the covered bytes.
pub fn frame_checksum(covered: &[u8]) -> u16 {
    (CRC32.checksum(covered) & 0xFFFF) as u16
}

/// Validity check shared by data and ack frames: recompute the checksum over
/// everything but the trailing two bytes and compare. Frames shorter than
/// the fixed fields are invalid.
pub fn frame_is_valid(frame: &[u8]) -> bool {
    if frame.len() < MIN_FRAME_LEN {
        return false;
    }
    let (covered, stored) = frame.split_at(frame.len() - CHECKSUM_LEN);
    frame_checksum(covered) == u16::from_be_bytes([stored[0], stored[1]])
}

/// Ack bitmap length in bytes for a given window size.
pub fn ack_bitmap_len(window_size: u16) -> usize {
    (window_size as usize + 7) / 8
}

/// Set offset bit `i` in an ack bitmap under construction.
pub fn set_bitmap_bit(bitmap: &mut [u8], i: u16) {
    bitmap[(i / 8) as usize] |= 1 << (i % 8);
}

// ─── Data Frame ──────────────────────────────────────────────────────────────

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// 16-bit wrapping sequence number.
    pub seq: u16,
    /// Application payload. Zero-length is legal.
    pub payload: Bytes,
}

impl DataPacket {
    pub fn new(seq: u16, payload: Bytes) -> Self {
        DataPacket { seq, payload }
    }

    /// Serialize the frame, computing the trailing checksum.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SEQ_LEN + self.payload.len() + CHECKSUM_LEN);
        buf.put_u16(self.seq);
        buf.extend_from_slice(&self.payload);
        let ck = frame_checksum(&buf);
        buf.put_u16(ck);
        buf
    }

    /// Parse a frame. Returns `None` only when the input is shorter than the
    /// fixed fields; the checksum is NOT verified here.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < MIN_FRAME_LEN {
            return None;
        }
        let mut buf = frame;
        let seq = buf.get_u16();
        let payload = Bytes::copy_from_slice(&buf[..buf.len() - CHECKSUM_LEN]);
        Some(DataPacket { seq, payload })
    }
}

// ─── Ack Frame ───────────────────────────────────────────────────────────────

/// A decoded acknowledgment frame: cumulative base + selective bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    /// Next sequence number the receiver expects — everything before this is
    /// delivered or permanently skipped.
    pub base: u16,
    /// Selective-receipt bitmap, one bit per window offset from `base`.
    pub bitmap: Bytes,
}

impl AckPacket {
    pub fn new(base: u16, bitmap: Bytes) -> Self {
        AckPacket { base, bitmap }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SEQ_LEN + self.bitmap.len() + CHECKSUM_LEN);
        buf.put_u16(self.base);
        buf.extend_from_slice(&self.bitmap);
        let ck = frame_checksum(&buf);
        buf.put_u16(ck);
        buf
    }

    /// Parse a frame. Same contract as [`DataPacket::decode`]: total on any
    /// input of at least [`MIN_FRAME_LEN`] bytes, checksum not verified.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < MIN_FRAME_LEN {
            return None;
        }
        let mut buf = frame;
        let base = buf.get_u16();
        let bitmap = Bytes::copy_from_slice(&buf[..buf.len() - CHECKSUM_LEN]);
        Some(AckPacket { base, bitmap })
    }

    /// Whether window offset `i` from `base` is marked received. Offsets past
    /// the end of the bitmap read as unset.
    pub fn bit(&self, i: u16) -> bool {
        match self.bitmap.get((i / 8) as usize) {
            Some(b) => (b >> (i % 8)) & 1 == 1,
            None => false,
        }
    }

    /// Iterate the set offsets within `0..window_size`.
    pub fn set_offsets(&self, window_size: u16) -> impl Iterator<Item = u16> + '_ {
        (0..window_size).filter(|&i| self.bit(i))
    }
}
