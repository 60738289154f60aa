//! Wire-format definitions for Go-Back-N frames.
//!
//! Every datagram exchanged between peers is a [`Frame`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (type, sequence number, checksum,
//!   payload).
//! - Serialising a [`Frame`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Frame`], returning a
//!   [`FrameError`] value (never panicking) for truncated or corrupted input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |    Seqnum     |        Checksum (BE)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Payload (0..=MAX_PAYLOAD) ...                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload length is implied by the datagram size.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 1024;

const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_CHECKSUM: usize = 2;

/// Frame type carried in byte 0.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Opens a connection.
    Syn = 0,
    /// Acknowledges a SYN.
    SynAck = 1,
    /// Carries application payload.
    Data = 2,
    /// Cumulative acknowledgement of DATA frames.
    DataAck = 3,
    /// Ends a connection.
    Fin = 4,
    /// Acknowledges a FIN.
    FinAck = 5,
    /// Rejects a connection attempt or aborts a connection.
    Rst = 6,
}

impl FrameType {
    /// All frame types, in wire-value order.
    pub const ALL: [FrameType; 7] = [
        FrameType::Syn,
        FrameType::SynAck,
        FrameType::Data,
        FrameType::DataAck,
        FrameType::Fin,
        FrameType::FinAck,
        FrameType::Rst,
    ];

    /// Index into per-type tables (equal to the wire value).
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(FrameError::UnknownType(value))
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameType::Syn => "SYN",
            FrameType::SynAck => "SYN_ACK",
            FrameType::Data => "DATA",
            FrameType::DataAck => "DATA_ACK",
            FrameType::Fin => "FIN",
            FrameType::FinAck => "FIN_ACK",
            FrameType::Rst => "RST",
        };
        f.write_str(name)
    }
}

/// A decoded Go-Back-N frame.
///
/// The checksum is not stored: [`Frame::encode`] computes it and
/// [`Frame::decode`] only returns frames whose checksum verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub seqnum: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A payload-less frame (every type except DATA).
    pub fn control(kind: FrameType, seqnum: u8) -> Self {
        Self {
            kind,
            seqnum,
            payload: Vec::new(),
        }
    }

    /// A DATA frame carrying `payload`.
    pub fn data(seqnum: u8, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameType::Data,
            seqnum,
            payload,
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    ///
    /// Returns [`FrameError::PayloadTooLong`] if the payload exceeds
    /// [`MAX_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(self.payload.len()));
        }

        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_TYPE] = self.kind as u8;
        buf[OFF_SEQ] = self.seqnum;
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = checksum(self.kind as u8, self.seqnum, &self.payload);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Frame`] from a raw datagram.
    ///
    /// The checksum is verified before the type byte is interpreted, so any
    /// corruption of the header surfaces as [`FrameError::ChecksumMismatch`].
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Truncated(buf.len()));
        }
        let payload = &buf[HEADER_LEN..];
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }

        let raw_type = buf[OFF_TYPE];
        let seqnum = buf[OFF_SEQ];
        let carried = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
        let computed = checksum(raw_type, seqnum, payload);
        if carried != computed {
            return Err(FrameError::ChecksumMismatch { carried, computed });
        }

        Ok(Frame {
            kind: FrameType::try_from(raw_type)?,
            seqnum,
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when encoding or parsing a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("datagram of {0} bytes is shorter than the frame header")]
    Truncated(usize),
    #[error("payload of {0} bytes exceeds the frame payload limit")]
    PayloadTooLong(usize),
    #[error("checksum mismatch: carried {carried:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { carried: u16, computed: u16 },
    #[error("unknown frame type {0}")]
    UnknownType(u8),
}

/// One's-complement Internet checksum over the header fields and payload.
///
/// Word 0 is `type << 8 | seqnum`; payload bytes follow as big-endian words
/// with an odd trailing byte padded with zero on the right.  The 32-bit sum
/// is folded into 16 bits twice and complemented.
pub fn checksum(kind: u8, seqnum: u8, payload: &[u8]) -> u16 {
    let mut sum = u32::from(u16::from_be_bytes([kind, seqnum]));

    let mut words = payload.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    sum = (sum >> 16) + (sum & 0xffff);
    sum += sum >> 16;
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::data(42, b"hello".to_vec());
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_frames_roundtrip() {
        for kind in FrameType::ALL {
            let frame = Frame::control(kind, 255);
            let bytes = frame.encode().unwrap();
            assert_eq!(bytes.len(), HEADER_LEN);
            assert_eq!(Frame::decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn header_layout() {
        let bytes = Frame::data(7, vec![0xab, 0xcd, 0xef]).encode().unwrap();
        assert_eq!(bytes[OFF_TYPE], FrameType::Data as u8);
        assert_eq!(bytes[OFF_SEQ], 7);
        let carried = u16::from_be_bytes([bytes[2], bytes[3]]);
        assert_eq!(carried, checksum(2, 7, &[0xab, 0xcd, 0xef]));
        assert_eq!(&bytes[HEADER_LEN..], &[0xab, 0xcd, 0xef]);
    }

    #[test]
    fn checksum_known_value() {
        // 0x0201 + 0x0102 + 0x0300 = 0x0603, complement = 0xf9fc.
        assert_eq!(checksum(2, 1, &[0x01, 0x02, 0x03]), 0xf9fc);
    }

    #[test]
    fn checksum_folds_carries() {
        // 0x0000 + 0xffff + 0xffff = 0x1fffe → 0xffff → complement 0x0000.
        assert_eq!(checksum(0, 0, &[0xff, 0xff, 0xff, 0xff]), 0x0000);
    }

    #[test]
    fn max_payload_roundtrip() {
        let frame = Frame::data(3, vec![0x5a; MAX_PAYLOAD]);
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn oversized_payload_rejected() {
        let frame = Frame::data(0, vec![0; MAX_PAYLOAD + 1]);
        assert_eq!(frame.encode(), Err(FrameError::PayloadTooLong(MAX_PAYLOAD + 1)));

        let raw = vec![0u8; HEADER_LEN + MAX_PAYLOAD + 1];
        assert_eq!(
            Frame::decode(&raw),
            Err(FrameError::PayloadTooLong(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Frame::decode(&[]), Err(FrameError::Truncated(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Frame::decode(&[0u8; HEADER_LEN - 1]),
            Err(FrameError::Truncated(HEADER_LEN - 1))
        );
    }

    #[test]
    fn unknown_type_with_valid_checksum() {
        let mut bytes = vec![9u8, 0, 0, 0];
        bytes[2..4].copy_from_slice(&checksum(9, 0, &[]).to_be_bytes());
        assert_eq!(Frame::decode(&bytes), Err(FrameError::UnknownType(9)));
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(301).collect();
        let bytes = Frame::data(200, payload).encode().unwrap();

        for bit in 0..bytes.len() * 8 {
            let mut corrupted = bytes.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert!(
                Frame::decode(&corrupted).is_err(),
                "flip of bit {bit} went undetected"
            );
        }
    }

    #[test]
    fn single_bit_flip_on_zero_frame_is_detected() {
        let bytes = Frame::control(FrameType::Syn, 0).encode().unwrap();
        for bit in 0..bytes.len() * 8 {
            let mut corrupted = bytes.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert!(matches!(
                Frame::decode(&corrupted),
                Err(FrameError::ChecksumMismatch { .. })
            ));
        }
    }
}
