//! Serial link frame codec
//!
//! Every message between the gateway and the mesh radio is one frame:
//!
//! ```text
//! ┌───────────┬─────────────┬───────────────┬─────────────┬──────────────────┐
//! │ len (u32) │ opcode (u32)│ model_id (u32)│ addr (u32)  │ payload[len]     │
//! └───────────┴─────────────┴───────────────┴─────────────┴──────────────────┘
//! ```
//!
//! Header fields are little-endian. The mesh address is 16 bits wide but
//! travels in a 32-bit field on this link. A `len` of 0 is a complete frame.
//!
//! # Incremental decoding
//!
//! The link hands over bytes from its receive callback, so reconstruction is
//! a byte-at-a-time state machine ([`RxState::step`]). The payload buffer is
//! reserved once, as soon as the length field is known, and never grows past
//! it. A frame whose declared length cannot be accepted is reported as
//! [`FrameState::Dropped`] and its payload bytes are skipped so the stream
//! stays aligned.

use crate::error::{Error, Result};

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 16;

/// Bytes of header needed before the payload length is known
const LEN_FIELD: usize = 4;

/// Default upper bound for a single payload (largest mesh access message)
pub const DEFAULT_MAX_PAYLOAD: usize = 384;

/// One serial link message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Mesh vendor opcode
    pub opcode: u32,
    /// Mesh model the message belongs to
    pub model_id: u32,
    /// Destination (outbound) or source (inbound) mesh address
    pub address: u16,
    /// Raw message bytes, already in mesh byte order
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: u32, model_id: u32, address: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            model_id,
            address,
            payload: payload.into(),
        }
    }

    /// Declared payload length as carried in the header
    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Total size on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize into a reusable buffer (cleared first).
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.payload_len().to_le_bytes());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&self.model_id.to_le_bytes());
        out.extend_from_slice(&u32::from(self.address).to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode a buffer holding exactly one frame.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let Some(head) = bytes.first_chunk::<HEADER_LEN>() else {
            return Err(Error::InvalidFrame(format!(
                "{} bytes is shorter than the {} byte header",
                bytes.len(),
                HEADER_LEN
            )));
        };
        let header = FrameHeader::parse(head);
        let body = &bytes[HEADER_LEN..];
        if body.len() != header.len as usize {
            return Err(Error::InvalidFrame(format!(
                "header declares {} payload bytes, buffer has {}",
                header.len,
                body.len()
            )));
        }
        Ok(header.into_frame(body.to_vec()))
    }
}

/// Encode a frame straight from its parts.
pub fn encode(opcode: u32, model_id: u32, address: u16, payload: &[u8]) -> Vec<u8> {
    Frame::new(opcode, model_id, address, payload).encode()
}

/// Parsed fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub opcode: u32,
    pub model_id: u32,
    pub address: u32,
}

impl FrameHeader {
    fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        let field = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            len: field(0),
            opcode: field(4),
            model_id: field(8),
            address: field(12),
        }
    }

    fn into_frame(self, payload: Vec<u8>) -> Frame {
        Frame {
            opcode: self.opcode,
            model_id: self.model_id,
            // Mesh addresses are 16 bit; upper half of the field is padding
            address: self.address as u16,
            payload,
        }
    }
}

/// Why an in-flight frame was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Declared length exceeds the configured maximum
    TooLarge { len: u32, max: usize },
    /// Payload buffer could not be reserved
    OutOfMemory { len: u32 },
}

/// Result of feeding one byte to the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameState {
    /// Byte consumed while skipping an abandoned frame's payload
    NeedMore,
    /// `n` header bytes have been received
    HeaderByte(usize),
    /// `n` payload bytes have been received
    PayloadByte(usize),
    /// A full frame is ready, decoder is back to idle
    Complete(Frame),
    /// Header finished but the frame will not be delivered
    Dropped(DropReason),
}

/// Payload buffer reservation, decided once the length field is in
#[derive(Debug)]
pub enum Reservation {
    Pending,
    Ready(Vec<u8>),
    Failed(DropReason),
}

impl Reservation {
    fn for_len(len: u32, max_payload: usize) -> Self {
        if len as usize > max_payload {
            return Reservation::Failed(DropReason::TooLarge {
                len,
                max: max_payload,
            });
        }
        let mut payload = Vec::new();
        match payload.try_reserve_exact(len as usize) {
            Ok(()) => Reservation::Ready(payload),
            Err(_) => Reservation::Failed(DropReason::OutOfMemory { len }),
        }
    }
}

/// Receive stream state
#[derive(Debug, Default)]
pub enum RxState {
    /// No byte of the next frame seen yet
    #[default]
    Idle,
    /// `seen` of [`HEADER_LEN`] header bytes received
    Header {
        buf: [u8; HEADER_LEN],
        seen: usize,
        reservation: Reservation,
    },
    /// Header complete, collecting exactly `header.len` bytes
    Payload {
        header: FrameHeader,
        payload: Vec<u8>,
    },
    /// Discarding the payload of a dropped frame
    Skipping { remaining: u32 },
}

impl RxState {
    /// Advance by one byte.
    ///
    /// Pure with respect to its inputs: no I/O, no blocking, and the only
    /// allocation is the payload reservation made when the length field
    /// completes.
    pub fn step(self, byte: u8, max_payload: usize) -> (RxState, FrameState) {
        match self {
            RxState::Idle => {
                Self::header_byte([0; HEADER_LEN], 0, Reservation::Pending, byte, max_payload)
            }
            RxState::Header {
                buf,
                seen,
                reservation,
            } => Self::header_byte(buf, seen, reservation, byte, max_payload),
            RxState::Payload {
                header,
                mut payload,
            } => {
                payload.push(byte);
                let n = payload.len();
                if n == header.len as usize {
                    (RxState::Idle, FrameState::Complete(header.into_frame(payload)))
                } else {
                    (RxState::Payload { header, payload }, FrameState::PayloadByte(n))
                }
            }
            RxState::Skipping { remaining } if remaining <= 1 => {
                (RxState::Idle, FrameState::NeedMore)
            }
            RxState::Skipping { remaining } => (
                RxState::Skipping {
                    remaining: remaining - 1,
                },
                FrameState::NeedMore,
            ),
        }
    }

    fn header_byte(
        mut buf: [u8; HEADER_LEN],
        seen: usize,
        reservation: Reservation,
        byte: u8,
        max_payload: usize,
    ) -> (RxState, FrameState) {
        buf[seen] = byte;
        let seen = seen + 1;

        let reservation = if seen == LEN_FIELD {
            let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            Reservation::for_len(len, max_payload)
        } else {
            reservation
        };

        if seen < HEADER_LEN {
            return (
                RxState::Header {
                    buf,
                    seen,
                    reservation,
                },
                FrameState::HeaderByte(seen),
            );
        }

        let header = FrameHeader::parse(&buf);
        let reservation = match reservation {
            Reservation::Pending => Reservation::for_len(header.len, max_payload),
            decided => decided,
        };

        match reservation {
            Reservation::Ready(payload) if header.len == 0 => {
                (RxState::Idle, FrameState::Complete(header.into_frame(payload)))
            }
            Reservation::Ready(payload) => (
                RxState::Payload { header, payload },
                FrameState::HeaderByte(HEADER_LEN),
            ),
            Reservation::Failed(reason) => {
                let next = if header.len == 0 {
                    RxState::Idle
                } else {
                    RxState::Skipping {
                        remaining: header.len,
                    }
                };
                (next, FrameState::Dropped(reason))
            }
            Reservation::Pending => (RxState::Idle, FrameState::NeedMore),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RxState::Idle)
    }
}

/// Owns an [`RxState`] and feeds it one byte at a time
#[derive(Debug)]
pub struct FrameDecoder {
    state: RxState,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: RxState::Idle,
            max_payload,
        }
    }

    /// Feed one byte.
    #[inline]
    pub fn push(&mut self, byte: u8) -> FrameState {
        let state = std::mem::take(&mut self.state);
        let (next, out) = state.step(byte, self.max_payload);
        self.state = next;
        out
    }

    /// Feed a chunk, calling `on_frame` for every completed frame.
    ///
    /// Returns the number of frames dropped inside this chunk.
    pub fn feed<F: FnMut(Frame)>(&mut self, bytes: &[u8], mut on_frame: F) -> usize {
        let mut dropped = 0;
        for &byte in bytes {
            match self.push(byte) {
                FrameState::Complete(frame) => on_frame(frame),
                FrameState::Dropped(reason) => {
                    log::warn!("Dropping inbound frame: {:?}", reason);
                    dropped += 1;
                }
                _ => {}
            }
        }
        dropped
    }

    /// Abandon any partial frame.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::new(0xCB_0059, 0x0D, 0x0010, vec![0, 0, 1, 0xF4, 0, 0, 0, 90, 100]),
            Frame::new(0xCD_0059, 0x0D, 0xFFFF, Vec::new()),
            Frame::new(0xD0_0059, 0x13, 0x0020, vec![0x01, 0xF4, 0, 230, 10]),
            Frame::new(0xCA_0059, 0x0B, 0x0001, vec![0xAA; 6]),
        ]
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(0x11223344, 0x0D, 0x0010, &[7, 8]);
        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[8..12], &[0x0D, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[0x10, 0, 0, 0]);
        assert_eq!(&bytes[16..], &[7, 8]);
    }

    #[test]
    fn test_round_trip() {
        for frame in sample_frames() {
            let decoded = Frame::decode(&frame.encode()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_zero_length_completes_after_header() {
        let bytes = encode(0xCD_0059, 0x0D, 0xFFFF, &[]);
        let mut decoder = FrameDecoder::default();
        for (i, &b) in bytes[..HEADER_LEN - 1].iter().enumerate() {
            assert_eq!(decoder.push(b), FrameState::HeaderByte(i + 1));
        }
        match decoder.push(bytes[HEADER_LEN - 1]) {
            FrameState::Complete(frame) => {
                assert_eq!(frame.address, 0xFFFF);
                assert!(frame.payload.is_empty());
            }
            other => panic!("expected Complete, got {:?}", other),
        }
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_progress_reporting() {
        let bytes = encode(1, 2, 3, &[9, 9, 9]);
        let mut decoder = FrameDecoder::default();
        let states: Vec<FrameState> = bytes.iter().map(|&b| decoder.push(b)).collect();
        assert_eq!(states[0], FrameState::HeaderByte(1));
        assert_eq!(states[15], FrameState::HeaderByte(16));
        assert_eq!(states[16], FrameState::PayloadByte(1));
        assert_eq!(states[17], FrameState::PayloadByte(2));
        assert!(matches!(states[18], FrameState::Complete(_)));
    }

    #[test]
    fn test_every_split_matches_whole_decode() {
        for frame in sample_frames() {
            let bytes = frame.encode();
            let whole = Frame::decode(&bytes).unwrap();
            for split in 0..=bytes.len() {
                let mut decoder = FrameDecoder::default();
                let mut out = Vec::new();
                decoder.feed(&bytes[..split], |f| out.push(f));
                decoder.feed(&bytes[split..], |f| out.push(f));
                assert_eq!(out, vec![whole.clone()], "split at {}", split);
            }
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut stream = Vec::new();
        for frame in sample_frames() {
            stream.extend(frame.encode());
        }
        let mut decoder = FrameDecoder::default();
        let mut out = Vec::new();
        assert_eq!(decoder.feed(&stream, |f| out.push(f)), 0);
        assert_eq!(out, sample_frames());
    }

    #[test]
    fn test_oversized_frame_skipped_and_stream_realigns() {
        let big = Frame::new(5, 6, 7, vec![0x55; 64]);
        let good = Frame::new(0xCC_0059, 0x0D, 0x0020, Vec::new());
        let mut stream = big.encode();
        stream.extend(good.encode());

        let mut decoder = FrameDecoder::new(32);
        let mut out = Vec::new();
        let dropped = decoder.feed(&stream, |f| out.push(f));
        assert_eq!(dropped, 1);
        assert_eq!(out, vec![good]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_drop_reported_when_header_completes() {
        let bytes = encode(1, 1, 1, &[0; 10]);
        let mut decoder = FrameDecoder::new(4);
        for &b in &bytes[..HEADER_LEN - 1] {
            decoder.push(b);
        }
        assert_eq!(
            decoder.push(bytes[HEADER_LEN - 1]),
            FrameState::Dropped(DropReason::TooLarge { len: 10, max: 4 })
        );
        for &b in &bytes[HEADER_LEN..] {
            assert_eq!(decoder.push(b), FrameState::NeedMore);
        }
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let bytes = encode(1, 2, 3, &[4, 5, 6]);
        let mut decoder = FrameDecoder::default();
        decoder.feed(&bytes[..10], |_| panic!("no frame expected"));
        decoder.reset();
        let mut out = Vec::new();
        decoder.feed(&bytes, |f| out.push(f));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_decode_rejects_bad_buffers() {
        assert!(Frame::decode(&[0; 8]).is_err());
        let mut bytes = encode(1, 2, 3, &[4, 5]);
        bytes.push(6);
        assert!(Frame::decode(&bytes).is_err());
        bytes.truncate(HEADER_LEN + 1);
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn test_address_field_truncated_to_mesh_width() {
        let mut bytes = encode(1, 2, 0x1234, &[]);
        bytes[14] = 0xAB;
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.address, 0x1234);
    }
}
