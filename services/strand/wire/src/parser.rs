//! Pack parser contract and stock framings.
//!
//! After every read the session hands the unconsumed bytes to a [`PackParser`].
//! The parser never consumes anything itself; it only reports whether the front
//! of the buffer holds a whole frame, part of one, or garbage.

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// Size of the [`LengthPrefixed`] length field
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame size for [`LengthPrefixed`] (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Hard maximum frame size for [`LengthPrefixed`] (64 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Largest payload a single [`DigitPrefixed`] frame carries
const MAX_DIGIT_PAYLOAD: usize = 9;

/// One complete frame at the front of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Total bytes the frame occupies, framing included. Consumed after delivery.
    pub len: usize,
    /// Leading framing bytes not handed to the receive callback.
    pub header: usize,
    /// Caller-defined frame classification.
    pub kind: i32,
}

impl Packet {
    /// A frame of `len` bytes delivered in full.
    pub fn new(len: usize, kind: i32) -> Self {
        Self {
            len,
            header: 0,
            kind,
        }
    }

    /// Hide the first `header` bytes from the receive callback.
    pub fn with_header(mut self, header: usize) -> Self {
        self.header = header;
        self
    }

    /// Whether this packet can be cut out of `available` buffered bytes.
    pub fn fits(&self, available: usize) -> bool {
        self.len > 0 && self.len <= available && self.header <= self.len
    }

    /// The part of `data` delivered to the application.
    ///
    /// `data` must hold at least `len` bytes (see [`fits`](Self::fits)).
    pub fn body<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.header..self.len]
    }
}

/// Result of inspecting the unconsumed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not enough bytes for one frame yet
    Incomplete,
    /// The front of the buffer can never become a valid frame
    Corrupt,
    /// A whole frame is available
    Complete(Packet),
}

/// Caller-supplied framing.
///
/// Implementations must be pure: the same input always yields the same outcome.
pub trait PackParser: Send + Sync + 'static {
    /// Inspect `data`, the unconsumed bytes in arrival order.
    fn parse(&self, data: &[u8]) -> ParseOutcome;
}

impl<F> PackParser for F
where
    F: Fn(&[u8]) -> ParseOutcome + Send + Sync + 'static,
{
    fn parse(&self, data: &[u8]) -> ParseOutcome {
        self(data)
    }
}

/// Big-endian `u32` length prefix followed by that many payload bytes.
///
/// ```text
/// +----------------+---------------------+
/// | u32 len (BE)   | payload (len bytes) |
/// +----------------+---------------------+
/// ```
#[derive(Debug, Clone)]
pub struct LengthPrefixed {
    max_frame_size: usize,
}

impl LengthPrefixed {
    /// Create a parser with the default 16 MiB limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a parser with a custom payload limit, capped at [`HARD_MAX_FRAME_SIZE`]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Configured payload limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Frame `payload` for sending
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, WireError> {
        if payload.len() > self.max_frame_size {
            return Err(WireError::Size(payload.len()));
        }
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}

impl Default for LengthPrefixed {
    fn default() -> Self {
        Self::new()
    }
}

impl PackParser for LengthPrefixed {
    fn parse(&self, data: &[u8]) -> ParseOutcome {
        if data.len() < LENGTH_PREFIX_SIZE {
            return ParseOutcome::Incomplete;
        }

        let payload_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if payload_len > self.max_frame_size {
            debug!(
                "Length prefix {} exceeds maximum {}",
                payload_len, self.max_frame_size
            );
            return ParseOutcome::Corrupt;
        }

        let total = LENGTH_PREFIX_SIZE + payload_len;
        if data.len() < total {
            return ParseOutcome::Incomplete;
        }

        ParseOutcome::Complete(Packet::new(total, 0).with_header(LENGTH_PREFIX_SIZE))
    }
}

/// One ASCII digit `d` followed by `d` payload bytes; the frame kind is `d`.
///
/// Handy for poking a session by hand with `nc`: typing `5hello3abc` yields
/// two frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitPrefixed;

impl DigitPrefixed {
    /// Split `payload` into as many digit-prefixed frames as needed.
    ///
    /// An empty payload becomes a single `0` frame.
    pub fn encode(payload: &[u8]) -> Bytes {
        if payload.is_empty() {
            return Bytes::from_static(b"0");
        }
        let frames = payload.len().div_ceil(MAX_DIGIT_PAYLOAD);
        let mut buf = BytesMut::with_capacity(payload.len() + frames);
        for chunk in payload.chunks(MAX_DIGIT_PAYLOAD) {
            buf.put_u8(b'0' + chunk.len() as u8);
            buf.put_slice(chunk);
        }
        buf.freeze()
    }
}

impl PackParser for DigitPrefixed {
    fn parse(&self, data: &[u8]) -> ParseOutcome {
        let Some(&lead) = data.first() else {
            return ParseOutcome::Incomplete;
        };
        if !lead.is_ascii_digit() {
            return ParseOutcome::Corrupt;
        }

        let payload_len = (lead - b'0') as usize;
        let total = 1 + payload_len;
        if data.len() < total {
            return ParseOutcome::Incomplete;
        }

        ParseOutcome::Complete(Packet::new(total, payload_len as i32).with_header(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameBuffer;

    /// Run a parser over a buffer the way a session does, collecting frames.
    fn drain(parser: &dyn PackParser, buf: &mut FrameBuffer) -> (Vec<(i32, Vec<u8>)>, bool) {
        let mut frames = Vec::new();
        loop {
            match parser.parse(buf.data()) {
                ParseOutcome::Incomplete => return (frames, false),
                ParseOutcome::Corrupt => return (frames, true),
                ParseOutcome::Complete(packet) => {
                    assert!(packet.fits(buf.len()));
                    frames.push((packet.kind, packet.body(buf.data()).to_vec()));
                    buf.consume(packet.len);
                }
            }
        }
    }

    #[test]
    fn test_digit_prefixed_pipelines_two_frames() {
        let mut buf = FrameBuffer::new();
        buf.append(b"5hello3abc");

        let (frames, corrupt) = drain(&DigitPrefixed, &mut buf);

        assert!(!corrupt);
        assert_eq!(
            frames,
            vec![(5, b"hello".to_vec()), (3, b"abc".to_vec())]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_digit_prefixed_incomplete_then_complete() {
        let mut buf = FrameBuffer::new();
        buf.append(b"4ab");
        let (frames, corrupt) = drain(&DigitPrefixed, &mut buf);
        assert!(frames.is_empty());
        assert!(!corrupt);
        assert_eq!(buf.data(), b"4ab");

        buf.append(b"cd");
        let (frames, _) = drain(&DigitPrefixed, &mut buf);
        assert_eq!(frames, vec![(4, b"abcd".to_vec())]);
    }

    #[test]
    fn test_digit_prefixed_corrupt() {
        assert_eq!(DigitPrefixed.parse(b"x123"), ParseOutcome::Corrupt);
        assert_eq!(DigitPrefixed.parse(b""), ParseOutcome::Incomplete);
    }

    #[test]
    fn test_digit_prefixed_encode_splits_long_payloads() {
        let encoded = DigitPrefixed::encode(b"0123456789ab");
        assert_eq!(&encoded[..], &b"901234567839ab"[..]);

        let mut buf = FrameBuffer::new();
        buf.append(&DigitPrefixed::encode(b"0123456789ab"));
        let (frames, _) = drain(&DigitPrefixed, &mut buf);
        assert_eq!(
            frames,
            vec![(9, b"012345678".to_vec()), (3, b"9ab".to_vec())]
        );

        assert_eq!(&DigitPrefixed::encode(b"")[..], b"0");
    }

    #[test]
    fn test_length_prefixed_roundtrip_with_split_reads() {
        let parser = LengthPrefixed::new();
        let first = parser.encode(b"first").unwrap();
        let second = parser.encode(b"").unwrap();

        let mut wire = first.to_vec();
        wire.extend_from_slice(&second);

        let mut buf = FrameBuffer::with_quantum(4);
        buf.append(&wire[..3]);
        let (frames, _) = drain(&parser, &mut buf);
        assert!(frames.is_empty());

        buf.append(&wire[3..]);
        let (frames, corrupt) = drain(&parser, &mut buf);
        assert!(!corrupt);
        assert_eq!(frames, vec![(0, b"first".to_vec()), (0, Vec::new())]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_prefixed_rejects_oversize() {
        let parser = LengthPrefixed::with_max_frame_size(8);
        let mut wire = 9u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"123456789");
        assert_eq!(parser.parse(&wire), ParseOutcome::Corrupt);

        assert_eq!(parser.encode(&[0u8; 9]), Err(WireError::Size(9)));
    }

    #[test]
    fn test_max_frame_size_is_capped() {
        let parser = LengthPrefixed::with_max_frame_size(usize::MAX);
        assert_eq!(parser.max_frame_size(), HARD_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_closure_parser() {
        let whole = |data: &[u8]| {
            if data.is_empty() {
                ParseOutcome::Incomplete
            } else {
                ParseOutcome::Complete(Packet::new(data.len(), 7))
            }
        };
        assert_eq!(
            whole.parse(b"abc"),
            ParseOutcome::Complete(Packet::new(3, 7))
        );
    }

    #[test]
    fn test_packet_fits() {
        assert!(Packet::new(3, 0).fits(3));
        assert!(!Packet::new(0, 0).fits(3));
        assert!(!Packet::new(4, 0).fits(3));
        assert!(!Packet::new(2, 0).with_header(3).fits(3));
    }
}
