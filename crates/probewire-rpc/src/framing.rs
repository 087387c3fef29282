//! Length-prefixed framing for the stream and datagram bindings.
//!
//! # Frame Structure (Big Endian)
//!
//! ```text
//! [Header: 4 bytes BE u32 len] [Payload: len - 4 bytes]
//! ```
//!
//! Unlike most length-prefixed formats, `len` counts the header itself, so the
//! smallest valid frame is `len = 4` with an empty payload.
//!
//! [`FrameCodec`] reassembles frames from a byte stream with an explicit state
//! machine:
//!
//! ```text
//! AwaitingHeader --(>= 4 bytes buffered)--> AwaitingBody { len }
//! AwaitingBody   --(>= len bytes buffered)--> emit one frame, keep surplus
//!                                             --> AwaitingHeader
//! ```
//!
//! The header is never parsed until four full bytes are buffered, and a frame
//! split across any number of reads is emitted exactly once.

use thiserror::Error;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound for a single frame (header included).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Errors raised while framing or unframing bytes.
#[derive(Error, Debug)]
pub enum FrameError {
    /// An I/O error occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The declared length cannot even hold the header.
    #[error("declared frame length {0} is shorter than the header")]
    TooShort(u32),

    /// The declared length is above the configured limit.
    #[error("declared frame length {len} exceeds limit {max}")]
    TooLarge { len: usize, max: usize },

    /// A datagram's header disagrees with the datagram's size.
    #[error("frame declares {declared} bytes but {actual} were received")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Wrap a payload with the inclusive 4-byte BE length header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&((payload.len() + HEADER_LEN) as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Read the total frame length (header included) from a 4-byte BE header.
pub fn read_frame_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Unwrap a frame that must arrive whole, such as a single datagram.
///
/// Returns the payload without the header.
pub fn decode_whole_frame(data: &[u8]) -> Result<&[u8], FrameError> {
    let Some(header) = data.first_chunk::<HEADER_LEN>() else {
        return Err(FrameError::LengthMismatch {
            declared: HEADER_LEN,
            actual: data.len(),
        });
    };
    let declared = read_frame_length(header);
    if (declared as usize) < HEADER_LEN {
        return Err(FrameError::TooShort(declared));
    }
    if declared as usize != data.len() {
        return Err(FrameError::LengthMismatch {
            declared: declared as usize,
            actual: data.len(),
        });
    }
    Ok(&data[HEADER_LEN..])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingHeader,
    AwaitingBody { len: usize },
}

/// Stateful codec turning a byte stream into payloads and back.
#[derive(Debug)]
pub struct FrameCodec {
    state: DecodeState,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            max_frame_size,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    let Some(header) = src.first_chunk::<HEADER_LEN>() else {
                        return Ok(None);
                    };
                    let declared = read_frame_length(header);
                    let len = declared as usize;
                    if len < HEADER_LEN {
                        return Err(FrameError::TooShort(declared));
                    }
                    if len > self.max_frame_size {
                        return Err(FrameError::TooLarge {
                            len,
                            max: self.max_frame_size,
                        });
                    }
                    self.state = DecodeState::AwaitingBody { len };
                }
                DecodeState::AwaitingBody { len } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let mut frame = src.split_to(len);
                    frame.advance(HEADER_LEN);
                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(frame.to_vec()));
                }
            }
        }
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = payload.len() + HEADER_LEN;
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        dst.reserve(len);
        dst.put_u32(len as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_frame_counts_header() {
        let frame = encode_frame(b"hello");
        assert_eq!(frame.len(), 9);
        assert_eq!(&frame[..4], &9u32.to_be_bytes());
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn empty_payload_frame_is_header_only() {
        let frame = encode_frame(&[]);
        assert_eq!(frame, vec![0, 0, 0, 4]);
    }

    #[test]
    fn partial_header_is_not_parsed() {
        let mut codec = FrameCodec::new();
        // A lone zero byte would be a "length" of 0 if the header were read early.
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn ten_byte_frame_in_five_two_byte_reads_is_emitted_once() {
        let frame = encode_frame(b"abcdef");
        assert_eq!(frame.len(), 10);

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut emitted = Vec::new();
        for chunk in frame.chunks(2) {
            buf.extend_from_slice(chunk);
            while let Some(payload) = codec.decode(&mut buf).unwrap() {
                emitted.push(payload);
            }
        }
        assert_eq!(emitted, vec![b"abcdef".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn surplus_bytes_start_the_next_frame() {
        let mut wire = encode_frame(b"one");
        wire.extend(encode_frame(b"two"));
        wire.extend_from_slice(&[0, 0]);

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&wire[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"one".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"two".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], &[0, 0]);
    }

    #[test]
    fn declared_length_below_header_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 3][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::TooShort(3))));
    }

    #[test]
    fn oversized_frame_is_rejected_before_buffering() {
        let mut codec = FrameCodec::with_max_frame_size(16);
        let mut buf = BytesMut::from(&100u32.to_be_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::TooLarge { len: 100, max: 16 })
        ));
    }

    #[test]
    fn encoder_matches_encode_frame() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(b"xyz".to_vec(), &mut dst).unwrap();
        assert_eq!(&dst[..], &encode_frame(b"xyz")[..]);
    }

    #[test]
    fn whole_frame_round_trip() {
        let frame = encode_frame(b"{}");
        assert_eq!(decode_whole_frame(&frame).unwrap(), b"{}");
    }

    #[test]
    fn whole_frame_rejects_truncation_and_short_input() {
        let mut frame = encode_frame(b"payload");
        frame.pop();
        assert!(matches!(
            decode_whole_frame(&frame),
            Err(FrameError::LengthMismatch { declared: 11, actual: 10 })
        ));
        assert!(decode_whole_frame(&[0, 0]).is_err());
    }
}
