//! Incremental NUL-Delimited Frame Codec
//!
//! The chat protocol is a plain byte stream. Every command ends with a
//! single NUL byte, and most frames also carry a CRLF just before the NUL.
//! TCP gives no message boundaries, so a read may contain half a frame,
//! several frames, or both.
//!
//! ## How the Codec Works
//!
//! 1. Append incoming network data with [`FrameCodec::extend`]
//! 2. Call [`FrameCodec::next_frame`] until it returns `Ok(None)`
//! 3. Whatever follows the last NUL stays buffered for the next read
//!
//! A frame that cannot be decoded is still consumed, so one bad frame never
//! wedges the frames behind it.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// The frame terminator.
pub const NUL: u8 = 0;

/// Initial capacity of the accumulator.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    /// The frame is not valid UTF-8 and the codec is in strict mode
    #[error("invalid UTF-8 in frame: {0}")]
    InvalidUtf8(String),
}

/// Result type for decoding operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Splits a byte stream into decoded text frames.
///
/// # Example
///
/// ```
/// use roomwire::protocol::FrameCodec;
///
/// let mut codec = FrameCodec::new(true);
/// codec.extend(b"abc\x00de");
/// assert_eq!(codec.next_frame().unwrap(), Some("abc".to_string()));
/// assert_eq!(codec.next_frame().unwrap(), None);
///
/// codec.extend(b"f\x00");
/// assert_eq!(codec.next_frame().unwrap(), Some("def".to_string()));
/// ```
#[derive(Debug)]
pub struct FrameCodec {
    /// Bytes received but not yet terminated by a NUL
    buffer: BytesMut,

    /// Substitute invalid sequences instead of rejecting the frame
    tolerant: bool,
}

impl FrameCodec {
    /// Creates an empty codec.
    pub fn new(tolerant: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            tolerant,
        }
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extracts the next complete frame, if any.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))` - a frame was consumed and decoded
    /// - `Ok(None)` - no complete frame is buffered
    /// - `Err(e)` - a frame was consumed but could not be decoded
    pub fn next_frame(&mut self) -> FrameResult<Option<String>> {
        let Some(pos) = self.buffer.iter().position(|&b| b == NUL) else {
            return Ok(None);
        };

        let raw = self.buffer.split_to(pos);
        self.buffer.advance(1);

        let text = if self.tolerant {
            String::from_utf8_lossy(&raw).into_owned()
        } else {
            std::str::from_utf8(&raw)
                .map_err(|e| FrameError::InvalidUtf8(e.to_string()))?
                .to_string()
        };

        Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Appends `data` and drains every complete frame, in arrival order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<FrameResult<String>> {
        self.extend(data);

        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => frames.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => frames.push(Err(e)),
            }
        }
        frames
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partial frame (used when a connection is replaced).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_reads() {
        let mut codec = FrameCodec::default();

        let first = codec.feed(b"abc\x00de");
        assert_eq!(first, vec![Ok("abc".to_string())]);
        assert_eq!(codec.buffered(), 2);

        let second = codec.feed(b"f\x00");
        assert_eq!(second, vec![Ok("def".to_string())]);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_fragmented_matches_whole() {
        let whole = b"b:1:bob::1234:abcd:1:1.2.3.4:0:0:hello world\r\n\x00n:1f\r\n\x00";

        let mut one = FrameCodec::default();
        let expected = one.feed(whole);
        assert_eq!(expected.len(), 2);

        let mut many = FrameCodec::default();
        let mut got = Vec::new();
        for byte in whole.iter() {
            got.extend(many.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_strips_trailing_crlf() {
        let mut codec = FrameCodec::default();
        let frames = codec.feed(b"\r\n\x00ok:a:b\r\n\x00");
        assert_eq!(frames, vec![Ok(String::new()), Ok("ok:a:b".to_string())]);
    }

    #[test]
    fn test_multiple_frames_one_read() {
        let mut codec = FrameCodec::default();
        let frames = codec.feed(b"a\x00b\x00c\x00d");
        assert_eq!(
            frames,
            vec![Ok("a".to_string()), Ok("b".to_string()), Ok("c".to_string())]
        );
        assert_eq!(codec.buffered(), 1);
    }

    #[test]
    fn test_tolerant_replaces_invalid_utf8() {
        let mut codec = FrameCodec::new(true);
        let frames = codec.feed(b"x\xffy\x00");
        assert_eq!(frames, vec![Ok("x\u{fffd}y".to_string())]);
    }

    #[test]
    fn test_strict_error_does_not_lose_following_frames() {
        let mut codec = FrameCodec::new(false);
        let frames = codec.feed(b"bad\xff\x00good\x00");

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(FrameError::InvalidUtf8(_))));
        assert_eq!(frames[1], Ok("good".to_string()));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_clear() {
        let mut codec = FrameCodec::default();
        codec.extend(b"partial");
        codec.clear();
        assert_eq!(codec.buffered(), 0);
        assert_eq!(codec.next_frame(), Ok(None));
    }
}
