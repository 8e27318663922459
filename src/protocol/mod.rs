//! Wire Protocol Implementation
//!
//! This module implements the framing and text conventions of the chat
//! protocol.
//!
//! ## Overview
//!
//! Frames are colon-separated field lists terminated by a NUL byte. The
//! first field is the command name. Message bodies carry light HTML markup
//! with embedded name-color and font tags.
//!
//! ## Modules
//!
//! - `codec`: Incremental NUL framing over a byte stream
//! - `types`: The `Frame` type and outgoing command encoding
//! - `markup`: Body cleaning, font tags and anonymous id derivation
//!
//! ## Example
//!
//! ```
//! use roomwire::protocol::{encode_command, Frame, FrameCodec};
//!
//! let mut codec = FrameCodec::default();
//! let frames = codec.feed(b"n:1f\r\n\x00");
//! let frame = Frame::parse(frames[0].as_ref().unwrap());
//! assert_eq!(frame.command, "n");
//!
//! let bytes = encode_command(&["getratelimit"], false);
//! assert_eq!(&bytes[..], b"getratelimit\r\n\x00");
//! ```

pub mod codec;
pub mod markup;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{FrameCodec, FrameError, FrameResult};
pub use markup::{anon_id, clean_message, parse_font, strip_html, CleanedMessage, FontInfo};
pub use types::{encode_command, Frame};
