//! Wire Frame Types
//!
//! A decoded frame is a colon-separated field list. The first field names
//! the command and the rest are its arguments:
//!
//! ```text
//! participant:1:4321:1638400000:bob:None:1.2.3.4
//! └────┬────┘ └──────────────────┬────────────────┘
//!   command                    args
//! ```
//!
//! Outgoing frames are joined with `:` and terminated with `\r\n\0`, except
//! the very first frame written on a connection, which carries only the
//! NUL.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Field separator inside a frame.
pub const SEPARATOR: char = ':';

/// Terminator of the first frame on a connection.
pub const FIRST_TERMINATOR: &[u8] = b"\x00";

/// Terminator of every later frame.
pub const TERMINATOR: &[u8] = b"\r\n\x00";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command name (first field)
    pub command: String,
    /// Remaining fields, in order
    pub args: Vec<String>,
}

impl Frame {
    /// Splits a decoded frame into command and arguments.
    ///
    /// An empty frame (a bare keep-alive) has an empty command and no args.
    pub fn parse(text: &str) -> Self {
        let mut fields = text.split(SEPARATOR).map(str::to_string);
        let command = fields.next().unwrap_or_default();
        Self {
            command,
            args: fields.collect(),
        }
    }

    /// Returns argument `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Re-joins the arguments from `index` on with the separator.
    ///
    /// Message bodies may themselves contain `:`; this restores them.
    pub fn rest(&self, index: usize) -> String {
        self.args
            .get(index..)
            .map(|tail| tail.join(":"))
            .unwrap_or_default()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, ":{}", arg)?;
        }
        Ok(())
    }
}

/// Encodes an outgoing command.
///
/// # Example
/// ```
/// use roomwire::protocol::encode_command;
///
/// assert_eq!(&encode_command(&["bauth", "room"], true)[..], b"bauth:room\x00");
/// assert_eq!(&encode_command(&["n"], false)[..], b"n\r\n\x00");
/// ```
pub fn encode_command(parts: &[&str], first: bool) -> Bytes {
    let terminator = if first { FIRST_TERMINATOR } else { TERMINATOR };
    let body_len: usize = parts.iter().map(|p| p.len() + 1).sum();

    let mut buf = BytesMut::with_capacity(body_len + terminator.len());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b':');
        }
        buf.put_slice(part.as_bytes());
    }
    buf.put_slice(terminator);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame() {
        let frame = Frame::parse("u:5:abc123");
        assert_eq!(frame.command, "u");
        assert_eq!(frame.args, vec!["5", "abc123"]);
        assert_eq!(frame.arg(1), Some("abc123"));
        assert_eq!(frame.arg(2), None);
    }

    #[test]
    fn test_parse_empty_frame() {
        let frame = Frame::parse("");
        assert_eq!(frame.command, "");
        assert!(frame.args.is_empty());
    }

    #[test]
    fn test_rest_rejoins_body() {
        let frame = Frame::parse("b:1:bob:::x:y:1.2.3.4:::see: 10:30");
        assert_eq!(frame.rest(9), "see: 10:30");
        assert_eq!(frame.rest(40), "");
    }

    #[test]
    fn test_display_round_trips_text() {
        let text = "blocklist:block::next:500";
        assert_eq!(Frame::parse(text).to_string(), text);
    }

    #[test]
    fn test_encode_terminators() {
        assert_eq!(&encode_command(&["tlogin", "tok", "2"], true)[..], b"tlogin:tok:2\x00");
        assert_eq!(&encode_command(&[""], false)[..], b"\r\n\x00");
        assert_eq!(
            &encode_command(&["blocklist", "block", "", "next", "500"], false)[..],
            b"blocklist:block::next:500\r\n\x00"
        );
    }
}
