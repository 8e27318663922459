//! Outbound write buffering.
//!
//! Every session queues encoded frames here; the manager drains the queue
//! into the socket as far as the socket accepts.
//!
//! During the authentication handshake a write lock is engaged. Frames
//! written while locked are held aside and appended to the queue, in their
//! original order, the moment the lock is released. That keeps them behind
//! the authentication frame no matter when the application issued them.

use crate::protocol::encode_command;
use bytes::{Buf, BytesMut};

#[derive(Debug, Default)]
pub struct Outbound {
    /// Bytes ready for the socket
    buffer: BytesMut,
    /// Bytes held while the write lock is engaged
    held: BytesMut,
    write_lock: bool,
    /// The next frame is the first on this connection
    first_command: bool,
}

impl Outbound {
    pub fn new() -> Self {
        Self {
            first_command: true,
            ..Self::default()
        }
    }

    /// Forgets everything queued and starts a fresh connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.held.clear();
        self.write_lock = false;
        self.first_command = true;
    }

    /// Encodes and queues a command.
    pub fn send(&mut self, parts: &[&str]) {
        let bytes = encode_command(parts, self.first_command);
        self.first_command = false;
        self.write(&bytes);
    }

    /// Queues raw bytes, honouring the write lock.
    pub fn write(&mut self, data: &[u8]) {
        if self.write_lock {
            self.held.extend_from_slice(data);
        } else {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Engages or releases the write lock.
    ///
    /// Releasing moves everything held into the queue in one piece.
    pub fn set_write_lock(&mut self, lock: bool) {
        self.write_lock = lock;
        if !lock && !self.held.is_empty() {
            let held = self.held.split();
            self.buffer.unsplit(held);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.write_lock
    }

    /// Bytes waiting for the socket.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes held behind the write lock.
    pub fn held(&self) -> &[u8] {
        &self.held
    }

    /// Marks `n` bytes as written.
    pub fn advance(&mut self, n: usize) {
        self.buffer.advance(n.min(self.buffer.len()));
    }

    /// True when nothing is ready for the socket.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Takes everything ready for the socket.
    pub fn take(&mut self) -> BytesMut {
        self.buffer.split()
    }
}
