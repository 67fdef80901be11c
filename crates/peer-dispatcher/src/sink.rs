use std::io::{self, Write};

use bytes::BytesMut;

/// A non-blocking sink that accepts at most `window` bytes until it is refilled, like a socket
/// with a full send buffer.
#[derive(Debug)]
pub struct WindowedSink {
    written: BytesMut,
    window: usize,
    room: usize,
}

impl WindowedSink {
    pub fn new(window: usize) -> Self {
        WindowedSink {
            written: BytesMut::new(),
            window,
            room: window,
        }
    }

    /// Makes room for another `window` bytes
    pub fn refill(&mut self) {
        self.room = self.window;
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Takes everything written so far
    pub fn take(&mut self) -> BytesMut {
        self.written.split()
    }
}

impl Write for WindowedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.room == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let accepted = buf.len().min(self.room);
        self.written.extend_from_slice(&buf[..accepted]);
        self.room -= accepted;

        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
