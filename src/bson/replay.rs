//! Forward-only input with replay
//!
//! The transport is only ever read sequentially. Every byte pulled from it
//! is kept in `buffer` until no bookmark can need it any more, so the reader
//! can move its cursor backwards without seeking the transport.
//!
//! Stream offsets are `u64`: `base` is the offset of `buffer[0]`, and the
//! logical position is `base + cursor`.

use std::io::{self, Read};
use std::sync::{Arc, Weak};

use super::errors::{CodecError, CodecResult};

const CHUNK_SIZE: usize = 8 * 1024;

pub(crate) struct ReplayBuffer<R> {
    /// Underlying transport; `None` once released
    transport: Option<R>,
    /// Bytes read from the transport and not yet discarded
    buffer: Vec<u8>,
    /// Read position within `buffer`
    cursor: usize,
    /// Stream offset of `buffer[0]`
    base: u64,
    /// Transport reported end of stream
    exhausted: bool,
    /// Positions some bookmark may still return to
    pins: Vec<(u64, Weak<()>)>,
}

impl<R> ReplayBuffer<R> {
    pub fn new(transport: R) -> Self {
        Self {
            transport: Some(transport),
            buffer: Vec::new(),
            cursor: 0,
            base: 0,
            exhausted: false,
            pins: Vec::new(),
        }
    }

    /// Absolute stream offset of the next unread byte
    pub fn position(&self) -> u64 {
        self.base + self.cursor as u64
    }

    /// Records the current position as one a bookmark may return to.
    ///
    /// The position stays replayable for as long as the returned token lives.
    pub fn pin(&mut self) -> Arc<()> {
        let token = Arc::new(());
        self.pins.push((self.position(), Arc::downgrade(&token)));
        token
    }

    /// Moves the cursor to an absolute offset still held in the buffer.
    pub fn rewind_to(&mut self, position: u64) -> bool {
        let end = self.base + self.buffer.len() as u64;
        if position < self.base || position > end {
            return false;
        }
        self.cursor = (position - self.base) as usize;
        true
    }

    /// Discards consumed bytes that no live bookmark can return to.
    pub fn compact(&mut self) {
        self.pins.retain(|(_, token)| token.strong_count() > 0);
        let current = self.position();
        let keep_from = self
            .pins
            .iter()
            .map(|(position, _)| *position)
            .min()
            .map_or(current, |oldest| oldest.min(current));

        let discard = (keep_from - self.base) as usize;
        if discard > 0 {
            self.buffer.drain(..discard);
            self.base += discard as u64;
            self.cursor -= discard;
        }
    }

    /// Gives up the transport. Returns it the first time only.
    pub fn release(&mut self) -> Option<R> {
        self.buffer = Vec::new();
        self.cursor = 0;
        self.pins.clear();
        self.transport.take()
    }

    pub fn is_released(&self) -> bool {
        self.transport.is_none()
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    fn eof_error(&self) -> CodecError {
        CodecError::UnexpectedEof {
            offset: self.base + self.buffer.len() as u64,
        }
    }
}

impl<R: Read> ReplayBuffer<R> {
    /// Pulls from the transport until `wanted` unread bytes are buffered or
    /// the transport ends. Returns the number of unread bytes available.
    fn fill(&mut self, wanted: usize) -> CodecResult<usize> {
        let transport = self.transport.as_mut().ok_or(CodecError::Closed)?;
        let mut chunk = [0u8; CHUNK_SIZE];

        while self.buffer.len() - self.cursor < wanted && !self.exhausted {
            match transport.read(&mut chunk) {
                Ok(0) => self.exhausted = true,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CodecError::Io(e)),
            }
        }

        Ok(self.available())
    }

    /// Returns whether at least one more byte can be read, without consuming it.
    pub fn has_remaining(&mut self) -> CodecResult<bool> {
        Ok(self.fill(1)? > 0)
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> CodecResult<()> {
        if self.fill(out.len())? < out.len() {
            return Err(self.eof_error());
        }
        out.copy_from_slice(&self.buffer[self.cursor..self.cursor + out.len()]);
        self.cursor += out.len();
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> CodecResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> CodecResult<()> {
        if self.fill(len)? < len {
            return Err(self.eof_error());
        }
        self.cursor += len;
        Ok(())
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i32(&mut self) -> CodecResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> CodecResult<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> CodecResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> CodecResult<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Reads a NUL-terminated byte string; the terminator is consumed but
    /// not returned.
    pub fn read_cstring(&mut self) -> CodecResult<Vec<u8>> {
        let mut scanned = 0;
        loop {
            let unread = &self.buffer[self.cursor + scanned..];
            if let Some(idx) = unread.iter().position(|b| *b == 0) {
                let end = self.cursor + scanned + idx;
                let bytes = self.buffer[self.cursor..end].to_vec();
                self.cursor = end + 1;
                return Ok(bytes);
            }
            scanned = self.available();
            if self.fill(scanned + 1)? <= scanned {
                return Err(self.eof_error());
            }
        }
    }
}
