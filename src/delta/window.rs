use crate::error::{Result, ZsyncError};
use std::io::{self, Read, Write};

/// Fixed-length window sliding over a byte source
///
/// The window is a view into a larger read-ahead buffer. Bytes in
/// `buffer[start..limit]` are valid; the window is `buffer[start..start + len]`.
/// When the buffer runs short, the valid tail is moved to the front and the
/// rest is refilled from the source, so the window is always contiguous.
pub struct RollingWindow<R> {
    source: R,
    buffer: Vec<u8>,
    window_len: usize,
    start: usize,
    limit: usize,
    exhausted: bool,
}

impl<R: Read> RollingWindow<R> {
    /// Wrap `source`, reading up to `capacity` bytes ahead.
    ///
    /// Fails if `capacity < 2 * window_len` or if the source cannot fill a
    /// single window.
    pub fn new(source: R, window_len: usize, capacity: usize) -> Result<Self> {
        if window_len == 0 {
            return Err(ZsyncError::InvalidWindow(
                "window length must be positive".to_string(),
            ));
        }
        if capacity < window_len * 2 {
            return Err(ZsyncError::InvalidWindow(format!(
                "buffer capacity {} is smaller than twice the window length {}",
                capacity, window_len
            )));
        }

        let mut window = Self {
            source,
            buffer: vec![0u8; capacity],
            window_len,
            start: 0,
            limit: 0,
            exhausted: false,
        };
        window.fill()?;

        if window.available() < window_len {
            return Err(ZsyncError::InvalidWindow(format!(
                "source holds {} bytes, fewer than one window of {}",
                window.available(),
                window_len
            )));
        }

        Ok(window)
    }

    /// Move the window forward by `n` bytes (`n <= window_len`).
    ///
    /// Returns `false`, leaving the window where it is, once the source cannot
    /// supply `n` more bytes.
    pub fn advance(&mut self, n: usize) -> Result<bool> {
        assert!(n <= self.window_len, "cannot advance past a whole window");

        if self.available() < self.window_len + n && !self.exhausted {
            self.compact();
            self.fill()?;
        }
        if self.available() < self.window_len + n {
            return Ok(false);
        }

        self.start += n;
        Ok(true)
    }

    /// Byte at offset `i` of the current window
    #[allow(dead_code)]
    pub fn get(&self, i: usize) -> u8 {
        assert!(i < self.window_len, "window index {} out of range", i);
        self.buffer[self.start + i]
    }

    /// The whole current window
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.start..self.start + self.window_len]
    }

    /// Copy `length` bytes from `offset` within the window into `sink`
    #[allow(dead_code)]
    pub fn write_range<W: Write>(&self, sink: &mut W, offset: usize, length: usize) -> io::Result<()> {
        assert!(
            offset + length <= self.window_len,
            "range {}+{} exceeds window",
            offset,
            length
        );
        sink.write_all(&self.buffer[self.start + offset..self.start + offset + length])
    }

    #[allow(dead_code)]
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    fn available(&self) -> usize {
        self.limit - self.start
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buffer.copy_within(self.start..self.limit, 0);
            self.limit -= self.start;
            self.start = 0;
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.limit < self.buffer.len() {
            match self.source.read(&mut self.buffer[self.limit..]) {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => self.limit += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
