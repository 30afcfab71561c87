//! Zlib-stream decompression.
//!
//! The gateway sends every message as fragments of one long zlib stream.
//! A logical message is complete when the accumulated bytes end with the
//! sync-flush suffix `00 00 FF FF`; only then is the buffer inflated, and
//! always through the same inflater so the shared dictionary survives
//! across messages.

use flate2::{Decompress, FlushDecompress, Status};
use std::io;

/// Suffix marking the end of a complete message in the stream.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Granularity of output buffer growth while inflating.
const OUTPUT_CHUNK: usize = 16 * 1024;

/// Streaming decoder for the gateway's zlib-stream transport.
pub struct ZlibStreamDecoder {
    /// Compressed fragments accumulated since the last complete message.
    buffer: Vec<u8>,
    /// Reused inflate output buffer.
    output: Vec<u8>,
    /// Inflater state shared across the whole connection.
    inflater: Decompress,
}

impl ZlibStreamDecoder {
    /// Create a decoder for a fresh connection.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(8 * 1024),
            output: Vec::with_capacity(OUTPUT_CHUNK),
            inflater: Decompress::new(true),
        }
    }

    /// Feed one transport fragment.
    ///
    /// Returns the decoded message text once the accumulated stream ends
    /// with the sync-flush suffix, `None` while the message is still
    /// partial.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<String>, io::Error> {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() < 4 || self.buffer[self.buffer.len() - 4..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        self.inflate()?;
        self.buffer.clear();

        let text = std::str::from_utf8(&self.output)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(text.to_owned()))
    }

    /// Inflate the accumulated buffer into the output buffer.
    fn inflate(&mut self) -> Result<(), io::Error> {
        self.output.clear();
        let mut consumed = 0usize;

        loop {
            if self.output.len() == self.output.capacity() {
                self.output.reserve(OUTPUT_CHUNK);
            }

            let before = self.inflater.total_in();
            let status = self
                .inflater
                .decompress_vec(
                    &self.buffer[consumed..],
                    &mut self.output,
                    FlushDecompress::Sync,
                )
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            consumed += (self.inflater.total_in() - before) as usize;

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => {
                    // Done once the input is drained and the inflater still
                    // had output room, i.e. it stopped for lack of input.
                    if consumed >= self.buffer.len() && self.output.len() < self.output.capacity() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Reset for a new connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.output.clear();
        self.inflater.reset(true);
    }
}

impl Default for ZlibStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
