//! WAV Debug Sink — per-sample dump files for detector taps
//!
//! Writes a 16-bit mono PCM WAV file one sample at a time, buffering
//! writes. The header goes out once at creation with oversized placeholder
//! chunk sizes and the real sizes are patched in when the dumper is closed
//! or dropped. If the process dies mid-dump the file stays playable up to
//! the placeholder size, which is the point of a debug dump.
//!
//! ## Example
//!
//! ```rust,no_run
//! use keyburst::wav_dump::WavDumper;
//!
//! let mut dump = WavDumper::create("/tmp/am_tap.wav", 250_000, 4096).unwrap();
//! for i in 0..1000 {
//!     dump.write_sample((i % 128) as i16 * 256).unwrap();
//! }
//! dump.close().unwrap();
//! ```

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

// Placeholder chunk size; large enough that a truncated file still plays.
const PLACEHOLDER_SIZE: u32 = 0x0FFF_FFFF;

/// Buffered 16-bit mono PCM WAV writer.
#[derive(Debug)]
pub struct WavDumper {
    file: File,
    buffer: Vec<i16>,
    buffer_size: usize,
    samples_written: u64,
}

impl WavDumper {
    /// Create the file and write the header with placeholder sizes.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, buffer_size: usize) -> io::Result<Self> {
        let mut file = File::create(path)?;
        let buffer_size = buffer_size.max(1);

        file.write_all(b"RIFF")?;
        file.write_all(&PLACEHOLDER_SIZE.to_le_bytes())?;
        file.write_all(b"WAVE")?;

        file.write_all(b"fmt ")?;
        file.write_all(&16u32.to_le_bytes())?;
        file.write_all(&1u16.to_le_bytes())?; // PCM
        file.write_all(&1u16.to_le_bytes())?; // mono
        file.write_all(&sample_rate.to_le_bytes())?;
        file.write_all(&(sample_rate * 2).to_le_bytes())?; // byte rate
        file.write_all(&2u16.to_le_bytes())?; // block align
        file.write_all(&16u16.to_le_bytes())?; // bits per sample

        file.write_all(b"data")?;
        file.write_all(&PLACEHOLDER_SIZE.to_le_bytes())?;

        Ok(Self {
            file,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            samples_written: 0,
        })
    }

    /// Append one sample, flushing the internal buffer when it fills.
    pub fn write_sample(&mut self, sample: i16) -> io::Result<()> {
        self.buffer.push(sample);
        self.samples_written += 1;
        if self.buffer.len() >= self.buffer_size {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Total samples accepted so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Flush pending samples and patch the real chunk sizes into the header.
    pub fn close(mut self) -> io::Result<()> {
        self.finalize()
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut bytes = Vec::with_capacity(self.buffer.len() * 2);
        for &sample in &self.buffer {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.file.write_all(&bytes)?;
        self.buffer.clear();
        Ok(())
    }

    fn finalize(&mut self) -> io::Result<()> {
        self.flush_buffer()?;

        let data_size = (self.samples_written * 2) as u32;
        self.file.seek(SeekFrom::Start(4))?;
        self.file.write_all(&(36 + data_size).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(40))?;
        self.file.write_all(&data_size.to_le_bytes())?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.flush()
    }
}

impl Drop for WavDumper {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}
