//! JSON-lines measurement sink.

use std::io::Write;

use bodyscale_core::ScaleMeasurement;

/// Writes one JSON object per line and flushes after each.
#[derive(Debug)]
pub struct JsonLines<W> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLines<W> {
    /// Wrap `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Serialise `measurement` as one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub fn write(&mut self, measurement: &ScaleMeasurement) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, measurement)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Lines written so far.
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
