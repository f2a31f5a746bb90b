//! Where extracted records go.

use crate::paginate::OfferRecord;
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Receives records in the order they are extracted.
pub trait RecordSink {
    fn emit(&mut self, record: &OfferRecord) -> Result<()>;
}

impl RecordSink for Vec<OfferRecord> {
    fn emit(&mut self, record: &OfferRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// One JSON object per line. Each line is flushed as it is written so an
/// aborted run keeps everything extracted so far.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlSink {
    /// Truncate `path` (creating parent directories) and write to it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), false)
    }

    /// Append to `path`.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), true)
    }

    fn open(path: &Path, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written through this sink.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl RecordSink for JsonlSink {
    fn emit(&mut self, record: &OfferRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        debug!("wrote record {} to {}", self.written, self.path.display());
        Ok(())
    }
}
