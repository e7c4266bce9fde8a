use log::{debug, warn};
use std::io::{Result as IoResult, Write};

use super::buffer::RecordBuffer;
use super::config::{LongNameMode, TarConfig};
use super::entry::{Entry, EntryType};
use super::error::{Result, TarError};
use super::header::{self, NAME_FIELD_LEN, helper::truncate_str};

/// Declared size and progress of the entry being written.
struct OpenEntry {
    name: String,
    size: u64,
    written: u64,
}

/// Sequential writer of tar archives.
///
/// Each entry is announced with `put_next_entry`, followed by exactly
/// `entry.size` bytes of content. Content is padded to the record size and
/// the archive ends with two zero records.
pub struct ArchiveWriter<W: Write> {
    buffer: RecordBuffer<W>,
    config: TarConfig,
    current: Option<OpenEntry>,
    /// Content bytes waiting for a full record.
    fragment: Vec<u8>,
    finished: bool,
    closed: bool,
    /// A header without matching content, or a failed stream write, is in
    /// the archive.
    failed: bool,
}

impl<W: Write> ArchiveWriter<W> {
    /// Creates a writer with the default geometry.
    pub fn new(stream: W) -> Result<Self> {
        Self::with_config(stream, TarConfig::default())
    }

    pub fn with_config(stream: W, config: TarConfig) -> Result<Self> {
        let buffer = RecordBuffer::writer(stream, &config)?;
        let fragment = Vec::with_capacity(config.record_size);
        Ok(Self {
            buffer,
            config,
            current: None,
            fragment,
            finished: false,
            closed: false,
            failed: false,
        })
    }

    pub fn config(&self) -> &TarConfig {
        &self.config
    }

    /// Archive bytes produced so far, pending block data included.
    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    /// Starts a new entry, closing the previous one.
    ///
    /// Names and link names longer than the header field are handled per
    /// `TarConfig::long_names`.
    pub fn put_next_entry(&mut self, entry: &Entry) -> Result<()> {
        self.check_usable()?;
        if self.finished {
            return Err(TarError::Closed);
        }
        self.close_entry()?;

        let start = self.buffer.position();
        let result = self.put_headers(entry);
        if result.is_err() && self.buffer.position() != start {
            // a long name marker went out without its entry
            self.failed = true;
        }
        result
    }

    fn put_headers(&mut self, entry: &Entry) -> Result<()> {
        let mut entry = entry.clone();
        entry.name = self.fit_name(&entry.name, EntryType::GnuLongName)?;
        entry.link_name = self.fit_name(&entry.link_name, EntryType::GnuLongLink)?;
        self.put_header(&entry)
    }

    /// Returns what goes in the header field for `name`, emitting a long
    /// name marker first when needed.
    fn fit_name(&mut self, name: &str, marker_type: EntryType) -> Result<String> {
        if name.len() <= NAME_FIELD_LEN {
            return Ok(name.to_string());
        }
        match self.config.long_names {
            LongNameMode::Reject => {
                Err(TarError::NameTooLong { name: name.to_string(), limit: NAME_FIELD_LEN })
            }
            LongNameMode::Truncate => {
                debug!("truncating {:?} to {} bytes", name, NAME_FIELD_LEN);
                Ok(truncate_str(name, NAME_FIELD_LEN).to_string())
            }
            LongNameMode::Gnu => {
                let marker = header::long_name_marker(marker_type, name);
                self.put_header(&marker)?;
                self.write_content(name.as_bytes())?;
                self.write_content(&[0])?;
                self.close_entry()?;
                Ok(truncate_str(name, NAME_FIELD_LEN).to_string())
            }
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.failed {
            return Err(TarError::Aborted);
        }
        Ok(())
    }

    /// Marks the archive as aborted when a write to it failed.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn put_header(&mut self, entry: &Entry) -> Result<()> {
        let mut record = std::mem::take(&mut self.fragment);
        record.resize(self.config.record_size, 0);
        let written = header::encode(entry, &mut record).map(|_| self.buffer.write_record(&record));
        record.clear();
        self.fragment = record;
        let written = written?;
        self.track(written)?;
        debug!("header {:?} ({} bytes) at offset {}", entry.name, entry.size, self.buffer.position());
        self.current = Some(OpenEntry { name: entry.name.clone(), size: entry.size, written: 0 });
        Ok(())
    }

    /// Writes content of the current entry.
    ///
    /// # Returns
    /// * `Err(SizeOverflow)` - The write would pass the declared size; nothing
    ///   is written.
    pub fn write_content(&mut self, buf: &[u8]) -> Result<()> {
        self.check_usable()?;
        let current = self.current.as_mut().ok_or(TarError::NoCurrentEntry)?;
        let attempted = current.written + buf.len() as u64;
        if attempted > current.size {
            return Err(TarError::SizeOverflow { declared: current.size, attempted });
        }
        current.written = attempted;
        let appended = self.append_content(buf);
        self.track(appended)
    }

    fn append_content(&mut self, mut buf: &[u8]) -> Result<()> {
        let record_size = self.config.record_size;
        if !self.fragment.is_empty() {
            let n = buf.len().min(record_size - self.fragment.len());
            self.fragment.extend_from_slice(&buf[..n]);
            buf = &buf[n..];
            if self.fragment.len() < record_size {
                return Ok(());
            }
            self.buffer.write_record(&self.fragment)?;
            self.fragment.clear();
        }
        while buf.len() >= record_size {
            self.buffer.write_record(&buf[..record_size])?;
            buf = &buf[record_size..];
        }
        self.fragment.extend_from_slice(buf);
        Ok(())
    }

    /// Finishes the current entry, padding its last record. No-op without
    /// an open entry.
    ///
    /// # Returns
    /// * `Err(SizeUnderflow)` - Less content than declared was written. The
    ///   archive is aborted: later calls fail with `Aborted` and closing
    ///   writes no end marker.
    pub fn close_entry(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        if current.written < current.size {
            self.fragment.clear();
            self.failed = true;
            return Err(TarError::SizeUnderflow { declared: current.size, written: current.written });
        }
        if !self.fragment.is_empty() {
            self.fragment.resize(self.config.record_size, 0);
            let padded = self.buffer.write_record(&self.fragment);
            self.fragment.clear();
            self.track(padded)?;
        }
        debug!("closed entry {:?}", current.name);
        Ok(())
    }

    /// Closes the open entry and writes the end of archive marker. The stream
    /// stays open. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.check_usable()?;
        self.close_entry()?;
        let marker = self.buffer.write_zero_record().and_then(|_| self.buffer.write_zero_record());
        self.track(marker)?;
        self.finished = true;
        Ok(())
    }

    /// Finishes the archive and releases the stream. Idempotent; the stream
    /// is released even when finishing fails.
    ///
    /// An aborted archive is released without its pending block or end
    /// marker, and the failure is reported.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let finished = self.finish();
        if self.failed {
            self.buffer.abandon();
            return finished.and(Err(TarError::Aborted));
        }
        let closed = self.buffer.close();
        finished.and(closed)
    }

    /// Finishes the archive and returns the underlying stream.
    pub fn into_inner(mut self) -> Result<W> {
        self.closed = true;
        if let Err(err) = self.finish() {
            self.buffer.abandon();
            return Err(err);
        }
        self.buffer.take()?.ok_or(TarError::Closed)
    }
}

impl<W: Write> Write for ArchiveWriter<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.write_content(buf)?;
        Ok(buf.len())
    }

    /// Whole records are handed to the block buffer; blocks reach the stream
    /// once full or on close.
    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

impl<W: Write> Drop for ArchiveWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                warn!("closing dropped archive writer: {}", err);
            }
        }
    }
}
