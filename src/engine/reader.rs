use log::{debug, warn};
use std::io::{Read, Result as IoResult, Seek};

use super::buffer::RecordBuffer;
use super::config::TarConfig;
use super::entry::{Entry, EntryType};
use super::error::{Result, TarError};
use super::header;

/// Upper bound on the content of a GNU long name or long link marker.
const LONG_NAME_MAX: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    BeforeFirstEntry,
    /// An entry header was read; its content may be partly consumed.
    InEntry,
    AtEof,
}

/// Sequential reader over the entries of a tar archive.
///
/// Content reads are bounded by the current entry's size: padding and the
/// next header are never handed out.
pub struct ArchiveReader<R> {
    buffer: RecordBuffer<R>,
    config: TarConfig,
    state: ReaderState,
    /// Content bytes of the current entry not yet returned to the caller.
    remaining: u64,
    /// Content bytes of the current entry not yet pulled from the buffer.
    unpulled: u64,
    /// Content pulled from the buffer but not yet returned.
    leftover: Vec<u8>,
    leftover_pos: usize,
}

impl<R: Read> ArchiveReader<R> {
    /// Creates a reader with the default geometry.
    pub fn new(stream: R) -> Result<Self> {
        Self::with_config(stream, TarConfig::default())
    }

    pub fn with_config(stream: R, config: TarConfig) -> Result<Self> {
        let buffer = RecordBuffer::reader(stream, &config)?;
        Ok(Self::from_buffer(buffer, config))
    }

    /// Creates a reader that seeks over skipped blocks instead of reading
    /// them.
    pub fn seekable(stream: R, config: TarConfig) -> Result<Self>
    where
        R: Seek,
    {
        let buffer = RecordBuffer::seekable_reader(stream, &config)?;
        Ok(Self::from_buffer(buffer, config))
    }

    fn from_buffer(buffer: RecordBuffer<R>, config: TarConfig) -> Self {
        let leftover = Vec::with_capacity(config.record_size);
        Self {
            buffer,
            config,
            state: ReaderState::BeforeFirstEntry,
            remaining: 0,
            unpulled: 0,
            leftover,
            leftover_pos: 0,
        }
    }

    pub fn config(&self) -> &TarConfig {
        &self.config
    }

    /// Advances to the next entry.
    ///
    /// Unread content of the previous entry is skipped. GNU long name and
    /// long link markers are folded into the entry that follows them.
    ///
    /// # Returns
    /// * `Ok(Some(entry))` - The next entry, ready for content reads.
    /// * `Ok(None)` - End of archive; every later call returns `None` too.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.state == ReaderState::AtEof {
            return Ok(None);
        }
        self.skip_remainder()?;

        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;
        loop {
            let offset = self.buffer.position();
            let decoded = match self.buffer.read_record()? {
                Some(record) if !RecordBuffer::<R>::is_eof_record(record) => Some(header::decode(record)?),
                _ => None,
            };
            let Some(mut entry) = decoded else {
                self.state = ReaderState::AtEof;
                self.start_content(0);
                if long_name.is_some() || long_link.is_some() {
                    warn!("long name marker at the end of the archive has no entry");
                    if self.config.strict_long_names {
                        return Err(TarError::MalformedLongNameSequence);
                    }
                }
                debug!("end of archive at offset {}", offset);
                return Ok(None);
            };
            entry.offset = offset;
            self.start_content(entry.size);
            self.state = ReaderState::InEntry;

            match entry.entry_type {
                EntryType::GnuLongName => long_name = Some(self.read_long_value(entry.size)?),
                EntryType::GnuLongLink => long_link = Some(self.read_long_value(entry.size)?),
                _ => {
                    if let Some(name) = long_name {
                        entry.name = name;
                    }
                    if let Some(link) = long_link {
                        entry.link_name = link;
                    }
                    debug!("entry {:?} ({} bytes) at offset {}", entry.name, entry.size, entry.offset);
                    return Ok(Some(entry));
                }
            }
        }
    }

    /// Reads the content of a long name marker, minus one trailing NUL.
    fn read_long_value(&mut self, size: u64) -> Result<String> {
        if size > LONG_NAME_MAX {
            return Err(TarError::CorruptHeader(format!("long name of {} bytes", size)));
        }
        let mut value = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < value.len() {
            let n = self.read_content(&mut value[filled..])?;
            if n == 0 {
                return Err(TarError::UnexpectedEndOfArchive);
            }
            filled += n;
        }
        self.skip_remainder()?;
        if value.last() == Some(&0) {
            value.pop();
        }
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    fn start_content(&mut self, size: u64) {
        self.remaining = size;
        self.unpulled = size;
        self.leftover.clear();
        self.leftover_pos = 0;
    }

    /// Drops the unread content and padding of the current entry.
    fn skip_remainder(&mut self) -> Result<()> {
        let records = self.unpulled.div_ceil(self.config.record_size as u64);
        self.start_content(0);
        if records > 0 && !self.buffer.skip_records(records)? {
            return Err(TarError::UnexpectedEndOfArchive);
        }
        Ok(())
    }

    /// Pulls the next content record into `leftover`.
    fn pull_record(&mut self) -> Result<()> {
        let record = self.buffer.read_record()?.ok_or(TarError::UnexpectedEndOfArchive)?;
        let len = self.unpulled.min(record.len() as u64) as usize;
        self.leftover.clear();
        self.leftover.extend_from_slice(&record[..len]);
        self.leftover_pos = 0;
        self.unpulled -= len as u64;
        Ok(())
    }

    /// Reads content of the current entry into `buf`.
    ///
    /// # Returns
    /// * `Ok(0)` - The entry is exhausted (or `buf` is empty).
    /// * `Ok(n)` - `n` bytes, never more than the entry has left.
    /// * `Err(UnexpectedEndOfArchive)` - The archive ended inside the entry.
    pub fn read_content(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() && self.remaining > 0 {
            if self.leftover_pos == self.leftover.len() {
                self.pull_record()?;
            }
            let available = &self.leftover[self.leftover_pos..];
            let n = available.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&available[..n]);
            self.leftover_pos += n;
            self.remaining -= n as u64;
            written += n;
        }
        Ok(written)
    }

    /// Skips up to `n` content bytes of the current entry.
    ///
    /// Whole records are dropped through the buffer's skip path without
    /// being copied.
    ///
    /// # Returns
    /// * `Ok(skipped)` - Bytes skipped, clamped to what the entry has left.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let n = n.min(self.remaining);
        let buffered = (self.leftover.len() - self.leftover_pos) as u64;
        let from_leftover = n.min(buffered);
        self.leftover_pos += from_leftover as usize;
        self.remaining -= from_leftover;

        let mut rest = n - from_leftover;
        let record_size = self.config.record_size as u64;
        let whole = rest / record_size;
        if whole > 0 {
            if !self.buffer.skip_records(whole)? {
                return Err(TarError::UnexpectedEndOfArchive);
            }
            self.unpulled -= whole * record_size;
            self.remaining -= whole * record_size;
            rest -= whole * record_size;
        }
        if rest > 0 {
            self.pull_record()?;
            self.leftover_pos = rest as usize;
            self.remaining -= rest;
        }
        Ok(n)
    }

    /// Content bytes left in the current entry, saturated to `usize::MAX`.
    pub fn available(&self) -> usize {
        usize::try_from(self.remaining).unwrap_or(usize::MAX)
    }

    /// Position of the next record in the archive.
    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    /// Iterates the remaining entries.
    ///
    /// Content can not be read through the iterator; use `next_entry` for
    /// that.
    pub fn entries(&mut self) -> Entries<'_, R> {
        Entries { reader: self, done: false }
    }
}

impl<R> ArchiveReader<R> {
    /// Releases the underlying stream. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.state = ReaderState::AtEof;
        self.remaining = 0;
        self.unpulled = 0;
        self.leftover = Vec::new();
        self.leftover_pos = 0;
        self.buffer.close()
    }
}

impl<R: Read> Read for ArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        Ok(self.read_content(buf)?)
    }
}

/// Iterator over archive entries, see `ArchiveReader::entries`.
pub struct Entries<'a, R> {
    reader: &'a mut ArchiveReader<R>,
    done: bool,
}

impl<R: Read> Iterator for Entries<'_, R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::header::{GNU_LONG_LINK_NAME, encode};
    use std::io::Cursor;

    /// Builds an archive by hand: header records, content, padding and the
    /// end marker.
    fn archive(entries: &[(Entry, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (entry, content) in entries {
            let mut record = [0u8; 512];
            encode(entry, &mut record).unwrap();
            out.extend_from_slice(&record);
            out.extend_from_slice(content);
            let pad = (512 - content.len() % 512) % 512;
            out.extend(std::iter::repeat_n(0u8, pad));
        }
        out.extend_from_slice(&[0u8; 1024]);
        out
    }

    fn long_name_pair(name: &str, content: &[u8]) -> Vec<(Entry, Vec<u8>)> {
        let mut marker = Entry::new(GNU_LONG_LINK_NAME, EntryType::GnuLongName);
        marker.size = name.len() as u64 + 1;
        let mut value = name.as_bytes().to_vec();
        value.push(0);
        vec![
            (marker, value),
            (Entry::file(&name[..100], content.len() as u64), content.to_vec()),
        ]
    }

    #[test]
    fn reads_single_entry() {
        let data = archive(&[(Entry::file("a.txt", 3), b"xyz".to_vec())]);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "a.txt");
        assert_eq!(entry.size, 3);
        assert_eq!(entry.offset, 0);
        assert_eq!(reader.available(), 3);
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "xyz");
        assert_eq!(reader.available(), 0);
        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn empty_entry_reads_eof_immediately() {
        let data = archive(&[(Entry::file("empty", 0), Vec::new()), (Entry::file("b", 1), b"b".to_vec())]);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(reader.read_content(&mut buf).unwrap(), 0);
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "b");
        assert_eq!(entry.offset, 512);
    }

    #[test]
    fn reads_never_cross_entry_bounds() {
        let data = archive(&[(Entry::file("a", 5), b"hello".to_vec()), (Entry::file("b", 2), b"hi".to_vec())]);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut buf = [0xffu8; 4096];
        assert_eq!(reader.read_content(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(buf[5], 0xff);
        assert_eq!(reader.read_content(&mut buf).unwrap(), 0);
    }

    #[test]
    fn partial_reads_span_records() {
        let content: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let data = archive(&[(Entry::file("data", content.len() as u64), content.clone())]);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 77];
        loop {
            let n = reader.read_content(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, content);
    }

    #[test]
    fn skip_is_clamped_and_lands_on_next_header() {
        let data = archive(&[
            (Entry::file("big", 3000), vec![7u8; 3000]),
            (Entry::file("next", 4), b"next".to_vec()),
        ]);
        let config = TarConfig::default().with_blocking_factor(2);
        let mut reader = ArchiveReader::seekable(Cursor::new(data), config).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(reader.read_content(&mut buf).unwrap(), 10);
        assert_eq!(reader.skip(1100).unwrap(), 1100);
        assert_eq!(reader.available(), 1890);
        assert_eq!(reader.read_content(&mut buf[..1]).unwrap(), 1);
        assert_eq!(reader.skip(u64::MAX).unwrap(), 1889);
        assert_eq!(reader.skip(10).unwrap(), 0);
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "next");
        assert_eq!(entry.offset, 512 + 3072);
    }

    #[test]
    fn unread_entries_are_skipped() {
        let data = archive(&[
            (Entry::file("one", 700), vec![1u8; 700]),
            (Entry::file("two", 10), b"0123456789".to_vec()),
            (Entry::file("three", 1), b"3".to_vec()),
        ]);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        let names: Vec<String> = reader.entries().map(|e| e.unwrap().name).collect();
        assert_eq!(names, ["one", "two", "three"]);
    }

    #[test]
    fn long_name_is_folded_into_entry() {
        let name = format!("dir/{}", "n".repeat(296));
        let data = archive(&long_name_pair(&name, b"abc"));
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, name);
        assert_eq!(entry.entry_type, EntryType::Normal);
        assert_eq!(entry.offset, 1024);
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"abc");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn dangling_long_name_ends_iteration() {
        let mut pair = long_name_pair(&"x".repeat(150), b"");
        pair.truncate(1);
        let data = archive(&pair);
        let mut reader = ArchiveReader::new(Cursor::new(data.clone())).unwrap();
        assert!(reader.next_entry().unwrap().is_none());

        let config = TarConfig::default().with_strict_long_names(true);
        let mut reader = ArchiveReader::with_config(Cursor::new(data), config).unwrap();
        assert!(matches!(reader.next_entry(), Err(TarError::MalformedLongNameSequence)));
    }

    #[test]
    fn truncated_content_is_unexpected_end() {
        let mut data = archive(&[(Entry::file("a", 2000), vec![1u8; 2000])]);
        data.truncate(512 + 1024);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut buf = vec![0u8; 4096];
        assert!(matches!(reader.read_content(&mut buf), Err(TarError::UnexpectedEndOfArchive)));
    }

    #[test]
    fn truncated_skip_is_unexpected_end() {
        let mut data = archive(&[(Entry::file("a", 2000), vec![1u8; 2000])]);
        data.truncate(512 + 1024);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        reader.next_entry().unwrap().unwrap();
        assert!(matches!(reader.next_entry(), Err(TarError::UnexpectedEndOfArchive)));
    }

    #[test]
    fn stream_ending_without_marker_is_clean() {
        let mut data = archive(&[(Entry::file("a", 1), b"a".to_vec())]);
        data.truncate(1024);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        assert!(reader.next_entry().unwrap().is_some());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn corrupt_header_is_reported() {
        let mut data = archive(&[(Entry::file("a", 1), b"a".to_vec())]);
        data[3] ^= 0x20;
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        assert!(matches!(reader.next_entry(), Err(TarError::CorruptHeader(_))));
    }

    #[test]
    fn close_is_idempotent() {
        let data = archive(&[(Entry::file("a", 1), b"a".to_vec())]);
        let mut reader = ArchiveReader::new(Cursor::new(data)).unwrap();
        reader.next_entry().unwrap().unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        assert!(reader.next_entry().unwrap().is_none());
        assert_eq!(reader.available(), 0);
    }
}
