use log::{debug, trace};
use std::io::{ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};

use super::config::TarConfig;
use super::error::{Result, TarError};

/// Moves the stream forward by `len` bytes, `Ok(false)` when it is shorter.
type SeekFn<S> = fn(&mut S, u64) -> IoResult<bool>;

/// Writes one (possibly empty) block and flushes the stream.
type FlushFn<S> = fn(&mut S, &[u8]) -> IoResult<()>;

fn seek_forward<S: Seek>(stream: &mut S, len: u64) -> IoResult<bool> {
    let pos = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    if end.saturating_sub(pos) < len {
        stream.seek(SeekFrom::Start(end))?;
        return Ok(false);
    }
    stream.seek(SeekFrom::Start(pos + len))?;
    Ok(true)
}

fn write_block<S: Write>(stream: &mut S, block: &[u8]) -> IoResult<()> {
    stream.write_all(block)?;
    stream.flush()
}

/// Turns a byte stream into fixed-size record transfers batched in blocks.
///
/// The buffer owns the stream and exactly one block-sized buffer, allocated
/// at construction and never resized. Reads hand out slices into that block;
/// writes copy into it and go to the stream a block at a time.
pub struct RecordBuffer<S> {
    stream: Option<S>,
    block: Vec<u8>,
    record_size: usize,
    block_size: usize,
    records_per_block: usize,
    /// Record index inside the loaded block.
    cursor: usize,
    /// Valid bytes in the loaded block, reading only.
    filled: usize,
    /// The stream returned less than a full block.
    exhausted: bool,
    /// Records read, skipped or written since the start.
    records: u64,
    seek: Option<SeekFn<S>>,
    flush: Option<FlushFn<S>>,
}

impl<S> RecordBuffer<S> {
    fn new(stream: S, config: &TarConfig, reading: bool) -> Result<Self> {
        config.validate()?;
        let records_per_block = config.records_per_block();
        Ok(Self {
            stream: Some(stream),
            block: vec![0u8; config.block_size],
            record_size: config.record_size,
            block_size: config.block_size,
            records_per_block,
            cursor: if reading { records_per_block } else { 0 },
            filled: 0,
            exhausted: false,
            records: 0,
            seek: None,
            flush: None,
        })
    }

    /// True iff every byte of the record is zero.
    pub fn is_eof_record(record: &[u8]) -> bool {
        record.iter().all(|b| *b == 0)
    }

    /// Index of the block the next record belongs to.
    pub fn current_block(&self) -> u64 {
        self.records / self.records_per_block as u64
    }

    /// Index of the next record inside its block.
    pub fn current_record(&self) -> usize {
        (self.records % self.records_per_block as u64) as usize
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn records_per_block(&self) -> usize {
        self.records_per_block
    }

    /// Archive byte offset of the next record.
    pub fn position(&self) -> u64 {
        self.records * self.record_size as u64
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(TarError::Closed)
    }

    /// Flushes a pending partial block (writers) and hands the stream back.
    ///
    /// The stream and the block memory are released even when the flush
    /// fails. Later calls return `Ok(None)`.
    pub fn take(&mut self) -> Result<Option<S>> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(None);
        };
        let mut block = std::mem::take(&mut self.block);
        if let Some(flush) = self.flush {
            let len = if self.cursor > 0 { self.block_size } else { 0 };
            if len > 0 {
                debug!("flushing partial block {} ({} records)", self.current_block(), self.cursor);
            }
            block[self.cursor * self.record_size..].fill(0);
            flush(&mut stream, &block[..len])?;
            self.cursor = 0;
        }
        Ok(Some(stream))
    }

    /// Releases the stream and the block memory without flushing anything.
    pub fn abandon(&mut self) {
        if self.stream.take().is_some() {
            debug!("abandoned stream at block {}", self.current_block());
        }
        self.block = Vec::new();
        self.cursor = 0;
    }

    /// Flushes a pending partial block (writers) and releases the stream.
    /// Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.take().map(drop)
    }
}

impl<R: Read> RecordBuffer<R> {
    /// Buffer over a sequential stream; block skips discard through the
    /// internal block.
    pub fn reader(stream: R, config: &TarConfig) -> Result<Self> {
        Self::new(stream, config, true)
    }

    /// Buffer over a seekable stream; block skips seek past the data.
    pub fn seekable_reader(stream: R, config: &TarConfig) -> Result<Self>
    where
        R: Seek,
    {
        let mut buffer = Self::new(stream, config, true)?;
        buffer.seek = Some(seek_forward::<R>);
        Ok(buffer)
    }

    /// Loads the next block, tolerating a short final block.
    fn fill_block(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TarError::Closed)?;
        let mut filled = 0;
        while filled < self.block.len() {
            match stream.read(&mut self.block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled < self.block_size {
            trace!("short block of {} bytes at block {}", filled, self.current_block());
            self.exhausted = true;
        }
        self.filled = filled;
        self.cursor = 0;
        Ok(())
    }

    /// Start offset of the next record inside the block, `None` on a clean
    /// end of the stream.
    fn next_record(&mut self) -> Result<Option<usize>> {
        if self.stream.is_none() {
            return Err(TarError::Closed);
        }
        if self.cursor >= self.records_per_block {
            if self.exhausted {
                return Ok(None);
            }
            self.fill_block()?;
        }
        let start = self.cursor * self.record_size;
        if start >= self.filled {
            return Ok(None);
        }
        if self.filled - start < self.record_size {
            return Err(TarError::UnexpectedEndOfArchive);
        }
        self.cursor += 1;
        self.records += 1;
        Ok(Some(start))
    }

    /// Reads one record.
    ///
    /// # Returns
    /// * `Ok(Some(record))` - A whole record.
    /// * `Ok(None)` - The stream ended cleanly before this record.
    /// * `Err(UnexpectedEndOfArchive)` - The stream ended inside the record.
    pub fn read_record(&mut self) -> Result<Option<&[u8]>> {
        match self.next_record()? {
            Some(start) => Ok(Some(&self.block[start..start + self.record_size])),
            None => Ok(None),
        }
    }

    /// Skips one record, `false` when the stream has no more.
    pub fn skip_record(&mut self) -> Result<bool> {
        Ok(self.next_record()?.is_some())
    }

    /// Skips one block worth of records, `false` when the stream is short.
    ///
    /// At a block boundary the bytes never enter the block buffer on a
    /// seekable stream. Off a boundary this falls back to record skips.
    pub fn skip_block(&mut self) -> Result<bool> {
        if self.cursor < self.records_per_block {
            for _ in 0..self.records_per_block {
                if !self.skip_record()? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        self.skip_blocks(1)
    }

    /// Skips `blocks` whole blocks from a block boundary. A seekable stream
    /// moves over the whole run in one seek.
    fn skip_blocks(&mut self, blocks: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let per_block = self.records_per_block as u64;
        match self.seek {
            Some(seek) => {
                let len = blocks.saturating_mul(self.block_size as u64);
                if !seek(self.stream_mut()?, len)? {
                    self.exhausted = true;
                    return Ok(false);
                }
                self.records += blocks * per_block;
            }
            None => {
                for _ in 0..blocks {
                    self.fill_block()?;
                    // nothing in the discarded block is readable anymore
                    self.cursor = self.records_per_block;
                    if self.filled < self.block_size {
                        return Ok(false);
                    }
                    self.records += per_block;
                }
            }
        }
        trace!("skipped {} blocks, now at block {}", blocks, self.current_block());
        Ok(true)
    }

    /// Skips `count` records, taking whole blocks where aligned.
    pub fn skip_records(&mut self, mut count: u64) -> Result<bool> {
        let per_block = self.records_per_block as u64;
        while count > 0 {
            let aligned = self.cursor >= self.records_per_block;
            if aligned && count >= per_block {
                if !self.skip_blocks(count / per_block)? {
                    return Ok(false);
                }
                count %= per_block;
            } else {
                if !self.skip_record()? {
                    return Ok(false);
                }
                count -= 1;
            }
        }
        Ok(true)
    }
}

impl<W: Write> RecordBuffer<W> {
    /// Buffer that writes to the stream a block at a time.
    pub fn writer(stream: W, config: &TarConfig) -> Result<Self> {
        let mut buffer = Self::new(stream, config, false)?;
        buffer.flush = Some(write_block::<W>);
        Ok(buffer)
    }

    /// Buffers one record, writing the block once it is full.
    pub fn write_record(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            return Err(TarError::RecordSize { expected: self.record_size, actual: record.len() });
        }
        let start = self.claim_record()?;
        self.block[start..start + self.record_size].copy_from_slice(record);
        self.commit_record()
    }

    /// Buffers one all-zero record.
    pub fn write_zero_record(&mut self) -> Result<()> {
        let start = self.claim_record()?;
        self.block[start..start + self.record_size].fill(0);
        self.commit_record()
    }

    fn claim_record(&self) -> Result<usize> {
        if self.stream.is_none() {
            return Err(TarError::Closed);
        }
        Ok(self.cursor * self.record_size)
    }

    fn commit_record(&mut self) -> Result<()> {
        self.cursor += 1;
        self.records += 1;
        if self.cursor == self.records_per_block {
            let stream = self.stream.as_mut().ok_or(TarError::Closed)?;
            stream.write_all(&self.block)?;
            self.cursor = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn small_config() -> TarConfig {
        TarConfig::default().with_blocking_factor(4)
    }

    /// Records numbered by their first byte.
    fn numbered(records: usize) -> Vec<u8> {
        let mut data = vec![0u8; records * 512];
        for (i, chunk) in data.chunks_mut(512).enumerate() {
            chunk.fill(i as u8 + 1);
        }
        data
    }

    /// A reader that only offers a few bytes per call.
    struct Trickle<R>(R);

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
            let len = buf.len().min(7);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn reads_records_across_blocks() {
        let data = numbered(8);
        let mut buffer = RecordBuffer::reader(Cursor::new(data), &small_config()).unwrap();
        for i in 0..8u8 {
            assert_eq!(buffer.current_block(), i as u64 / 4);
            assert_eq!(buffer.current_record(), i as usize % 4);
            let record = buffer.read_record().unwrap().unwrap();
            assert_eq!(record.len(), 512);
            assert!(record.iter().all(|b| *b == i + 1));
        }
        assert!(buffer.read_record().unwrap().is_none());
        assert!(buffer.read_record().unwrap().is_none());
    }

    #[test]
    fn accepts_short_final_block_on_record_boundary() {
        let data = numbered(6);
        let mut buffer = RecordBuffer::reader(Trickle(Cursor::new(data)), &small_config()).unwrap();
        for _ in 0..6 {
            assert!(buffer.read_record().unwrap().is_some());
        }
        assert!(buffer.read_record().unwrap().is_none());
        assert_eq!(buffer.position(), 6 * 512);
    }

    #[test]
    fn partial_record_is_corruption() {
        let mut data = numbered(2);
        data.truncate(700);
        let mut buffer = RecordBuffer::reader(Cursor::new(data), &small_config()).unwrap();
        assert!(buffer.read_record().unwrap().is_some());
        assert!(matches!(buffer.read_record(), Err(TarError::UnexpectedEndOfArchive)));
    }

    #[test]
    fn empty_stream_is_clean_eof() {
        let mut buffer = RecordBuffer::reader(Cursor::new(Vec::new()), &small_config()).unwrap();
        assert!(buffer.read_record().unwrap().is_none());
    }

    #[test]
    fn skip_block_discards_and_seeks() {
        for seekable in [false, true] {
            let data = numbered(12);
            let config = small_config();
            let mut buffer = if seekable {
                RecordBuffer::seekable_reader(Cursor::new(data), &config).unwrap()
            } else {
                RecordBuffer::reader(Cursor::new(data), &config).unwrap()
            };
            assert!(buffer.skip_block().unwrap());
            assert_eq!(buffer.current_block(), 1);
            assert_eq!(buffer.read_record().unwrap().unwrap()[0], 5);
            // off a boundary a block skip still moves exactly one block worth
            assert!(buffer.skip_block().unwrap());
            assert_eq!(buffer.read_record().unwrap().unwrap()[0], 10);
            assert!(!buffer.skip_block().unwrap());
        }
    }

    #[test]
    fn skip_block_past_end_fails() {
        let data = numbered(6);
        let mut buffer = RecordBuffer::seekable_reader(Cursor::new(data), &small_config()).unwrap();
        assert!(buffer.skip_block().unwrap());
        assert!(!buffer.skip_block().unwrap());
    }

    #[test]
    fn skip_records_mixes_blocks_and_records() {
        let data = numbered(13);
        let mut buffer = RecordBuffer::seekable_reader(Cursor::new(data), &small_config()).unwrap();
        assert!(buffer.skip_record().unwrap());
        assert!(buffer.skip_records(10).unwrap());
        assert_eq!(buffer.read_record().unwrap().unwrap()[0], 12);
        assert!(!buffer.skip_records(3).unwrap());
    }

    /// A cursor that counts the seeks made on it.
    struct CountingSeeks {
        inner: Cursor<Vec<u8>>,
        seeks: usize,
    }

    impl Read for CountingSeeks {
        fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for CountingSeeks {
        fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
            self.seeks += 1;
            self.inner.seek(pos)
        }
    }

    #[test]
    fn long_skip_seeks_once_per_run() {
        let stream = CountingSeeks { inner: Cursor::new(numbered(43)), seeks: 0 };
        let mut buffer = RecordBuffer::seekable_reader(stream, &small_config()).unwrap();
        assert!(buffer.skip_records(41).unwrap());
        assert_eq!(buffer.position(), 41 * 512);
        assert_eq!(buffer.read_record().unwrap().unwrap()[0], 42);
        let stream = buffer.take().unwrap().unwrap();
        assert_eq!(stream.seeks, 3);
    }

    #[test]
    fn long_skip_past_end_fails() {
        let stream = CountingSeeks { inner: Cursor::new(numbered(30)), seeks: 0 };
        let mut buffer = RecordBuffer::seekable_reader(stream, &small_config()).unwrap();
        assert!(!buffer.skip_records(40).unwrap());
        assert!(buffer.read_record().unwrap().is_none());
    }

    #[test]
    fn abandon_writes_nothing() {
        let mut out = Vec::new();
        {
            let mut buffer = RecordBuffer::writer(&mut out, &small_config()).unwrap();
            buffer.write_record(&[1; 512]).unwrap();
            buffer.abandon();
            assert!(buffer.is_closed());
            buffer.close().unwrap();
            assert!(matches!(buffer.write_zero_record(), Err(TarError::Closed)));
        }
        assert!(out.is_empty());
    }

    #[test]
    fn writes_full_blocks_and_pads_on_close() {
        let mut out = Vec::new();
        {
            let mut buffer = RecordBuffer::writer(&mut out, &small_config()).unwrap();
            for i in 0..5u8 {
                buffer.write_record(&[i + 1; 512]).unwrap();
            }
            assert_eq!(buffer.current_block(), 1);
            assert_eq!(buffer.current_record(), 1);
            buffer.close().unwrap();
            buffer.close().unwrap();
            assert!(buffer.is_closed());
            assert!(matches!(buffer.write_record(&[0; 512]), Err(TarError::Closed)));
        }
        assert_eq!(out.len(), 2 * 2048);
        assert_eq!(out[4 * 512], 5);
        assert!(out[5 * 512..].iter().all(|b| *b == 0));
    }

    #[test]
    fn rejects_wrong_record_length() {
        let mut buffer = RecordBuffer::writer(Vec::new(), &small_config()).unwrap();
        assert!(matches!(
            buffer.write_record(&[0; 100]),
            Err(TarError::RecordSize { expected: 512, actual: 100 })
        ));
    }

    #[test]
    fn take_returns_flushed_stream() {
        let mut buffer = RecordBuffer::writer(Vec::new(), &small_config()).unwrap();
        buffer.write_zero_record().unwrap();
        let out = buffer.take().unwrap().unwrap();
        assert_eq!(out.len(), 2048);
        assert!(buffer.take().unwrap().is_none());
    }

    #[test]
    fn eof_record_detection() {
        assert!(RecordBuffer::<Cursor<Vec<u8>>>::is_eof_record(&[0u8; 512]));
        let mut record = [0u8; 512];
        record[511] = 1;
        assert!(!RecordBuffer::<Cursor<Vec<u8>>>::is_eof_record(&record));
    }
}
