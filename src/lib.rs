//! Streaming reader and writer for POSIX/GNU tar archives.
//!
//! Archives are moved through a [`RecordBuffer`] a block at a time and
//! presented as a sequence of entries whose content is read or written
//! through bounded streams.
//!
//! ```no_run
//! use std::io::Read;
//! use tarstream::{ArchiveReader, ArchiveWriter, Entry};
//!
//! # fn main() -> tarstream::Result<()> {
//! let mut writer = ArchiveWriter::new(Vec::new())?;
//! writer.put_next_entry(&Entry::file("a.txt", 3))?;
//! writer.write_content(b"xyz")?;
//! let archive = writer.into_inner()?;
//!
//! let mut reader = ArchiveReader::new(archive.as_slice())?;
//! while let Some(entry) = reader.next_entry()? {
//!     let mut content = Vec::new();
//!     reader.read_to_end(&mut content)?;
//!     println!("{} {}", entry.name, content.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;

pub use engine::{
    buffer::RecordBuffer,
    config::{LongNameMode, TarConfig},
    entry::{Entry, EntryType},
    error::{Result, TarError},
    header::{HeaderFormat, IsTypeTrait},
    reader::{ArchiveReader, Entries},
    writer::ArchiveWriter,
};
