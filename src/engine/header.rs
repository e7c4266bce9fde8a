pub mod helper;
mod traits;

pub use traits::IsTypeTrait;

use log::trace;
use std::ops::Range;

use super::HEADER_SIZE;
use super::entry::{Entry, EntryType};
use super::error::{Result, TarError};
use helper::*;

/// Width of the name and link name fields.
pub const NAME_FIELD_LEN: usize = 100;

/// Name GNU tar gives long name and long link marker entries.
pub const GNU_LONG_LINK_NAME: &str = "././@LongLink";

const NAME: Range<usize> = 0..100;
const MODE: Range<usize> = 100..108;
const UID: Range<usize> = 108..116;
const GID: Range<usize> = 116..124;
const SIZE: Range<usize> = 124..136;
const MTIME: Range<usize> = 136..148;
const CHKSUM: Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const LINKNAME: Range<usize> = 157..257;
const MAGIC: Range<usize> = 257..263;
const VERSION: Range<usize> = 263..265;
const UNAME: Range<usize> = 265..297;
const GNAME: Range<usize> = 297..329;
const DEVMAJOR: Range<usize> = 329..337;
const DEVMINOR: Range<usize> = 337..345;
const PREFIX: Range<usize> = 345..500;

const GNU_MAGIC: &[u8; 6] = b"ustar ";
const GNU_VERSION: &[u8; 2] = b" \0";
const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
const USTAR_VERSION: &[u8; 2] = b"00";

/// Header layout, told apart by magic and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    /// GNU tar: no prefix field, that area holds GNU extensions.
    Gnu,
    /// POSIX ustar: the name is `prefix/name`.
    Ustar,
    /// Pre-POSIX: only the classic fields are meaningful.
    V7,
}

impl HeaderFormat {
    pub fn detect(record: &[u8]) -> Self {
        let magic = &record[MAGIC];
        let version = &record[VERSION];
        if magic == GNU_MAGIC && version == GNU_VERSION {
            Self::Gnu
        } else if magic == USTAR_MAGIC && version == USTAR_VERSION {
            Self::Ustar
        } else {
            Self::V7
        }
    }
}

/// Decodes a header record into an entry.
///
/// The checksum is verified before any field is interpreted.
///
/// # Arguments
/// * `record` - A record of at least 512 bytes, the header occupies its start.
///
/// # Returns
/// * `Ok(Entry)` - The decoded entry, `offset` left at zero.
/// * `Err(CorruptHeader)` - On checksum mismatch or an unparseable field.
pub fn decode(record: &[u8]) -> Result<Entry> {
    if record.len() < HEADER_SIZE {
        return Err(TarError::CorruptHeader(format!("header record of {} bytes", record.len())));
    }
    let buf = &record[..HEADER_SIZE];
    let stored = parse_numeric::<u32>(&buf[CHKSUM], "chksum")?;
    let computed = checksum(buf, CHKSUM);
    if stored != computed {
        return Err(TarError::CorruptHeader(format!(
            "checksum mismatch: stored {}, computed {}",
            stored, computed
        )));
    }

    let format = HeaderFormat::detect(buf);
    let mut entry = Entry {
        name: get_str(&buf[NAME]),
        mode: parse_numeric(&buf[MODE], "mode")?,
        uid: parse_numeric(&buf[UID], "uid")?,
        gid: parse_numeric(&buf[GID], "gid")?,
        size: parse_numeric(&buf[SIZE], "size")?,
        mtime: parse_numeric(&buf[MTIME], "mtime")?,
        entry_type: EntryType::from_flag(buf[TYPEFLAG]),
        link_name: get_str(&buf[LINKNAME]),
        ..Entry::default()
    };
    if format != HeaderFormat::V7 {
        entry.user_name = get_str(&buf[UNAME]);
        entry.group_name = get_str(&buf[GNAME]);
        entry.dev_major = parse_numeric(&buf[DEVMAJOR], "devmajor")?;
        entry.dev_minor = parse_numeric(&buf[DEVMINOR], "devminor")?;
    }
    if format == HeaderFormat::Ustar {
        let prefix = get_str(&buf[PREFIX]);
        if !prefix.is_empty() {
            entry.name = format!("{}/{}", prefix, entry.name);
        }
    }
    trace!("decoded {:?} header for {:?}", format, entry.name);
    Ok(entry)
}

/// Encodes an entry as a GNU header into `record`.
///
/// The whole record is overwritten; the checksum is written last.
///
/// # Returns
/// * `Err(NameTooLong)` - The name or link name exceeds the 100 byte field.
pub fn encode(entry: &Entry, record: &mut [u8]) -> Result<()> {
    if record.len() < HEADER_SIZE {
        return Err(TarError::RecordSize { expected: HEADER_SIZE, actual: record.len() });
    }
    for name in [&entry.name, &entry.link_name] {
        if name.len() > NAME_FIELD_LEN {
            return Err(TarError::NameTooLong { name: name.clone(), limit: NAME_FIELD_LEN });
        }
    }

    record.fill(0);
    let buf = &mut record[..HEADER_SIZE];
    put_str(&mut buf[NAME], &entry.name);
    put_numeric(&mut buf[MODE], entry.mode as u64, "mode")?;
    put_numeric(&mut buf[UID], entry.uid as u64, "uid")?;
    put_numeric(&mut buf[GID], entry.gid as u64, "gid")?;
    put_numeric(&mut buf[SIZE], entry.size, "size")?;
    put_numeric(&mut buf[MTIME], entry.mtime, "mtime")?;
    buf[TYPEFLAG] = entry.entry_type.flag();
    put_str(&mut buf[LINKNAME], &entry.link_name);
    buf[MAGIC].copy_from_slice(GNU_MAGIC);
    buf[VERSION].copy_from_slice(GNU_VERSION);
    put_str(&mut buf[UNAME], &entry.user_name);
    put_str(&mut buf[GNAME], &entry.group_name);
    put_numeric(&mut buf[DEVMAJOR], entry.dev_major as u64, "devmajor")?;
    put_numeric(&mut buf[DEVMINOR], entry.dev_minor as u64, "devminor")?;

    // Compute and write checksum
    let chksum = checksum(buf, CHKSUM);
    let chksum_str = format!("{:06o}\0 ", chksum);
    buf[CHKSUM].copy_from_slice(chksum_str.as_bytes());
    Ok(())
}

/// Header of a GNU long name or long link marker carrying `value`.
pub fn long_name_marker(entry_type: EntryType, value: &str) -> Entry {
    let mut marker = Entry::new(GNU_LONG_LINK_NAME, entry_type);
    marker.mode = 0;
    marker.size = value.len() as u64 + 1;
    marker
}
