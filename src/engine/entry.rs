use log::warn;

use super::header::IsTypeTrait;

/// Entry type, stored as the one byte type flag of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    #[default]
    Normal,
    Link,
    Symlink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
    Contiguous,
    /// GNU marker whose content is the name of the next entry.
    GnuLongName,
    /// GNU marker whose content is the link name of the next entry.
    GnuLongLink,
}

impl EntryType {
    /// Maps a type flag to an entry type.
    ///
    /// Legacy `\0` and unknown flags (PAX headers included) read as normal
    /// files, the way other tools treat them.
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            b'0' | b'\0' => Self::Normal,
            b'1' => Self::Link,
            b'2' => Self::Symlink,
            b'3' => Self::CharDevice,
            b'4' => Self::BlockDevice,
            b'5' => Self::Directory,
            b'6' => Self::Fifo,
            b'7' => Self::Contiguous,
            b'L' => Self::GnuLongName,
            b'K' => Self::GnuLongLink,
            other => {
                warn!("unknown type flag {:?}, reading entry as a normal file", other as char);
                Self::Normal
            }
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            Self::Normal => b'0',
            Self::Link => b'1',
            Self::Symlink => b'2',
            Self::CharDevice => b'3',
            Self::BlockDevice => b'4',
            Self::Directory => b'5',
            Self::Fifo => b'6',
            Self::Contiguous => b'7',
            Self::GnuLongName => b'L',
            Self::GnuLongLink => b'K',
        }
    }
}

impl IsTypeTrait for EntryType {
    fn is_regular_file(&self) -> bool {
        matches!(self, Self::Normal | Self::Contiguous)
    }

    fn is_hard_link(&self) -> bool {
        *self == Self::Link
    }

    fn is_symbolic_link(&self) -> bool {
        *self == Self::Symlink
    }

    fn is_character_special(&self) -> bool {
        *self == Self::CharDevice
    }

    fn is_block_special(&self) -> bool {
        *self == Self::BlockDevice
    }

    fn is_directory(&self) -> bool {
        *self == Self::Directory
    }

    fn is_fifo(&self) -> bool {
        *self == Self::Fifo
    }

    fn is_contiguous_file(&self) -> bool {
        *self == Self::Contiguous
    }

    fn is_long_name_marker(&self) -> bool {
        matches!(self, Self::GnuLongName | Self::GnuLongLink)
    }
}

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// Member path.
    pub name: String,
    /// Content bytes following the header, padding excluded.
    pub size: u64,
    pub entry_type: EntryType,
    /// Modification time in seconds since the epoch.
    pub mtime: u64,
    /// Permission bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Target of hard and symbolic links.
    pub link_name: String,
    pub user_name: String,
    pub group_name: String,
    pub dev_major: u32,
    pub dev_minor: u32,
    /// Byte position of the header in the archive, set by the reader.
    pub offset: u64,
}

impl Entry {
    /// Creates an entry with the given name and type.
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        let mode = match entry_type {
            EntryType::Directory => 0o755,
            _ => 0o644,
        };
        Self {
            name: name.into(),
            entry_type,
            mode,
            ..Self::default()
        }
    }

    /// Creates a regular file entry of `size` bytes.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        let mut entry = Self::new(name, EntryType::Normal);
        entry.size = size;
        entry
    }

    /// Creates a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Directory)
    }

    /// Creates a symbolic link entry.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut entry = Self::new(name, EntryType::Symlink);
        entry.link_name = target.into();
        entry
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Bytes the content occupies in the archive, padding included.
    pub fn padded_size(&self, record_size: usize) -> u64 {
        self.size.div_ceil(record_size as u64) * record_size as u64
    }
}

impl IsTypeTrait for Entry {
    fn is_regular_file(&self) -> bool {
        self.entry_type.is_regular_file()
    }

    fn is_hard_link(&self) -> bool {
        self.entry_type.is_hard_link()
    }

    fn is_symbolic_link(&self) -> bool {
        self.entry_type.is_symbolic_link()
    }

    fn is_character_special(&self) -> bool {
        self.entry_type.is_character_special()
    }

    fn is_block_special(&self) -> bool {
        self.entry_type.is_block_special()
    }

    fn is_directory(&self) -> bool {
        self.entry_type.is_directory()
    }

    fn is_fifo(&self) -> bool {
        self.entry_type.is_fifo()
    }

    fn is_contiguous_file(&self) -> bool {
        self.entry_type.is_contiguous_file()
    }

    fn is_long_name_marker(&self) -> bool {
        self.entry_type.is_long_name_marker()
    }
}
