use serde::{Deserialize, Serialize};

use super::error::{Result, TarError};
use super::{DEFAULT_BLOCKING_FACTOR, DEFAULT_RECORD_SIZE, HEADER_SIZE};

/// How the writer handles names that do not fit the 100 byte name field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongNameMode {
    /// Emit a GNU long name marker entry ahead of the real entry.
    #[default]
    Gnu,
    /// Fail with `TarError::NameTooLong`.
    Reject,
    /// Cut the name down to the field width.
    Truncate,
}

/// Archive geometry and long name policy, fixed for the life of a reader or
/// writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TarConfig {
    /// Bytes moved per underlying stream transfer.
    pub block_size: usize,
    /// Bytes per record; headers occupy exactly one record.
    pub record_size: usize,
    pub long_names: LongNameMode,
    /// Raise `MalformedLongNameSequence` instead of ending iteration when a
    /// long name marker has no follower.
    pub strict_long_names: bool,
}

impl Default for TarConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_RECORD_SIZE * DEFAULT_BLOCKING_FACTOR,
            record_size: DEFAULT_RECORD_SIZE,
            long_names: LongNameMode::default(),
            strict_long_names: false,
        }
    }
}

impl TarConfig {
    /// Sets the block size as a number of records.
    pub fn with_blocking_factor(mut self, factor: usize) -> Self {
        self.block_size = self.record_size * factor;
        self
    }

    /// Sets the record size, keeping the current blocking factor.
    pub fn with_record_size(mut self, record_size: usize) -> Self {
        let factor = if self.record_size > 0 { self.block_size / self.record_size } else { 0 };
        self.record_size = record_size;
        self.block_size = record_size * factor;
        self
    }

    pub fn with_long_names(mut self, mode: LongNameMode) -> Self {
        self.long_names = mode;
        self
    }

    pub fn with_strict_long_names(mut self, strict: bool) -> Self {
        self.strict_long_names = strict;
        self
    }

    /// Number of records batched in one block.
    pub fn records_per_block(&self) -> usize {
        self.block_size / self.record_size
    }

    /// Checks the geometry invariants.
    pub fn validate(&self) -> Result<()> {
        if self.record_size == 0 || self.block_size == 0 {
            return Err(TarError::InvalidConfig("block and record sizes must be positive".into()));
        }
        if self.record_size < HEADER_SIZE {
            return Err(TarError::InvalidConfig(format!(
                "record size {} is smaller than a {} byte header",
                self.record_size, HEADER_SIZE
            )));
        }
        if self.block_size % self.record_size != 0 {
            return Err(TarError::InvalidConfig(format!(
                "block size {} is not a multiple of record size {}",
                self.block_size, self.record_size
            )));
        }
        Ok(())
    }
}
