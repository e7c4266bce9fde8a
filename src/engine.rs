pub mod buffer;
pub mod config;
pub mod entry;
pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

/// Bytes in one tar header.
pub const HEADER_SIZE: usize = 512;

/// Default to 512 bytes per record.
pub const DEFAULT_RECORD_SIZE: usize = 512;

/// Default number of records per block.
pub const DEFAULT_BLOCKING_FACTOR: usize = 20;
