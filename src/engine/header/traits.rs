/// Trait for things that carry an entry type.
pub trait IsTypeTrait {
    // Tells if the entry is a regular file.
    fn is_regular_file(&self) -> bool;
    // Tells if the entry is a hard link.
    fn is_hard_link(&self) -> bool;
    // Tells if the entry is a symbolic link.
    fn is_symbolic_link(&self) -> bool;
    // Tells if the entry is a character special file.
    fn is_character_special(&self) -> bool;
    // Tells if the entry is a block special file.
    fn is_block_special(&self) -> bool;
    // Tells if the entry is a directory.
    fn is_directory(&self) -> bool;
    // Tells if the entry is a FIFO.
    fn is_fifo(&self) -> bool;
    // Tells if the entry is a contiguous file.
    fn is_contiguous_file(&self) -> bool;
    // Tells if the entry is a GNU long name or long link marker.
    fn is_long_name_marker(&self) -> bool;

    /// Tells if the entry's content is file data, as opposed to a size
    /// carried only for bookkeeping.
    fn carries_data(&self) -> bool {
        self.is_regular_file() || self.is_contiguous_file()
    }
}
