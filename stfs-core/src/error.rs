//! Filesystem errors
//!
//! Every entry point of [`crate::Stfs`] reports failures through this
//! type and also remembers the most recent one, see
//! [`crate::Stfs::last_error`].

use stfs_hal::FlashError;

/// Result type used throughout the filesystem
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported by filesystem operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Validation
    /// File descriptor outside the descriptor table
    InvalidFd,
    /// File descriptor not currently open
    NotOpen,
    /// Path does not start with `/`
    RelativePath,
    /// Path component is empty or longer than the name limit
    NameSize,
    /// Name is `.` or `..` or missing
    InvalidName,
    /// Parent of a new object is not a directory
    WrongObject,
    /// Operation needs a directory
    NotDirectory,
    /// Operation needs a file
    IsDirectory,
    /// The root directory cannot be removed
    DeleteRoot,
    /// Directory still has children
    NotEmpty,
    /// Path does not resolve
    NotFound,

    // Resource exhaustion
    /// All descriptor slots are in use
    NoDescriptors,
    /// No free chunk left, even after vacuuming
    Full,
    /// Vacuum found no block worth reclaiming
    Vacuum,
    /// No wholly empty block to reserve at init
    NoEmptyBlock,
    /// File would exceed the maximum file size
    TooBig,

    // Conflict
    /// Name already taken in the parent directory
    Exists,
    /// Same name is being created by another open descriptor
    AlreadyOpen,

    // Corruption / structural
    /// Expected data chunk is missing
    MissingChunk,
    /// File lost its ancestor chain while it was open
    Dangling,
    /// Truncate cannot extend a file
    NoExtend,
    /// File position lies beyond the end of the file
    InvalidPosition,
    /// Seek target before start of file
    SeekBeforeStart,
    /// Seek target beyond end of file
    SeekBeyondEnd,
    /// Chunk write with bad address or size
    BadChunk,
    /// Medium geometry unusable
    BadGeometry,
    /// Flash medium failure
    Flash(FlashError),
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Error::Flash(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::InvalidFd => "invalid file descriptor",
            Error::NotOpen => "file descriptor not open",
            Error::RelativePath => "path is not absolute",
            Error::NameSize => "name is empty or too long",
            Error::InvalidName => "invalid name",
            Error::WrongObject => "parent is not a directory",
            Error::NotDirectory => "not a directory",
            Error::IsDirectory => "is a directory",
            Error::DeleteRoot => "cannot delete root directory",
            Error::NotEmpty => "directory not empty",
            Error::NotFound => "no such file or directory",
            Error::NoDescriptors => "no free file descriptors",
            Error::Full => "device full",
            Error::Vacuum => "vacuum found no reclaimable block",
            Error::NoEmptyBlock => "no empty block to reserve",
            Error::TooBig => "file too big",
            Error::Exists => "already exists",
            Error::AlreadyOpen => "file already open",
            Error::MissingChunk => "data chunk missing",
            Error::Dangling => "file no longer reachable from root",
            Error::NoExtend => "cannot extend file by truncation",
            Error::InvalidPosition => "file position beyond end of file",
            Error::SeekBeforeStart => "seek before start of file",
            Error::SeekBeyondEnd => "seek beyond end of file",
            Error::BadChunk => "bad chunk address or size",
            Error::BadGeometry => "unusable flash geometry",
            Error::Flash(e) => return write!(f, "flash error: {}", e),
        };
        f.write_str(msg)
    }
}
