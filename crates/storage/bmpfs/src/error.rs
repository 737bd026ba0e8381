//! Error types for the BMP-backed filesystem.

/// Result type used throughout the crate.
pub type BmpFsResult<T> = Result<T, BmpFsError>;

/// Errors a filesystem operation can fail with.
///
/// Every variant maps to exactly one POSIX errno via [`BmpFsError::to_errno`]; the mapping is the
/// only thing `fuser` ever sees. Causes (short reads, seek failures, ...) are logged at the point
/// of failure rather than carried in the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BmpFsError {
    /// File or directory not found
    #[error("no such file or directory")]
    NotFound,
    /// Name already exists in the namespace
    #[error("file exists")]
    AlreadyExists,
    /// Name too long (> 255 bytes)
    #[error("name too long")]
    NameTooLong,
    /// Path embeds a '/' beyond the leading one, or is otherwise malformed
    #[error("invalid argument")]
    InvalidArgument,
    /// No free metadata slot remains
    #[error("out of memory")]
    OutOfSlots,
    /// No free block run of the requested length exists
    #[error("no space left on device")]
    NoSpace,
    /// Backing image I/O failure (short read/write, seek, flush)
    #[error("i/o error")]
    Io,
    /// Operation requires a regular file but the slot is a directory
    #[error("is a directory")]
    IsADirectory,
    /// Operation requires a directory but the slot is a regular file
    #[error("not a directory")]
    NotADirectory,
    /// Requested access bit not present in the slot's mode
    #[error("permission denied")]
    AccessDenied,
    /// Resulting size does not fit in the addressable block range
    #[error("file too large")]
    TooBig,
    /// The on-disk header failed validation (bad signature, truncated file, etc.)
    #[error("invalid format")]
    InvalidFormat,
}

impl BmpFsError {
    /// Convert to the positive errno magnitude `fuser`'s `reply.error()` expects.
    pub fn to_errno(self) -> i32 {
        match self {
            BmpFsError::NotFound => libc::ENOENT,
            BmpFsError::AlreadyExists => libc::EEXIST,
            BmpFsError::NameTooLong => libc::ENAMETOOLONG,
            BmpFsError::InvalidArgument => libc::EINVAL,
            BmpFsError::OutOfSlots => libc::ENOMEM,
            BmpFsError::NoSpace => libc::ENOSPC,
            BmpFsError::Io => libc::EIO,
            BmpFsError::IsADirectory => libc::EISDIR,
            BmpFsError::NotADirectory => libc::ENOTDIR,
            BmpFsError::AccessDenied => libc::EACCES,
            BmpFsError::TooBig => libc::EFBIG,
            BmpFsError::InvalidFormat => libc::EIO,
        }
    }
}

impl From<std::io::Error> for BmpFsError {
    fn from(err: std::io::Error) -> Self {
        log::warn!("backing image i/o error: {err}");
        BmpFsError::Io
    }
}

/// Helper so call sites can render a `BmpFsError` alongside a path without pulling in `Display`
/// everywhere they log.
pub(crate) fn log_fail(op: &str, path: &str, err: BmpFsError) -> BmpFsError {
    log::warn!("{op} {path}: {err}");
    err
}
