use std::{io, path::PathBuf};

/// The step of [`Arena::open`](crate::Arena::open) that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  /// Checking whether the backing file exists, or the request itself was invalid.
  Resolve,
  /// Creating a new backing file or opening an existing one.
  Create,
  /// Giving the backing file its length, or checking the length of a reused file.
  Size,
  /// Establishing the memory map.
  Map,
  /// Closing the file descriptor used to establish the memory map.
  Release,
}

impl core::fmt::Display for Stage {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::Resolve => write!(f, "resolve"),
      Self::Create => write!(f, "create"),
      Self::Size => write!(f, "size"),
      Self::Map => write!(f, "map"),
      Self::Release => write!(f, "release"),
    }
  }
}

/// An error returned when an [`Arena`](crate::Arena) cannot be opened.
///
/// Every variant except [`Error::InvalidSize`] carries the path of the backing file,
/// and every I/O variant keeps the underlying OS error, available through
/// [`std::error::Error::source`].
#[derive(Debug)]
pub enum Error {
  /// The requested size is zero or cannot be mapped on this platform.
  InvalidSize {
    /// The requested size
    size: u64,
  },

  /// Checking whether the backing file exists failed for a reason other than "not found".
  Stat {
    /// The path of the backing file
    path: PathBuf,
    /// The underlying error
    source: io::Error,
  },

  /// Something other than a regular file lives at the path.
  NotAFile {
    /// The path of the backing file
    path: PathBuf,
  },

  /// The backing file could not be created.
  Create {
    /// The path of the backing file
    path: PathBuf,
    /// The underlying error
    source: io::Error,
  },

  /// The existing backing file could not be opened for read and write.
  Open {
    /// The path of the backing file
    path: PathBuf,
    /// The underlying error
    source: io::Error,
  },

  /// The length of a newly created backing file could not be set.
  SetLen {
    /// The path of the backing file
    path: PathBuf,
    /// The requested size
    size: u64,
    /// The underlying error
    source: io::Error,
  },

  /// The filesystem refused to reserve blocks for a newly created backing file.
  Allocate {
    /// The path of the backing file
    path: PathBuf,
    /// The requested size
    size: u64,
    /// The underlying error
    source: io::Error,
  },

  /// The length of an existing backing file does not match the requested size.
  LengthMismatch {
    /// The path of the backing file
    path: PathBuf,
    /// The requested size
    expected: u64,
    /// The length found on disk
    actual: u64,
  },

  /// The operating system refused to establish the memory map.
  Map {
    /// The path of the backing file
    path: PathBuf,
    /// The requested size
    size: u64,
    /// The underlying error
    source: io::Error,
  },

  /// Closing the file descriptor after the memory map was established failed.
  ///
  /// The memory map has already been released when this error is returned.
  Close {
    /// The path of the backing file
    path: PathBuf,
    /// The underlying error
    source: io::Error,
  },
}

impl Error {
  /// Returns the step of the open sequence that failed.
  #[inline]
  pub const fn stage(&self) -> Stage {
    match self {
      Self::InvalidSize { .. } | Self::Stat { .. } | Self::NotAFile { .. } => Stage::Resolve,
      Self::Create { .. } | Self::Open { .. } => Stage::Create,
      Self::SetLen { .. } | Self::Allocate { .. } | Self::LengthMismatch { .. } => Stage::Size,
      Self::Map { .. } => Stage::Map,
      Self::Close { .. } => Stage::Release,
    }
  }

  /// Returns `true` if the error comes from the backing file rather than the memory map.
  #[inline]
  pub const fn is_file_error(&self) -> bool {
    matches!(
      self.stage(),
      Stage::Resolve | Stage::Create | Stage::Size | Stage::Release
    ) && !matches!(self, Self::InvalidSize { .. })
  }

  /// Returns `true` if the operating system refused to establish the memory map,
  /// or the requested size can never be mapped.
  #[inline]
  pub const fn is_map_error(&self) -> bool {
    matches!(self, Self::Map { .. } | Self::InvalidSize { .. })
  }

  /// Returns the path of the backing file, if the error is tied to one.
  #[inline]
  pub fn path(&self) -> Option<&std::path::Path> {
    match self {
      Self::InvalidSize { .. } => None,
      Self::Stat { path, .. }
      | Self::NotAFile { path }
      | Self::Create { path, .. }
      | Self::Open { path, .. }
      | Self::SetLen { path, .. }
      | Self::Allocate { path, .. }
      | Self::LengthMismatch { path, .. }
      | Self::Map { path, .. }
      | Self::Close { path, .. } => Some(path),
    }
  }

  /// Returns the underlying OS error, if any.
  #[inline]
  pub fn io_error(&self) -> Option<&io::Error> {
    match self {
      Self::Stat { source, .. }
      | Self::Create { source, .. }
      | Self::Open { source, .. }
      | Self::SetLen { source, .. }
      | Self::Allocate { source, .. }
      | Self::Map { source, .. }
      | Self::Close { source, .. } => Some(source),
      _ => None,
    }
  }
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::InvalidSize { size } => write!(f, "invalid arena size: {size}"),
      Self::Stat { path, source } => {
        write!(f, "failed to stat {}: {source}", path.display())
      }
      Self::NotAFile { path } => write!(f, "{} is not a regular file", path.display()),
      Self::Create { path, source } => {
        write!(f, "failed to create {}: {source}", path.display())
      }
      Self::Open { path, source } => write!(f, "failed to open {}: {source}", path.display()),
      Self::SetLen { path, size, source } => write!(
        f,
        "failed to set the length of {} to {size} bytes: {source}",
        path.display()
      ),
      Self::Allocate { path, size, source } => write!(
        f,
        "failed to reserve {size} bytes for {}: {source}",
        path.display()
      ),
      Self::LengthMismatch {
        path,
        expected,
        actual,
      } => write!(
        f,
        "length mismatch for {}: expected {expected} bytes, but found {actual} bytes",
        path.display()
      ),
      Self::Map { path, size, source } => write!(
        f,
        "failed to map {size} bytes of {}: {source}",
        path.display()
      ),
      Self::Close { path, source } => write!(f, "failed to close {}: {source}", path.display()),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    self.io_error().map(|e| e as _)
  }
}

/// Error indicating that a byte access falls outside of the arena.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
  pub(crate) offset: usize,
  pub(crate) len: usize,
  pub(crate) size: usize,
}

impl OutOfBounds {
  #[inline]
  pub(crate) const fn new(offset: usize, len: usize, size: usize) -> Self {
    Self { offset, len, size }
  }

  /// Returns the offset of the rejected access.
  #[inline]
  pub const fn offset(&self) -> usize {
    self.offset
  }

  /// Returns the length of the rejected access.
  #[inline]
  pub const fn len(&self) -> usize {
    self.len
  }

  /// Returns `true` if the rejected access had zero length.
  #[inline]
  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Returns the size of the arena.
  #[inline]
  pub const fn size(&self) -> usize {
    self.size
  }
}

impl core::fmt::Display for OutOfBounds {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(
      f,
      "index out of bounds: {} bytes at offset {} exceed the arena size {}",
      self.len, self.offset, self.size
    )
  }
}

impl std::error::Error for OutOfBounds {}

impl From<OutOfBounds> for io::Error {
  #[inline]
  fn from(e: OutOfBounds) -> Self {
    io::Error::new(io::ErrorKind::InvalidInput, e)
  }
}
