use std::{fs::OpenOptions, path::Path};

use either::Either;
use memmap2::MmapOptions;

use super::{Arena, Error};

/// Permission bits given to a newly created backing file.
pub const DEFAULT_PERMISSIONS: u32 = 0o744;

/// How the backing file is mapped into memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
  /// A shared, read and write mapping.
  ///
  /// Writes are visible to every other mapping of the same file and are
  /// eventually written back to the file.
  #[default]
  Shared,
  /// A private, copy-on-write mapping.
  ///
  /// Writes stay local to this mapping and never reach the file.
  CopyOnWrite,
}

/// How a newly created backing file gets its length.
///
/// Neither variant writes every byte of the file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allocation {
  /// Set the length with a truncate-style call, leaving a sparse file.
  #[default]
  Sparse,
  /// Set the length and ask the filesystem to reserve the blocks up front,
  /// so that later page faults cannot run out of disk space.
  Reserve,
}

/// What to do when an existing backing file's length differs from the requested size.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthPolicy {
  /// Fail with [`Error::LengthMismatch`].
  #[default]
  Validate,
  /// Grow a shorter file to the requested size. A longer file is still a mismatch.
  Extend,
  /// Map the requested size without looking at the file's length.
  ///
  /// If the file is shorter than the requested size, touching the pages past its
  /// end raises `SIGBUS` on most platforms.
  Trust,
}

/// Options for opening an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaOptions {
  mode: MapMode,
  allocation: Allocation,
  length_policy: LengthPolicy,
  permissions: u32,
  populate: bool,
}

impl Default for ArenaOptions {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl ArenaOptions {
  /// Create options with default values: a shared mapping, a sparse file with
  /// `0o744` permissions, and validated lengths on reuse.
  #[inline]
  pub const fn new() -> Self {
    Self {
      mode: MapMode::Shared,
      allocation: Allocation::Sparse,
      length_policy: LengthPolicy::Validate,
      permissions: DEFAULT_PERMISSIONS,
      populate: false,
    }
  }

  /// Set how the backing file is mapped.
  ///
  /// The default is [`MapMode::Shared`].
  ///
  /// # Example
  ///
  /// ```
  /// use mmap_arena::{ArenaOptions, MapMode};
  ///
  /// let opts = ArenaOptions::new().with_mode(MapMode::CopyOnWrite);
  /// assert_eq!(opts.mode(), MapMode::CopyOnWrite);
  /// ```
  #[inline]
  pub const fn with_mode(mut self, mode: MapMode) -> Self {
    self.mode = mode;
    self
  }

  /// Set how a newly created backing file gets its length.
  ///
  /// This option has no effect when the file already exists, unless
  /// [`LengthPolicy::Extend`] grows it.
  ///
  /// # Example
  ///
  /// ```
  /// use mmap_arena::{Allocation, ArenaOptions};
  ///
  /// let opts = ArenaOptions::new().with_allocation(Allocation::Reserve);
  /// assert_eq!(opts.allocation(), Allocation::Reserve);
  /// ```
  #[inline]
  pub const fn with_allocation(mut self, allocation: Allocation) -> Self {
    self.allocation = allocation;
    self
  }

  /// Set what happens when an existing backing file's length differs from the requested size.
  ///
  /// The default is [`LengthPolicy::Validate`].
  ///
  /// # Example
  ///
  /// ```
  /// use mmap_arena::{ArenaOptions, LengthPolicy};
  ///
  /// let opts = ArenaOptions::new().with_length_policy(LengthPolicy::Extend);
  /// assert_eq!(opts.length_policy(), LengthPolicy::Extend);
  /// ```
  #[inline]
  pub const fn with_length_policy(mut self, policy: LengthPolicy) -> Self {
    self.length_policy = policy;
    self
  }

  /// Set the permission bits of a newly created backing file. The process umask still applies.
  ///
  /// Existing files keep their permissions. This option has no effect on non-unix platforms.
  ///
  /// The default is `0o744`.
  ///
  /// # Example
  ///
  /// ```
  /// use mmap_arena::ArenaOptions;
  ///
  /// let opts = ArenaOptions::new().with_permissions(0o600);
  /// assert_eq!(opts.permissions(), 0o600);
  /// ```
  #[inline]
  pub const fn with_permissions(mut self, mode: u32) -> Self {
    self.permissions = mode;
    self
  }

  /// Populate (prefault) page tables for the mapping.
  ///
  /// This causes read-ahead on the file and reduces blocking on page faults later.
  /// It corresponds to the `MAP_POPULATE` flag on Linux and has no effect elsewhere.
  ///
  /// # Example
  ///
  /// ```
  /// use mmap_arena::ArenaOptions;
  ///
  /// let opts = ArenaOptions::new().with_populate(true);
  /// assert!(opts.populate());
  /// ```
  #[inline]
  pub const fn with_populate(mut self, populate: bool) -> Self {
    self.populate = populate;
    self
  }

  /// Returns how the backing file is mapped.
  #[inline]
  pub const fn mode(&self) -> MapMode {
    self.mode
  }

  /// Returns how a newly created backing file gets its length.
  #[inline]
  pub const fn allocation(&self) -> Allocation {
    self.allocation
  }

  /// Returns the policy for existing files whose length differs from the requested size.
  #[inline]
  pub const fn length_policy(&self) -> LengthPolicy {
    self.length_policy
  }

  /// Returns the permission bits of a newly created backing file.
  #[inline]
  pub const fn permissions(&self) -> u32 {
    self.permissions
  }

  /// Returns `true` if the mapping should be prefaulted.
  #[inline]
  pub const fn populate(&self) -> bool {
    self.populate
  }

  /// Opens the arena at `path`, creating a backing file of `size` bytes if none exists.
  ///
  /// See [`Arena::open`] for the full sequence.
  #[inline]
  pub fn open<P: AsRef<Path>>(self, path: P, size: u64) -> Result<Arena, Error> {
    Arena::open_in(path.as_ref().to_path_buf(), size, self)
  }

  /// Opens the arena at the path returned by `path_builder`.
  ///
  /// A failure of the path builder is returned as [`Either::Left`], a failure
  /// to open the arena as [`Either::Right`].
  ///
  /// # Example
  ///
  /// ```no_run
  /// use mmap_arena::ArenaOptions;
  ///
  /// let _arena = ArenaOptions::new()
  ///   .open_with_path_builder::<_, std::env::VarError>(
  ///     || Ok(std::env::var("QUEUE_DIR")?.into()),
  ///     4096,
  ///   )
  ///   .unwrap();
  /// ```
  pub fn open_with_path_builder<PB, E>(
    self,
    path_builder: PB,
    size: u64,
  ) -> Result<Arena, Either<E, Error>>
  where
    PB: FnOnce() -> Result<std::path::PathBuf, E>,
  {
    let path = path_builder().map_err(Either::Left)?;
    Arena::open_in(path, size, self).map_err(Either::Right)
  }

  /// Options used to create a backing file that must not exist yet.
  pub(crate) fn create_options(&self) -> OpenOptions {
    let mut open_opts = OpenOptions::new();
    open_opts.read(true).write(true).create_new(true);

    #[cfg(unix)]
    {
      use std::os::unix::fs::OpenOptionsExt;
      open_opts.mode(self.permissions);
    }

    open_opts
  }

  /// Options used to open an existing backing file without altering its length.
  pub(crate) fn reuse_options(&self) -> OpenOptions {
    let mut open_opts = OpenOptions::new();
    open_opts.read(true).write(true);
    open_opts
  }

  pub(crate) fn mmap_options(&self, len: usize) -> MmapOptions {
    let mut mmap_opts = MmapOptions::new();
    mmap_opts.len(len);

    if self.populate {
      mmap_opts.populate();
    }

    mmap_opts
  }
}
