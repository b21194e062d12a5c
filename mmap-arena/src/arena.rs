use core::ops::{self, Range};
use std::{
  fs::File,
  io,
  path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use super::{ArenaOptions, Error, MapMode, OutOfBounds};

mod backing;


macro_rules! define_int_accessors {
  ($($ty:ident), +$(,)?) => {
    $(
      paste::paste! {
        #[doc = "Reads a little-endian `" $ty "` at `offset`."]
        #[inline]
        pub fn [< get_ $ty _le >](&self, offset: usize) -> Result<$ty, OutOfBounds> {
          self.read_array(offset).map($ty::from_le_bytes)
        }

        #[doc = "Reads a big-endian `" $ty "` at `offset`."]
        #[inline]
        pub fn [< get_ $ty _be >](&self, offset: usize) -> Result<$ty, OutOfBounds> {
          self.read_array(offset).map($ty::from_be_bytes)
        }

        #[doc = "Writes `val` as a little-endian `" $ty "` at `offset`."]
        #[inline]
        pub fn [< put_ $ty _le >](&mut self, offset: usize, val: $ty) -> Result<(), OutOfBounds> {
          self.write_at(offset, &val.to_le_bytes())
        }

        #[doc = "Writes `val` as a big-endian `" $ty "` at `offset`."]
        #[inline]
        pub fn [< put_ $ty _be >](&mut self, offset: usize, val: $ty) -> Result<(), OutOfBounds> {
          self.write_at(offset, &val.to_be_bytes())
        }
      }
    )*
  };
}

type MapFn = fn(MmapOptions, &File) -> io::Result<MmapMut>;

#[inline]
fn mmap_mut(mmap_options: MmapOptions, file: &File) -> io::Result<MmapMut> {
  // SAFETY: the arena never changes the file's length while the map is alive.
  unsafe { mmap_options.map_mut(file) }
}

#[inline]
fn mmap_copy(mmap_options: MmapOptions, file: &File) -> io::Result<MmapMut> {
  // SAFETY: see `mmap_mut`.
  unsafe { mmap_options.map_copy(file) }
}

/// A fixed-size, file-backed, memory-mapped byte region.
///
/// The bytes of an `Arena` mirror its backing file. With the default
/// [`MapMode::Shared`], every write is visible to other arenas over the same file,
/// in this process or another, and is eventually written back to the file.
/// The arena provides no synchronization between such writers.
///
/// The mapping lives exactly as long as the `Arena`: it is released by
/// [`Arena::release`] or when the arena is dropped. The backing file is never removed.
pub struct Arena {
  path: PathBuf,
  mode: MapMode,
  is_new: bool,
  mmap: MmapMut,
}

impl core::fmt::Debug for Arena {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Arena")
      .field("path", &self.path)
      .field("size", &self.mmap.len())
      .field("mode", &self.mode)
      .finish()
  }
}

impl Arena {
  /// Opens the arena at `path` with default [`ArenaOptions`].
  ///
  /// If no file exists at `path`, one is created and given a length of exactly `size`
  /// bytes without writing them. An existing file is opened without altering its
  /// length, which must equal `size`. The whole file is then mapped shared, for read
  /// and write, and the file descriptor used to do so is closed before returning.
  ///
  /// On failure no mapping and no open descriptor stay behind. A file this call
  /// created is removed if it could not be given its length; once sized it is a
  /// valid arena that other openers may already use, so it is kept.
  ///
  /// # Example
  ///
  /// ```no_run
  /// use mmap_arena::Arena;
  ///
  /// let mut arena = Arena::open("/tmp/q.dat", 4096).unwrap();
  /// arena.put(0, 0xFF).unwrap();
  /// assert_eq!(arena.get(0).unwrap(), 0xFF);
  /// assert!(arena.put(4096, 0xFF).is_err());
  /// arena.release();
  /// ```
  #[inline]
  pub fn open<P: AsRef<Path>>(path: P, size: u64) -> Result<Self, Error> {
    ArenaOptions::new().open(path, size)
  }

  pub(crate) fn open_in(path: PathBuf, size: u64, opts: ArenaOptions) -> Result<Self, Error> {
    let map = match opts.mode() {
      MapMode::Shared => mmap_mut,
      MapMode::CopyOnWrite => mmap_copy,
    };
    Self::open_with(path, size, opts, map)
  }

  fn open_with(path: PathBuf, size: u64, opts: ArenaOptions, map: MapFn) -> Result<Self, Error> {
    let len = match usize::try_from(size) {
      Ok(len) if len > 0 && len <= isize::MAX as usize => len,
      _ => return Err(Error::InvalidSize { size }),
    };

    let backing::Backing { file, is_new } = backing::open_or_create(&path, size, &opts)?;

    let mmap = match map(opts.mmap_options(len), &file) {
      Ok(mmap) => mmap,
      Err(source) => {
        drop(file);
        return Err(Error::Map { path, size, source });
      }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(path = %path.display(), size, mode = ?opts.mode(), "mapped arena");

    // the mapping keeps its own reference to the file
    if let Err(source) = backing::close(file) {
      drop(mmap);
      return Err(Error::Close { path, source });
    }

    Ok(Self {
      path,
      mode: opts.mode(),
      is_new,
      mmap,
    })
  }

  /// Returns the path of the backing file.
  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Returns how the backing file is mapped.
  #[inline]
  pub const fn mode(&self) -> MapMode {
    self.mode
  }

  /// Returns `true` if the backing file was created when this arena was opened,
  /// so every byte is zero.
  #[inline]
  pub const fn is_new(&self) -> bool {
    self.is_new
  }

  /// Returns the size of the arena in bytes.
  #[inline]
  pub fn len(&self) -> usize {
    self.mmap.len()
  }

  /// Always returns `false`, an arena is never empty.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.mmap.is_empty()
  }

  /// Returns the whole arena as a byte slice.
  #[inline]
  pub fn as_slice(&self) -> &[u8] {
    &self.mmap
  }

  /// Returns the whole arena as a mutable byte slice.
  #[inline]
  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    &mut self.mmap
  }

  #[inline]
  fn check(&self, offset: usize, len: usize) -> Result<Range<usize>, OutOfBounds> {
    match offset.checked_add(len) {
      Some(end) if end <= self.mmap.len() => Ok(offset..end),
      _ => Err(OutOfBounds::new(offset, len, self.mmap.len())),
    }
  }

  #[inline]
  fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], OutOfBounds> {
    let range = self.check(offset, N)?;
    let mut buf = [0; N];
    buf.copy_from_slice(&self.mmap[range]);
    Ok(buf)
  }

  /// Returns the byte at `offset`.
  #[inline]
  pub fn get(&self, offset: usize) -> Result<u8, OutOfBounds> {
    self
      .mmap
      .get(offset)
      .copied()
      .ok_or_else(|| OutOfBounds::new(offset, 1, self.mmap.len()))
  }

  /// Writes `byte` at `offset`.
  #[inline]
  pub fn put(&mut self, offset: usize, byte: u8) -> Result<(), OutOfBounds> {
    let size = self.mmap.len();
    match self.mmap.get_mut(offset) {
      Some(b) => {
        *b = byte;
        Ok(())
      }
      None => Err(OutOfBounds::new(offset, 1, size)),
    }
  }

  /// Returns `len` bytes starting at `offset`.
  #[inline]
  pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], OutOfBounds> {
    let range = self.check(offset, len)?;
    Ok(&self.mmap[range])
  }

  /// Returns `len` mutable bytes starting at `offset`.
  #[inline]
  pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], OutOfBounds> {
    let range = self.check(offset, len)?;
    Ok(&mut self.mmap[range])
  }

  /// Copies `buf.len()` bytes starting at `offset` into `buf`.
  #[inline]
  pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), OutOfBounds> {
    let range = self.check(offset, buf.len())?;
    buf.copy_from_slice(&self.mmap[range]);
    Ok(())
  }

  /// Copies `data` into the arena starting at `offset`.
  #[inline]
  pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), OutOfBounds> {
    let range = self.check(offset, data.len())?;
    self.mmap[range].copy_from_slice(data);
    Ok(())
  }

  /// Sets `len` bytes starting at `offset` to `byte`.
  #[inline]
  pub fn fill(&mut self, offset: usize, len: usize, byte: u8) -> Result<(), OutOfBounds> {
    let range = self.check(offset, len)?;
    self.mmap[range].fill(byte);
    Ok(())
  }

  define_int_accessors!(u16, u32, u64, i16, i32, i64);

  /// Flushes outstanding modifications of the whole arena to the backing file,
  /// blocking until they are on disk.
  #[inline]
  pub fn flush(&self) -> io::Result<()> {
    self.mmap.flush()
  }

  /// Starts flushing outstanding modifications of the whole arena to the backing
  /// file, without waiting for them to complete.
  #[inline]
  pub fn flush_async(&self) -> io::Result<()> {
    self.mmap.flush_async()
  }

  /// Flushes outstanding modifications of `len` bytes starting at `offset`,
  /// blocking until they are on disk.
  ///
  /// Returns an [`io::ErrorKind::InvalidInput`] error if the range is out of bounds.
  #[inline]
  pub fn flush_range(&self, offset: usize, len: usize) -> io::Result<()> {
    self.check(offset, len)?;
    self.mmap.flush_range(offset, len)
  }

  /// Starts flushing outstanding modifications of `len` bytes starting at `offset`,
  /// without waiting for them to complete.
  ///
  /// Returns an [`io::ErrorKind::InvalidInput`] error if the range is out of bounds.
  #[inline]
  pub fn flush_async_range(&self, offset: usize, len: usize) -> io::Result<()> {
    self.check(offset, len)?;
    self.mmap.flush_async_range(offset, len)
  }

  /// Locks `len` bytes starting at `offset` in RAM, preventing them from being paged out.
  ///
  /// The operating system may limit how much memory a process can lock.
  #[cfg(not(windows))]
  #[cfg_attr(docsrs, doc(cfg(not(windows))))]
  pub fn lock(&self, offset: usize, len: usize) -> io::Result<()> {
    self.check(offset, len)?;
    // SAFETY: the range was checked to be inside the mapping.
    unsafe {
      let ptr = self.mmap.as_ptr().add(offset);
      rustix::mm::mlock(ptr as _, len).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
    }
  }

  /// Unlocks `len` bytes starting at `offset`, previously locked by [`Arena::lock`].
  #[cfg(not(windows))]
  #[cfg_attr(docsrs, doc(cfg(not(windows))))]
  pub fn unlock(&self, offset: usize, len: usize) -> io::Result<()> {
    self.check(offset, len)?;
    // SAFETY: the range was checked to be inside the mapping.
    unsafe {
      let ptr = self.mmap.as_ptr().add(offset);
      rustix::mm::munlock(ptr as _, len)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
    }
  }

  /// Unmaps the arena. The backing file stays on disk.
  ///
  /// Modifications not yet written back are still written back by the operating
  /// system with a shared mapping, but nothing is flushed synchronously; call
  /// [`Arena::flush`] first when durability matters.
  #[inline]
  pub fn release(self) {
    drop(self);
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    #[cfg(feature = "tracing")]
    tracing::debug!(path = %self.path.display(), size = self.mmap.len(), "released arena");
  }
}

impl ops::Deref for Arena {
  type Target = [u8];

  #[inline]
  fn deref(&self) -> &Self::Target {
    &self.mmap
  }
}

impl ops::DerefMut for Arena {
  #[inline]
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.mmap
  }
}

impl AsRef<[u8]> for Arena {
  #[inline]
  fn as_ref(&self) -> &[u8] {
    self
  }
}

impl AsMut<[u8]> for Arena {
  #[inline]
  fn as_mut(&mut self) -> &mut [u8] {
    self
  }
}
