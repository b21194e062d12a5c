use std::{
  fs::{File, Metadata},
  io,
  path::{Path, PathBuf},
};

use fs4::fs_std::FileExt;

use crate::{Allocation, ArenaOptions, Error, LengthPolicy};

/// A backing file that is open and has the requested length.
pub(super) struct Backing {
  pub(super) file: File,
  /// `true` if this call created the file.
  pub(super) is_new: bool,
}

/// Removes a backing file created by the current `open` call when dropped,
/// unless [`CreatedFile::keep`] was called.
///
/// Only held until the file has its length: from then on it is a valid arena
/// that another opener may already have mapped.
struct CreatedFile {
  path: Option<PathBuf>,
}

impl CreatedFile {
  #[inline]
  fn new(path: &Path) -> Self {
    Self {
      path: Some(path.to_path_buf()),
    }
  }

  #[inline]
  fn keep(mut self) {
    self.path = None;
  }
}

impl Drop for CreatedFile {
  fn drop(&mut self) {
    if let Some(path) = self.path.take() {
      #[cfg(feature = "tracing")]
      tracing::debug!(path = %path.display(), "remove partially created arena file");

      let _ = std::fs::remove_file(path);
    }
  }
}

/// Opens the file at `path` if it exists, otherwise creates it with a length of `size` bytes.
pub(super) fn open_or_create(path: &Path, size: u64, opts: &ArenaOptions) -> Result<Backing, Error> {
  match std::fs::metadata(path) {
    Ok(meta) => reuse(path, &meta, size, opts),
    Err(e) if e.kind() == io::ErrorKind::NotFound => match create(path, size, opts) {
      Err(Error::Create { source, .. }) if source.kind() == io::ErrorKind::AlreadyExists => {
        // someone else created the file between the stat and the create
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %path.display(), "arena file appeared concurrently, reusing it");

        let meta = std::fs::metadata(path).map_err(|source| Error::Stat {
          path: path.to_path_buf(),
          source,
        })?;
        reuse(path, &meta, size, opts)
      }
      res => res,
    },
    Err(source) => Err(Error::Stat {
      path: path.to_path_buf(),
      source,
    }),
  }
}

fn create(path: &Path, size: u64, opts: &ArenaOptions) -> Result<Backing, Error> {
  let file = opts
    .create_options()
    .open(path)
    .map_err(|source| Error::Create {
      path: path.to_path_buf(),
      source,
    })?;
  let created = CreatedFile::new(path);

  #[cfg(feature = "tracing")]
  tracing::debug!(path = %path.display(), size, "created arena file");

  if let Err(e) = set_size(&file, path, size, opts.allocation()) {
    drop(file);
    drop(created);
    return Err(e);
  }
  created.keep();

  Ok(Backing { file, is_new: true })
}

fn reuse(path: &Path, meta: &Metadata, size: u64, opts: &ArenaOptions) -> Result<Backing, Error> {
  if !meta.is_file() {
    return Err(Error::NotAFile {
      path: path.to_path_buf(),
    });
  }

  let file = opts
    .reuse_options()
    .open(path)
    .map_err(|source| Error::Open {
      path: path.to_path_buf(),
      source,
    })?;

  // the length is read again through the descriptor, the path may have been replaced since the stat
  let actual = file
    .metadata()
    .map_err(|source| Error::Open {
      path: path.to_path_buf(),
      source,
    })?
    .len();

  #[cfg(feature = "tracing")]
  tracing::debug!(path = %path.display(), size, actual, "reusing arena file");

  let mismatch = || Error::LengthMismatch {
    path: path.to_path_buf(),
    expected: size,
    actual,
  };

  match opts.length_policy() {
    LengthPolicy::Trust => {}
    LengthPolicy::Validate if actual != size => return Err(mismatch()),
    LengthPolicy::Validate => {}
    LengthPolicy::Extend if actual > size => return Err(mismatch()),
    LengthPolicy::Extend if actual < size => {
      if let Err(e) = set_size(&file, path, size, opts.allocation()) {
        // a failed reservation must not leave the file grown
        let _ = file.set_len(actual);
        return Err(e);
      }
    }
    LengthPolicy::Extend => {}
  }

  Ok(Backing {
    file,
    is_new: false,
  })
}

fn set_size(file: &File, path: &Path, size: u64, allocation: Allocation) -> Result<(), Error> {
  file.set_len(size).map_err(|source| Error::SetLen {
    path: path.to_path_buf(),
    size,
    source,
  })?;

  if let Allocation::Reserve = allocation {
    FileExt::allocate(file, size).map_err(|source| Error::Allocate {
      path: path.to_path_buf(),
      size,
      source,
    })?;
  }

  #[cfg(feature = "tracing")]
  tracing::debug!(path = %path.display(), size, ?allocation, "sized arena file");

  Ok(())
}

/// Closes the descriptor, reporting the error `close(2)` returns.
#[cfg(unix)]
pub(super) fn close(file: File) -> io::Result<()> {
  use std::os::fd::IntoRawFd;

  let fd = file.into_raw_fd();
  // SAFETY: `fd` was owned by `file`, which gave up ownership above.
  if unsafe { libc::close(fd) } == 0 {
    Ok(())
  } else {
    Err(io::Error::last_os_error())
  }
}

#[cfg(not(unix))]
pub(super) fn close(file: File) -> io::Result<()> {
  drop(file);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Arena, Stage};

  const SIZE: u64 = 4096;

  #[test]
  #[cfg_attr(miri, ignore)]
  fn sized_file_survives_a_failing_creator() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("winner.dat");

    let winner = create(&p, SIZE, &ArenaOptions::new()).unwrap();
    assert!(winner.is_new);

    let mut other = Arena::open(&p, SIZE).unwrap();
    assert!(!other.is_new());

    // the creator gives up before mapping
    drop(winner);
    assert!(p.exists());

    other.put(0, 0xAB).unwrap();
    other.flush().unwrap();
    other.release();

    let arena = Arena::open(&p, SIZE).unwrap();
    assert_eq!(arena.get(0).unwrap(), 0xAB);
  }

  #[test]
  #[cfg_attr(miri, ignore)]
  fn unsized_file_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("unsized.dat");

    // `u64::MAX` does not fit in `off_t`, so `set_len` always rejects it
    let err = match create(&p, u64::MAX, &ArenaOptions::new()) {
      Err(e) => e,
      Ok(_) => panic!("sizing must fail"),
    };
    assert!(matches!(err, Error::SetLen { .. }));
    assert_eq!(err.stage(), Stage::Size);
    assert!(!p.exists());
  }

  #[test]
  #[cfg_attr(miri, ignore)]
  fn failed_extend_restores_the_length() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("extend.dat");
    std::fs::write(&p, [5u8; 100]).unwrap();

    let opts = ArenaOptions::new()
      .with_length_policy(LengthPolicy::Extend)
      .with_allocation(Allocation::Reserve);

    // either the length or the reservation is refused, no filesystem holds this much
    let err = match open_or_create(&p, i64::MAX as u64, &opts) {
      Err(e) => e,
      Ok(_) => panic!("extending must fail"),
    };
    assert!(
      matches!(err, Error::SetLen { .. } | Error::Allocate { .. }),
      "unexpected error: {err}"
    );
    assert_eq!(std::fs::metadata(&p).unwrap().len(), 100);
    assert_eq!(std::fs::read(&p).unwrap(), [5u8; 100]);
  }

  #[test]
  #[cfg_attr(miri, ignore)]
  fn reuse_reads_the_length_of_the_opened_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("replaced.dat");
    std::fs::write(&p, [0u8; 10]).unwrap();
    let stale = std::fs::metadata(&p).unwrap();

    // the path now names a file of the right size
    std::fs::write(&p, vec![0u8; SIZE as usize]).unwrap();
    let backing = match reuse(&p, &stale, SIZE, &ArenaOptions::new()) {
      Ok(b) => b,
      Err(e) => panic!("unexpected error: {e}"),
    };
    assert!(!backing.is_new);

    // failures after the open belong to the create stage, not to resolution
    let err = Error::Open {
      path: p.clone(),
      source: io::Error::from(io::ErrorKind::Other),
    };
    assert_eq!(err.stage(), Stage::Create);
  }
}
