#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![deny(missing_docs)]

#[cfg(target_family = "wasm")]
compile_error!("`mmap-arena` requires a platform with file-backed memory maps");

mod arena;
pub use arena::*;

mod error;
pub use error::*;

mod options;
pub use options::*;

pub use either;

static PAGE_SIZE: std::sync::LazyLock<u32> = std::sync::LazyLock::new(|| {
  #[cfg(not(windows))]
  {
    rustix::param::page_size() as u32
  }

  #[cfg(windows)]
  {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

    unsafe {
      let mut system_info: SYSTEM_INFO = std::mem::zeroed();
      GetSystemInfo(&mut system_info);
      system_info.dwPageSize
    }
  }
});

/// Returns the page size of the host, in bytes.
///
/// Arena sizes do not have to be a multiple of the page size, but the operating
/// system always maps whole pages.
#[inline]
pub fn page_size() -> u32 {
  *PAGE_SIZE
}

#[cfg(test)]
pub(crate) fn init_tracing() {
  #[cfg(feature = "tracing")]
  {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  }
}
