//! Counter store lifecycle: file-backed shared mappings and the
//! active-store selector.
//!
//! A counter file outlives any single profiling session. It is created
//! zeroed and stamped, filled by the interrupt handler while selected,
//! and can be read by another process at any time, even mid-session.

#![allow(unsafe_code)] // mmap/munmap and the raw active-store pointer

use crate::domain::ProfilerError;
use log::debug;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use vmscope_common::CounterStore;

/// The single piece of state shared between normal and interrupt
/// context: the pointer to the store the handler writes to.
///
/// Swapping is one atomic pointer write with no intermediate state, so
/// a handler invocation mid-flight sees either the old or the new store
/// in full, never a mix. No validation happens on this path; installing
/// a malformed region yields garbage counters, not memory corruption,
/// provided its size matches.
#[derive(Debug)]
pub struct StoreSelector {
    active: AtomicPtr<CounterStore>,
}

impl StoreSelector {
    /// A selector with no active store; samples are dropped until one
    /// is selected.
    #[must_use]
    pub fn new() -> Self {
        Self { active: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Atomically replace the active store, returning the previous one
    /// (null when none). Ownership of the old region stays with the
    /// caller; this type never frees a store. Pass null to deselect.
    pub fn select(&self, store: *mut CounterStore) -> *mut CounterStore {
        self.active.swap(store, Ordering::AcqRel)
    }

    /// The store the handler currently targets.
    pub(crate) fn current(&self) -> *mut CounterStore {
        self.active.load(Ordering::Acquire)
    }
}

impl Default for StoreSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// A counter store mapped from a file, shared with external readers.
///
/// Dropping unmaps the region; the caller guarantees no active session
/// still references it (deselect before dropping).
#[derive(Debug)]
pub struct CounterFile {
    store: *mut CounterStore,
    path: PathBuf,
}

impl CounterFile {
    /// Create-or-open `path`, size it to [`CounterStore::SIZE`], map it
    /// shared, and zero-and-stamp it.
    ///
    /// Any step failure unwinds completely: no fd and no mapping is
    /// left behind.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProfilerError> {
        let path = path.as_ref();
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ProfilerError::CounterFilePath(path.to_owned()))?;

        unsafe {
            let fd = libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o666);
            if fd < 0 {
                return Err(ProfilerError::CounterFileCreate {
                    path: path.to_owned(),
                    source: io::Error::last_os_error(),
                });
            }

            #[allow(clippy::cast_possible_wrap)]
            let size = CounterStore::SIZE as libc::off_t;
            if libc::ftruncate(fd, size) != 0 {
                let source = io::Error::last_os_error();
                libc::close(fd);
                return Err(ProfilerError::CounterFileSize {
                    path: path.to_owned(),
                    size: CounterStore::SIZE,
                    source,
                });
            }

            let mapping = libc::mmap(
                ptr::null_mut(),
                CounterStore::SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            // The mapping keeps the file open; the fd is not needed
            // past this point either way.
            libc::close(fd);
            if mapping == libc::MAP_FAILED {
                return Err(ProfilerError::CounterFileMap {
                    path: path.to_owned(),
                    source: io::Error::last_os_error(),
                });
            }

            let store = mapping.cast::<CounterStore>();
            CounterStore::initialize(store);
            debug!("mapped counter file {} ({} bytes)", path.display(), CounterStore::SIZE);
            Ok(Self { store, path: path.to_owned() })
        }
    }

    /// Raw pointer for [`StoreSelector::select`].
    #[must_use]
    pub fn store_ptr(&self) -> *mut CounterStore {
        self.store
    }

    /// Read access to the mapped store.
    ///
    /// Safe to call while the store is active: counters only grow, so a
    /// reader may see a torn view of the sample currently being
    /// recorded but never of completed history.
    #[must_use]
    pub fn store(&self) -> &CounterStore {
        unsafe { &*self.store }
    }

    /// Path this store is backed by.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmap the region. Equivalent to dropping; the caller guarantees
    /// no active session references it.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for CounterFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.store.cast::<libc::c_void>(), CounterStore::SIZE);
        }
        debug!("unmapped counter file {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmscope_common::{TRACE_SLOTS, VERSION_MAJOR, VERSION_MINOR};

    #[test]
    fn test_open_stamps_and_zeroes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vm.counters");
        let file = CounterFile::open(&path).expect("open counter file");

        let store = file.store();
        assert!(store.header_valid());
        assert_eq!(store.major, VERSION_MAJOR);
        assert_eq!(store.minor, VERSION_MINOR);
        assert_eq!(store.vm_total(), 0);
        assert!(store.trace.iter().all(|t| t.total() == 0));
        assert_eq!(store.trace.len(), TRACE_SLOTS);

        let on_disk = std::fs::metadata(&path).expect("metadata").len();
        assert_eq!(on_disk, CounterStore::SIZE as u64);
    }

    #[test]
    fn test_reopen_starts_from_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vm.counters");

        {
            let file = CounterFile::open(&path).expect("first open");
            unsafe {
                (*file.store_ptr()).vm[0] = 99;
            }
        }
        let file = CounterFile::open(&path).expect("second open");
        assert_eq!(file.store().vm_total(), 0);
    }

    #[test]
    fn test_open_failure_reports_path() {
        let err = CounterFile::open("/nonexistent-dir/vm.counters").unwrap_err();
        assert!(matches!(err, ProfilerError::CounterFileCreate { .. }));
        assert!(err.to_string().contains("nonexistent-dir"));
    }

    #[test]
    fn test_selector_swap_returns_previous() {
        let selector = StoreSelector::new();
        assert!(selector.current().is_null());

        let dir = tempfile::tempdir().expect("tempdir");
        let file = CounterFile::open(dir.path().join("a.counters")).expect("open");

        let previous = selector.select(file.store_ptr());
        assert!(previous.is_null());
        assert_eq!(selector.current(), file.store_ptr());

        let previous = selector.select(ptr::null_mut());
        assert_eq!(previous, file.store_ptr());
        assert!(selector.current().is_null());
    }
}
