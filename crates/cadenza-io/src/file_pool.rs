//! Page-managed file pool.
//!
//! A [`FilePool`] lets any number of files be logically open while bounding
//! how many OS file handles exist at once. Files past the bound are
//! transparently "paged out": their byte offset is recorded and the handle
//! closed, to be reopened at the same offset the next time they are used.
//! Victims are chosen with a clock (second-chance) LRU scan.
//!
//! Every read, write, seek and size query on a [`PooledFile`] reactivates
//! the file first, so callers never manage activation explicitly. The
//! handle also implements [`std::io::Read`], [`Write`](std::io::Write) and
//! [`Seek`](std::io::Seek), which lets decoders consume pooled files
//! directly.
//!
//! # Locking
//!
//! The pool mutex guards only bookkeeping: the managed-file ring, the
//! eviction cursor and the active count. Blocking OS work (open, seek,
//! read, write) always happens outside it, under the affected file's own
//! slot mutex; capacity is reserved in advance and rolled back if the OS
//! call fails. The eviction scan only ever `try_lock`s a victim's slot, so
//! a file in the middle of slow I/O is skipped rather than waited on.
//!
//! Audio-thread code must not call into the pool; this is a control and
//! worker thread facility.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Error, Result};

/// Parsed file open mode, following the conventional `fopen` strings:
/// `"r"`, `"w"`, `"a"`, each optionally with `"+"` and/or a trailing `"b"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    read: bool,
    write: bool,
    append: bool,
    binary: bool,
    truncate: bool,
}

impl OpenMode {
    /// Whether the file is readable.
    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Whether the file is writable.
    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Whether writes go to the end of the file.
    pub fn is_append(&self) -> bool {
        self.append
    }

    /// Whether the `b` flag was given. Byte semantics are the default on
    /// every supported platform; the flag is accepted for compatibility.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Build the `OpenOptions` for this mode.
    ///
    /// The initial open honors truncation (`"w"` modes); reactivation never
    /// truncates and always adds read access, since the handle must be able
    /// to seek back to its recorded offset.
    fn open_options(&self, initial: bool) -> OpenOptions {
        let mut options = OpenOptions::new();
        if initial {
            options
                .read(self.read)
                .write(self.write && !self.append)
                .append(self.append)
                .create(self.write || self.append)
                .truncate(self.truncate);
        } else {
            options
                .read(true)
                .write(self.write && !self.append)
                .append(self.append);
        }
        options
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut mode = OpenMode {
            read: false,
            write: false,
            append: false,
            binary: false,
            truncate: false,
        };
        for c in s.chars() {
            match c {
                'r' => mode.read = true,
                'w' => {
                    mode.write = true;
                    mode.truncate = true;
                }
                'a' => mode.append = true,
                'b' => mode.binary = true,
                '+' => {
                    if mode.read {
                        mode.write = true;
                    } else {
                        mode.read = true;
                    }
                }
                _ => return Err(Error::InvalidMode(s.to_owned())),
            }
        }
        if !(mode.read || mode.write || mode.append) {
            return Err(Error::InvalidMode(s.to_owned()));
        }
        Ok(mode)
    }
}

/// Per-file handle state, guarded by the file's slot mutex.
struct FileSlot {
    /// The OS handle; `None` while the file is paged out.
    handle: Option<File>,
    /// Byte offset recorded at the last page-out. The live handle tracks
    /// its own cursor while active.
    pos: u64,
}

/// One managed file. Shared between its [`PooledFile`] handle and the
/// pool's ring.
struct FileState {
    path: PathBuf,
    mode: OpenMode,
    /// Whether an OS handle currently exists.
    active: AtomicBool,
    /// Recently-used marker for the clock scan.
    touch: AtomicBool,
    /// Set once the file (or its pool) has been closed.
    closed: AtomicBool,
    slot: Mutex<FileSlot>,
}

/// Pool bookkeeping, guarded by the pool mutex.
struct PoolInner {
    /// Managed files in insertion order; the clock scan walks this as a
    /// ring through the cursor below.
    files: Vec<Arc<FileState>>,
    /// Persistent eviction cursor.
    evict: usize,
    /// Number of files currently holding an OS handle.
    active: usize,
    closed: bool,
}

struct PoolShared {
    capacity: usize,
    inner: Mutex<PoolInner>,
}

/// A bounded pool of OS file handles backing an unbounded set of managed
/// files.
///
/// Dropping the pool forcibly pages out and closes every managed file;
/// surviving [`PooledFile`] handles then fail with
/// [`Error::PoolClosed`].
pub struct FilePool {
    shared: Arc<PoolShared>,
}

impl FilePool {
    /// Create a pool allowing at most `capacity` simultaneously active
    /// files.
    ///
    /// The capacity is subject to the process file-handle limit like any
    /// other open file; multiple pools should not sum past that limit.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::BadCapacity);
        }
        tracing::debug!(capacity, "file pool created");
        Ok(Self {
            shared: Arc::new(PoolShared {
                capacity,
                inner: Mutex::new(PoolInner {
                    files: Vec::new(),
                    evict: 0,
                    active: 0,
                    closed: false,
                }),
            }),
        })
    }

    /// Open a file in the pool.
    ///
    /// Equivalent to opening with the given `fopen`-style mode string,
    /// except that the handle is subject to paging. Evicts another file
    /// first when the pool is at capacity; fails with
    /// [`Error::PoolExhausted`] when nothing is evictable.
    pub fn open(&self, path: impl AsRef<Path>, mode: &str) -> Result<PooledFile> {
        let path = path.as_ref();
        let mode: OpenMode = mode.parse()?;

        reserve(&self.shared)?;
        let handle = match mode.open_options(true).open(path) {
            Ok(handle) => handle,
            Err(err) => {
                unreserve(&self.shared);
                return Err(err.into());
            }
        };

        let state = Arc::new(FileState {
            path: path.to_owned(),
            mode,
            active: AtomicBool::new(true),
            touch: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            slot: Mutex::new(FileSlot {
                handle: Some(handle),
                pos: 0,
            }),
        });

        {
            let mut inner = self.shared.inner.lock().map_err(|_| Error::PoolClosed)?;
            if inner.closed {
                inner.active -= 1;
                return Err(Error::PoolClosed);
            }
            inner.files.push(Arc::clone(&state));
        }

        tracing::debug!(path = %path.display(), "opened in pool");
        Ok(PooledFile {
            state,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of files currently holding an OS handle.
    pub fn active_count(&self) -> usize {
        self.shared.inner.lock().map(|inner| inner.active).unwrap_or(0)
    }

    /// Number of managed files, active or paged out.
    pub fn total_count(&self) -> usize {
        self.shared
            .inner
            .lock()
            .map(|inner| inner.files.len())
            .unwrap_or(0)
    }

    /// Maximum number of simultaneously active files.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Whether the given handle is managed by this pool.
    pub fn contains(&self, file: &PooledFile) -> bool {
        Arc::ptr_eq(&self.shared, &file.shared) && !file.state.closed.load(Ordering::Relaxed)
    }
}

impl Drop for FilePool {
    fn drop(&mut self) {
        let files = {
            let Ok(mut inner) = self.shared.inner.lock() else {
                return;
            };
            inner.closed = true;
            inner.active = 0;
            inner.evict = 0;
            std::mem::take(&mut inner.files)
        };
        for state in files {
            state.closed.store(true, Ordering::Relaxed);
            state.active.store(false, Ordering::Relaxed);
            if let Ok(mut slot) = state.slot.lock() {
                slot.handle = None;
            }
        }
        tracing::debug!("file pool shut down");
    }
}

impl std::fmt::Debug for FilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePool")
            .field("capacity", &self.capacity())
            .field("active", &self.active_count())
            .field("total", &self.total_count())
            .finish()
    }
}

/// Reserve one unit of pool capacity, evicting a victim if necessary.
///
/// Holds the pool mutex for bookkeeping only; the caller performs its OS
/// open outside the lock and must call [`unreserve`] if that fails.
fn reserve(shared: &PoolShared) -> Result<()> {
    let mut inner = shared.inner.lock().map_err(|_| Error::PoolClosed)?;
    if inner.closed {
        return Err(Error::PoolClosed);
    }
    if inner.active >= shared.capacity {
        page_out_locked(&mut inner)?;
    }
    inner.active += 1;
    Ok(())
}

/// Roll back a reservation after a failed OS open.
fn unreserve(shared: &PoolShared) {
    if let Ok(mut inner) = shared.inner.lock() {
        inner.active = inner.active.saturating_sub(1);
    }
}

/// Page out one file using the clock (second-chance) scan.
///
/// Starting at the persistent cursor, each visited active file gets its
/// touch flag cleared and one more chance; a file found with the flag
/// already clear is the victim. The walk is bounded at `2 * total` steps:
/// one full pass clears every touch flag, so a second pass must find a
/// victim or there is nothing evictable. Files whose slot is locked (I/O
/// in flight) are skipped like touched ones.
fn page_out_locked(inner: &mut PoolInner) -> Result<()> {
    let total = inner.files.len();
    if total == 0 {
        return Err(Error::PoolExhausted);
    }

    let mut idx = if inner.evict < total { inner.evict } else { 0 };
    for _ in 0..2 * total {
        let file = Arc::clone(&inner.files[idx]);
        if file.active.load(Ordering::Relaxed) && !file.touch.swap(false, Ordering::Relaxed) {
            if let Ok(mut slot) = file.slot.try_lock() {
                let pos = slot
                    .handle
                    .as_mut()
                    .map(|handle| handle.stream_position())
                    .transpose()?;
                if let Some(pos) = pos {
                    slot.pos = pos;
                }
                slot.handle = None;
                file.active.store(false, Ordering::Relaxed);
                inner.active -= 1;
                inner.evict = (idx + 1) % total;
                tracing::debug!(path = %file.path.display(), "paged out");
                return Ok(());
            }
        }
        idx = (idx + 1) % total;
    }
    Err(Error::PoolExhausted)
}

/// A managed file handle.
///
/// All I/O transparently reactivates the file first, evicting another pool
/// member when needed. Dropping the handle closes the file and removes it
/// from the pool; paging never destroys a managed file on its own.
pub struct PooledFile {
    state: Arc<FileState>,
    shared: Arc<PoolShared>,
}

impl PooledFile {
    /// The path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// The parsed open mode.
    pub fn mode(&self) -> OpenMode {
        self.state.mode
    }

    /// Whether the file currently holds an OS handle.
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Relaxed)
    }

    /// Ensure the file holds an OS handle, returning the locked slot.
    ///
    /// Fast path: already active, just mark it touched. Slow path: reserve
    /// pool capacity (possibly paging out a victim), then reopen the file
    /// and seek to its recorded offset with the pool mutex released.
    fn activate(&self) -> Result<MutexGuard<'_, FileSlot>> {
        if self.state.closed.load(Ordering::Relaxed) {
            return Err(Error::PoolClosed);
        }
        let mut slot = self.state.slot.lock().map_err(|_| Error::PoolClosed)?;
        if self.state.active.load(Ordering::Relaxed) {
            self.state.touch.store(true, Ordering::Relaxed);
            return Ok(slot);
        }

        reserve(&self.shared)?;
        let reopened = (|| -> Result<File> {
            let mut handle = self.state.mode.open_options(false).open(&self.state.path)?;
            handle.seek(SeekFrom::Start(slot.pos))?;
            Ok(handle)
        })();
        match reopened {
            Ok(handle) => {
                slot.handle = Some(handle);
                self.state.active.store(true, Ordering::Relaxed);
                self.state.touch.store(true, Ordering::Relaxed);
                tracing::debug!(path = %self.state.path.display(), "paged in");
                Ok(slot)
            }
            Err(err) => {
                unreserve(&self.shared);
                Err(err)
            }
        }
    }

    /// Read bytes at the current offset, reactivating the file if needed.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut slot = self.activate()?;
        let handle = slot.handle.as_mut().ok_or(Error::PoolClosed)?;
        Ok(handle.read(buffer)?)
    }

    /// Write bytes at the current offset, reactivating the file if needed.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut slot = self.activate()?;
        let handle = slot.handle.as_mut().ok_or(Error::PoolClosed)?;
        Ok(handle.write(data)?)
    }

    /// Seek, reactivating the file if needed. Returns the new offset.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut slot = self.activate()?;
        let handle = slot.handle.as_mut().ok_or(Error::PoolClosed)?;
        Ok(handle.seek(pos)?)
    }

    /// Total size of the file in bytes.
    pub fn size(&self) -> Result<u64> {
        let mut slot = self.activate()?;
        let handle = slot.handle.as_mut().ok_or(Error::PoolClosed)?;
        Ok(handle.metadata()?.len())
    }

    /// Explicitly page this file out, recording its offset and releasing
    /// its OS handle. No-op when already inactive.
    pub fn deactivate(&self) -> Result<()> {
        if !self.state.active.load(Ordering::Relaxed) {
            return Ok(());
        }
        let mut slot = self.state.slot.lock().map_err(|_| Error::PoolClosed)?;
        if !self.state.active.load(Ordering::Relaxed) {
            return Ok(());
        }
        let pos = slot
            .handle
            .as_mut()
            .map(|handle| handle.stream_position())
            .transpose()?;
        if let Some(pos) = pos {
            slot.pos = pos;
        }
        slot.handle = None;
        self.state.active.store(false, Ordering::Relaxed);

        let mut inner = self.shared.inner.lock().map_err(|_| Error::PoolClosed)?;
        inner.active = inner.active.saturating_sub(1);
        Ok(())
    }

    /// Close the file, removing it from the pool.
    ///
    /// Works regardless of activation state. Dropping the handle does the
    /// same; this form surfaces errors.
    pub fn close(self) -> Result<()> {
        self.close_impl()
    }

    fn close_impl(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let mut slot = self.state.slot.lock().map_err(|_| Error::PoolClosed)?;
        {
            let mut inner = self.shared.inner.lock().map_err(|_| Error::PoolClosed)?;
            if let Some(idx) = inner
                .files
                .iter()
                .position(|file| Arc::ptr_eq(file, &self.state))
            {
                inner.files.remove(idx);
                if inner.evict > idx {
                    inner.evict -= 1;
                }
                if inner.evict >= inner.files.len() {
                    inner.evict = 0;
                }
            }
            if self.state.active.swap(false, Ordering::Relaxed) {
                inner.active = inner.active.saturating_sub(1);
            }
        }
        slot.handle = None;
        tracing::debug!(path = %self.state.path.display(), "closed in pool");
        Ok(())
    }
}

impl Drop for PooledFile {
    fn drop(&mut self) {
        let _ = self.close_impl();
    }
}

impl std::fmt::Debug for PooledFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFile")
            .field("path", &self.state.path)
            .field("active", &self.is_active())
            .finish()
    }
}

fn to_io_error(err: Error) -> std::io::Error {
    match err {
        Error::Io(err) => err,
        other => std::io::Error::other(other),
    }
}

impl Read for PooledFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        PooledFile::read(self, buf).map_err(to_io_error)
    }
}

impl Write for PooledFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        PooledFile::write(self, buf).map_err(to_io_error)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut slot = self.activate().map_err(to_io_error)?;
        match slot.handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for PooledFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        PooledFile::seek(self, pos).map_err(to_io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            FilePool::with_capacity(0),
            Err(Error::BadCapacity)
        ));
    }

    #[test]
    fn test_mode_parsing() {
        let mode: OpenMode = "r".parse().unwrap();
        assert!(mode.is_read() && !mode.is_write());

        let mode: OpenMode = "r+b".parse().unwrap();
        assert!(mode.is_read() && mode.is_write() && mode.is_binary());

        let mode: OpenMode = "w+".parse().unwrap();
        assert!(mode.is_read() && mode.is_write());

        let mode: OpenMode = "ab".parse().unwrap();
        assert!(mode.is_append() && mode.is_binary());

        assert!(matches!("".parse::<OpenMode>(), Err(Error::InvalidMode(_))));
        assert!(matches!("x".parse::<OpenMode>(), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_capacity_invariant_across_operations() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(2).unwrap();

        let mut files = Vec::new();
        for i in 0..5 {
            let path = seed_file(&dir, &format!("f{i}.dat"), b"0123456789");
            files.push(pool.open(&path, "rb").unwrap());
            assert!(pool.active_count() <= pool.capacity());
        }
        assert_eq!(pool.total_count(), 5);
        assert_eq!(pool.active_count(), 2);

        // Reads on paged-out files reactivate them without breaking the cap.
        for file in &files {
            let mut buf = [0u8; 4];
            assert_eq!(file.read(&mut buf).unwrap(), 4);
            assert!(pool.active_count() <= pool.capacity());
        }

        // Deactivating and closing keep the count consistent.
        files[0].deactivate().unwrap();
        assert!(pool.active_count() <= pool.capacity());
        files.pop().unwrap().close().unwrap();
        assert_eq!(pool.total_count(), 4);
        assert!(pool.active_count() <= pool.capacity());
    }

    #[test]
    fn test_eviction_liveness_with_untouched_file() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(2).unwrap();

        let a = pool.open(seed_file(&dir, "a.dat", b"aaaa"), "rb").unwrap();
        let _b = pool.open(seed_file(&dir, "b.dat", b"bbbb"), "rb").unwrap();
        assert_eq!(pool.active_count(), 2);

        // Clear A's touch flag via one scan pass: opening C must succeed by
        // evicting it.
        let _c = pool.open(seed_file(&dir, "c.dat", b"cccc"), "rb").unwrap();
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.total_count(), 3);
        assert!(!a.is_active());
    }

    #[test]
    fn test_position_fidelity_across_paging() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(2).unwrap();
        let path = seed_file(&dir, "data.bin", b"abcdefghij");

        let file = pool.open(&path, "rb").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        file.deactivate().unwrap();
        assert!(!file.is_active());

        // Reactivation resumes at byte 4 exactly.
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"efgh");
    }

    #[test]
    fn test_write_survives_paging() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(1).unwrap();
        let path = dir.path().join("out.bin");

        let file = pool.open(&path, "wb").unwrap();
        assert_eq!(file.write(b"hello").unwrap(), 5);
        file.deactivate().unwrap();
        assert_eq!(file.write(b" world").unwrap(), 6);
        file.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_transparent_reactivation_under_pressure() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(1).unwrap();

        let a = pool.open(seed_file(&dir, "a.dat", b"aaaa"), "rb").unwrap();
        let b = pool.open(seed_file(&dir, "b.dat", b"bbbb"), "rb").unwrap();
        // Opening B evicted A.
        assert!(!a.is_active());
        assert!(b.is_active());

        // Reading A pages it back in, evicting B.
        let mut buf = [0u8; 2];
        a.read(&mut buf).unwrap();
        assert_eq!(&buf, b"aa");
        assert!(a.is_active());
        assert!(!b.is_active());
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_close_removes_from_pool() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(2).unwrap();

        let a = pool.open(seed_file(&dir, "a.dat", b"aaaa"), "rb").unwrap();
        assert!(pool.contains(&a));
        assert_eq!(pool.total_count(), 1);

        a.close().unwrap();
        assert_eq!(pool.total_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_pool_drop_invalidates_handles() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(2).unwrap();
        let file = pool.open(seed_file(&dir, "a.dat", b"aaaa"), "rb").unwrap();

        drop(pool);

        let mut buf = [0u8; 2];
        assert!(matches!(file.read(&mut buf), Err(Error::PoolClosed)));
    }

    #[test]
    fn test_io_trait_round_trip() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(1).unwrap();
        let path = seed_file(&dir, "io.bin", b"0123456789");

        let mut file = pool.open(&path, "rb").unwrap();
        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut contents).unwrap();
        assert_eq!(contents, b"0123456789");

        std::io::Seek::seek(&mut file, SeekFrom::Start(3)).unwrap();
        let mut tail = [0u8; 3];
        std::io::Read::read_exact(&mut file, &mut tail).unwrap();
        assert_eq!(&tail, b"345");
    }

    #[test]
    fn test_size_query() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_capacity(1).unwrap();
        let file = pool
            .open(seed_file(&dir, "sized.bin", b"12345678"), "rb")
            .unwrap();
        assert_eq!(file.size().unwrap(), 8);
    }
}
