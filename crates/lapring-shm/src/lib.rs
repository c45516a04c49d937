//! File-backed shared-memory container for [`lapring`] queues.
//!
//! The core queue is deliberately free of I/O: it only asks that somebody
//! hand it a zeroed region of exactly `size_of::<Queue<P, N>>()` bytes and
//! construct it in place once. This crate is that somebody for Unix
//! systems: it creates or opens a backing file (on Linux, put it under
//! `/dev/shm` to stay off the disk), maps it `MAP_SHARED`, constructs the
//! queue on first creation, and header-verifies it on every attach.
//!
//! The create/attach race is settled by the filesystem: whoever wins
//! `O_CREAT | O_EXCL` constructs, everyone else attaches and retries header
//! confirmation briefly while the creator finishes.
//!
//! ```no_run
//! use lapring_shm::{ShmOptions, ShmQueue};
//! use lapring::ReaderCursor;
//!
//! let queue = ShmQueue::<i64, 4096>::create_or_attach(
//!     "/dev/shm/telemetry.queue",
//!     ShmOptions::default(),
//! )?;
//!
//! queue.push(42);
//!
//! let mut cursor = ReaderCursor::new();
//! if let Some(value) = queue.recv(&mut cursor).copied() {
//!     println!("got {value}");
//! }
//! # Ok::<(), lapring_shm::ShmError>(())
//! ```

mod error;

pub use error::ShmError;

use std::fs::{File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use lapring::{Payload, Queue, DEFAULT_CAPACITY};
use tracing::{debug, warn};

/// How long an attacher keeps retrying header confirmation before giving up.
const ATTACH_RETRY_WINDOW: Duration = Duration::from_secs(2);

/// Pause between confirmation attempts.
const ATTACH_RETRY_BACKOFF: Duration = Duration::from_millis(250);

const PAGE_SIZE: usize = 4096;

/// Mapping options for [`ShmQueue::create_or_attach`].
#[derive(Debug, Clone, Copy)]
pub struct ShmOptions<'a> {
    /// Map the region writable. Readers-only processes can attach with
    /// `false` and get a `PROT_READ` mapping; they must then stay off the
    /// write API (the mapping, not the type system, enforces it: a write
    /// through a read-only mapping faults).
    pub writable: bool,
    /// Pin the mapped pages with `mlock(2)` so the hot path never takes a
    /// major fault. Needs privileges; failure is logged and ignored.
    pub lock_pages: bool,
    /// Payload name override recorded in (and checked against) the
    /// identification header. Required whenever the segment is shared
    /// between separately built binaries; both sides must pass the same
    /// value.
    pub payload_name: Option<&'a str>,
}

impl Default for ShmOptions<'_> {
    fn default() -> Self {
        Self {
            writable: true,
            lock_pages: false,
            payload_name: None,
        }
    }
}

/// A [`Queue`] living in a file-backed shared mapping.
///
/// Dereferences to the queue; dropping unmaps this process's view and
/// leaves the shared state untouched. Remove the backing file explicitly
/// with [`ShmQueue::unlink`] when the queue is retired.
pub struct ShmQueue<P: Payload, const N: usize = DEFAULT_CAPACITY> {
    mapping: RawMapping,
    path: PathBuf,
    _file: File,
    _queue: PhantomData<Queue<P, N>>,
}

impl<P: Payload, const N: usize> std::fmt::Debug for ShmQueue<P, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmQueue")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// SAFETY: the mapping is owned by this handle and the queue inside it is
// Sync; nothing here is tied to the creating thread.
unsafe impl<P: Payload, const N: usize> Send for ShmQueue<P, N> {}
unsafe impl<P: Payload, const N: usize> Sync for ShmQueue<P, N> {}

impl<P: Payload, const N: usize> ShmQueue<P, N> {
    /// Create the backing file and construct the queue, or attach to an
    /// existing one.
    ///
    /// The first caller to win the exclusive-create race becomes the
    /// creator: it sizes the file (the kernel zero-fills it), constructs
    /// the queue through a temporary writable mapping, and then remaps with
    /// the requested protection. Every other caller attaches: it waits for
    /// the file to reach its expected size, maps it, and retries
    /// [`Queue::confirm_header`] for up to 2 seconds with 250 ms back-off
    /// to tolerate a creator that has not finished.
    pub fn create_or_attach(
        path: impl AsRef<Path>,
        options: ShmOptions<'_>,
    ) -> Result<Self, ShmError> {
        let path = path.as_ref();
        let len = mem::size_of::<Queue<P, N>>();

        let created = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => {
                file.set_len(len as u64).map_err(|source| ShmError::Io {
                    path: path.into(),
                    source,
                })?;
                let staging = RawMapping::new(&file, path, len, true)?;
                // SAFETY: we exclusively created the file and sized it to
                // exactly `len` zero-filled bytes; the mapping is
                // page-aligned and nobody else constructs (they lost the
                // create_new race and are waiting in confirm_header).
                unsafe {
                    Queue::<P, N>::init_in_place(staging.ptr.cast(), options.payload_name);
                }
                debug!(path = %path.display(), bytes = len, "created shared queue");
                true
                // staging drops here; the file keeps the contents
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => false,
            Err(source) => {
                return Err(ShmError::Io {
                    path: path.into(),
                    source,
                })
            }
        };

        let file = OpenOptions::new()
            .read(true)
            .write(options.writable)
            .open(path)
            .map_err(|source| ShmError::Io {
                path: path.into(),
                source,
            })?;

        if !created {
            wait_for_size(&file, path, len)?;
        }

        let mapping = RawMapping::new(&file, path, len, options.writable)?;
        if options.lock_pages {
            mapping.lock_pages();
        }
        mapping.pretouch();

        let shm = Self {
            mapping,
            path: path.into(),
            _file: file,
            _queue: PhantomData,
        };

        shm.confirm_with_retry(options.payload_name)?;
        debug!(path = %shm.path.display(), created, "shared queue ready");
        Ok(shm)
    }

    fn confirm_with_retry(&self, payload_name: Option<&str>) -> Result<(), ShmError> {
        let start = Instant::now();
        loop {
            match self.confirm_header(payload_name) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_recoverable() && start.elapsed() < ATTACH_RETRY_WINDOW => {
                    debug!(error = %err, "header not confirmed yet; retrying");
                    thread::sleep(ATTACH_RETRY_BACKOFF);
                }
                Err(err) if err.is_recoverable() => {
                    return Err(ShmError::AttachTimeout {
                        path: self.path.clone(),
                        waited: start.elapsed(),
                        last: err,
                    });
                }
                Err(err) => return Err(ShmError::Header(err)),
            }
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the backing file.
    ///
    /// Existing mappings stay alive (the kernel keeps the pages until the
    /// last one unmaps); the next `create_or_attach` on this path starts a
    /// fresh queue. Removing a file that is already gone is not an error.
    pub fn unlink(path: impl AsRef<Path>) -> Result<(), ShmError> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ShmError::Io {
                path: path.into(),
                source,
            }),
        }
    }
}

impl<P: Payload, const N: usize> Deref for ShmQueue<P, N> {
    type Target = Queue<P, N>;

    fn deref(&self) -> &Queue<P, N> {
        // SAFETY: the mapping is exactly `size_of::<Queue<P, N>>()` bytes,
        // page-aligned (mmap), and holds a queue that we either constructed
        // ourselves or header-confirmed at attach time.
        unsafe { &*self.mapping.ptr.cast::<Queue<P, N>>().cast_const() }
    }
}

/// Wait for a racing creator to finish sizing the file.
///
/// A zero-length file means the creator is between `create_new` and
/// `set_len`; any other wrong size means the path holds something that was
/// never this queue (stale file from a different build), which no amount of
/// waiting fixes. A too-small file cannot even be mapped safely, so that
/// case surfaces as the length mismatch it semantically is.
fn wait_for_size(file: &File, path: &Path, expected: usize) -> Result<(), ShmError> {
    let start = Instant::now();
    loop {
        let found = file
            .metadata()
            .map_err(|source| ShmError::Io {
                path: path.into(),
                source,
            })?
            .len() as usize;

        if found >= expected {
            // a larger file is left for confirm_header to judge: its header
            // records the size the creator was compiled with
            return Ok(());
        }
        if found != 0 {
            return Err(ShmError::Header(lapring::HeaderError::LengthMismatch {
                expected,
                found,
            }));
        }
        if start.elapsed() >= ATTACH_RETRY_WINDOW {
            return Err(ShmError::Io {
                path: path.into(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    "backing file never reached its expected size",
                ),
            });
        }
        thread::sleep(ATTACH_RETRY_BACKOFF);
    }
}

/// Owned `mmap`/`munmap` pair.
struct RawMapping {
    ptr: *mut u8,
    len: usize,
}

impl RawMapping {
    fn new(file: &File, path: &Path, len: usize, writable: bool) -> Result<Self, ShmError> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        // SAFETY: mapping a descriptor we own, offset 0, length checked by
        // the caller against the file size.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Io {
                path: path.into(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
        })
    }

    fn lock_pages(&self) {
        // SAFETY: locking our own mapping.
        if unsafe { libc::mlock(self.ptr.cast(), self.len) } != 0 {
            warn!(
                error = %io::Error::last_os_error(),
                "mlock failed; queue pages stay swappable"
            );
        }
    }

    /// Fault every page in up front so the hot path never takes one.
    fn pretouch(&self) {
        let mut sum = 0u8;
        for offset in (0..self.len).step_by(PAGE_SIZE) {
            // SAFETY: offset < len; the volatile read keeps the loop from
            // being optimized into nothing.
            sum = sum.wrapping_add(unsafe { ptr::read_volatile(self.ptr.add(offset)) });
        }
        debug!(
            pages = self.len.div_ceil(PAGE_SIZE),
            checksum = sum,
            "pretouched mapping"
        );
    }
}

impl Drop for RawMapping {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region mmap returned; the shared
        // queue state itself is untouched.
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
