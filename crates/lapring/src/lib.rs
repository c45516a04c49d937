//! lapring: fixed-capacity lock-free ring for shared-memory record
//! transport.
//!
//! A [`Queue<P, N>`] is one contiguous `#[repr(C)]` object (identification
//! header plus `N` slots) that can live in a memory-mapped file shared
//! between unrelated processes, or on the heap inside one process. It moves
//! fixed-size, bit-copyable records with microsecond-scale cross-process
//! round trips: no kernel synchronization object is ever touched, writers
//! publish through per-slot lap counters, and readers poll with private
//! cursors and share no state at all.
//!
//! ```text
//!   offset 0        type_tag        [1024 bytes, zero-terminated string]
//!   offset 1024     length_tag      [machine-word unsigned]
//!   offset 1032     write_counter   [u64, atomic]
//!   next boundary   slot[0] … slot[N-1]   slot = { payload: P, lap: u32 }
//! ```
//!
//! Writing and reading go through move-only handles that commit when they
//! drop (or not at all, after [`abandon`](WriteHandle::abandon)):
//!
//! ```
//! use lapring::{Queue, ReaderCursor};
//!
//! let queue = Queue::<u64, 16>::new_boxed(None);
//! let mut cursor = ReaderCursor::new();
//!
//! {
//!     let mut slot = queue.next_write_slot();
//!     *slot = 7;
//! } // handle drop publishes
//!
//! let record = queue.recv(&mut cursor);
//! assert_eq!(record.copied(), Some(7));
//! drop(record); // consuming a ready record advances the cursor
//! assert_eq!(cursor.count(), 1);
//! ```
//!
//! The queue is overwrite-on-wrap: a reader that falls more than one full
//! lap behind loses the overwritten records and stops seeing ready handles
//! until it fast-forwards its cursor. Use it to fan out the freshest data,
//! not as a durable log.
//!
//! Multiple producers use [`Queue::next_write_slot_locked`], which claims
//! slots with a sentinel compare-and-swap instead of a cross-process mutex.
//! Pick one writer discipline per queue and keep it for the queue's
//! lifetime.
//!
//! Shared-memory mapping lives in the companion `lapring-shm` crate; this
//! crate holds no file descriptors and performs no I/O.

mod cursor;
mod handle;
mod header;
mod invariants;
mod payload;
mod queue;

pub use cursor::ReaderCursor;
pub use handle::{LockedWriteHandle, ReadHandle, WriteHandle};
pub use header::{HeaderError, TYPE_TAG_LEN};
pub use payload::Payload;
pub use queue::{Queue, DEFAULT_CAPACITY};
