use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use tracing::warn;

use crate::cursor::ReaderCursor;
use crate::handle::{LockedWriteHandle, ReadHandle, WriteHandle};
use crate::header::{Header, HeaderError, TYPE_TAG_LEN};
use crate::invariants::debug_assert_zeroed_region;
use crate::payload::Payload;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The queue has no head pointer and no per-reader state: publication is
// carried entirely by per-slot lap counters, plus one monotonic write
// counter that writers use to find their slot.
//
// ## Lap counters (per-slot publication)
//
// A slot written on its k-th pass through the ring carries lap counter k
// (zero means never written). A reader whose cursor is `c` expects lap
// `c / N + 1` at slot `c & (N-1)`; any other value (an older lap, a newer
// lap, or a claim sentinel) reads as "not ready".
//
// ## Ordering protocol
//
// **Writer (non-locking):**
// 1. Mutate the payload in place (plain stores; no reader looks at the slot
//    until the lap matures)
// 2. Store `lap_counter = m/N + 1` with Release (publishes the payload)
// 3. Store `write_counter = m + 1` with Release (commit edge for writers)
//
// **Writer (locked):**
// 1. CAS `lap_counter: m/N -> sentinel` with AcqRel (claims the slot)
// 2. Copy the staged payload into the slot (plain stores; readers treat the
//    sentinel as not-ready)
// 3/4. Publish as above, using the `m` captured by the successful CAS
//
// **Reader:**
// 1. Load `lap_counter` with Acquire; compare against the expected lap
// 2. Read the payload (synchronized by the Acquire/Release pair on the lap)
// 3. Advance the private cursor (no shared store at all)
//
// `write_counter` never carries correctness on the read path; it is advisory
// for backlog accounting and overrun detection.
//
// =============================================================================

/// Capacity used when the const parameter is left to its default.
pub const DEFAULT_CAPACITY: usize = 4096;

/// How long a locked writer may spin on a claim before breaking the lock.
pub(crate) const CLAIM_SPIN_LIMIT: Duration = Duration::from_secs(1);

/// One cell of the ring: a payload and the lap counter that publishes it.
#[repr(C)]
pub(crate) struct Slot<P> {
    pub(crate) payload: UnsafeCell<P>,
    pub(crate) lap_counter: AtomicU32,
}

/// Fixed-capacity broadcast ring of bit-copyable records.
///
/// The queue is one contiguous `#[repr(C)]` object, an identification header
/// followed by `N` slots, designed to live inside a shared-memory mapping. It holds
/// no pointers, so peers may map it at different addresses; once constructed
/// its own address must never change. It is never copied or cloned, and its
/// drop touches no shared state.
///
/// Writers pick exactly one discipline for the queue's lifetime:
///
/// - [`next_write_slot`](Queue::next_write_slot): a single producer writing
///   records in place (lowest latency);
/// - [`next_write_slot_locked`](Queue::next_write_slot_locked): any number
///   of producers staging records locally and claiming slots by sentinel
///   compare-and-swap.
///
/// Readers poll with [`recv`](Queue::recv) against their own
/// [`ReaderCursor`]; the queue never waits for them. A reader that falls a
/// full lap behind loses the overwritten records; this is a transport for
/// the freshest data, not a durable log.
#[repr(C)]
pub struct Queue<P: Payload, const N: usize = DEFAULT_CAPACITY> {
    pub(crate) header: Header,
    pub(crate) slots: [Slot<P>; N],
}

// SAFETY: all shared-state mutation goes through the atomics (lap counters,
// write counter) with the orderings documented above. Payload cells are
// written only by the slot's owning writer for a given lap and read only by
// readers that observed the publishing lap store.
unsafe impl<P: Payload, const N: usize> Send for Queue<P, N> {}
unsafe impl<P: Payload, const N: usize> Sync for Queue<P, N> {}

impl<P: Payload, const N: usize> Queue<P, N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(
        N.is_power_of_two(),
        "queue capacity must be a power of two"
    );

    const MASK: u64 = (N - 1) as u64;

    /// Number of slots. Fixed at compile time.
    #[inline]
    pub const fn capacity() -> usize {
        N
    }

    #[inline]
    pub(crate) const fn index_of(seq: u64) -> usize {
        (seq & Self::MASK) as usize
    }

    /// Lap carried by the record at sequence `seq`; 1-based so the
    /// zero-initialized lap counter naturally means "never written".
    #[inline]
    pub(crate) const fn lap_for(seq: u64) -> u32 {
        (seq / N as u64 + 1) as u32
    }

    #[inline]
    pub(crate) fn slot(&self, seq: u64) -> &Slot<P> {
        &self.slots[Self::index_of(seq)]
    }

    // ---------------------------------------------------------------------
    // CONSTRUCTION & ATTACH
    // ---------------------------------------------------------------------

    /// Construct a queue in place over zeroed memory.
    ///
    /// This is the creator side of a shared segment: the collaborator maps
    /// `size_of::<Self>()` zero-filled bytes and calls this exactly once.
    /// Attachers never construct; they validate the existing region with
    /// [`confirm_header`](Queue::confirm_header).
    ///
    /// `payload_name` overrides the compiler-derived identification string.
    /// The override is required whenever the segment is shared between
    /// separately built binaries: `std::any::type_name` output is not
    /// guaranteed stable across compiler versions or crate paths.
    ///
    /// # Safety
    ///
    /// `this` must be non-null, aligned for `Self`, point to
    /// `size_of::<Self>()` bytes of zeroed memory that stays valid for the
    /// queue's lifetime, and no other party may access the region before
    /// this returns.
    pub unsafe fn init_in_place(this: *mut Self, payload_name: Option<&str>) {
        let _: () = Self::CAPACITY_IS_POWER_OF_TWO;

        debug_assert_zeroed_region!(
            ptr::addr_of!((*this).header.length_tag).read(),
            ptr::addr_of!((*this).slots[0].lap_counter).read().into_inner()
        );

        // Length before tag: a half-written header reads as uninitialized
        // (tag still zero), never as a length mismatch.
        ptr::addr_of_mut!((*this).header.length_tag).write(mem::size_of::<Self>());
        ptr::addr_of_mut!((*this).header.type_tag).write(Self::expected_tag(payload_name));
        // write_counter and every lap counter rely on the zeroed region.
    }

    /// Allocate and construct an in-process queue on the heap.
    ///
    /// Threads sharing one address space do not need a mapped file; the
    /// queue just needs a stable address, which the box provides. The
    /// allocation is zeroed first so construction is identical to the
    /// shared-memory path.
    pub fn new_boxed(payload_name: Option<&str>) -> Box<Self> {
        let _: () = Self::CAPACITY_IS_POWER_OF_TWO;

        let layout = Layout::new::<Self>();
        // SAFETY: the layout is never zero-sized (the header alone is over a
        // kilobyte). `alloc_zeroed` hands us exclusive zeroed memory, which
        // is exactly what `init_in_place` requires, and `Box::from_raw`
        // takes ownership of the allocation.
        unsafe {
            let raw = alloc::alloc_zeroed(layout).cast::<Self>();
            if raw.is_null() {
                alloc::handle_alloc_error(layout);
            }
            Self::init_in_place(raw, payload_name);
            Box::from_raw(raw)
        }
    }

    fn expected_tag(payload_name: Option<&str>) -> [u8; TYPE_TAG_LEN] {
        match payload_name {
            Some(name) => Header::render_tag(&format!("Queue<{name}, {N}>")),
            None => Header::render_tag(std::any::type_name::<Self>()),
        }
    }

    /// Check that this mapped region holds a queue of exactly this payload
    /// type and capacity.
    ///
    /// Every attacher must call this (with the same `payload_name` the
    /// creator used) before touching the queue. Failures for which
    /// [`HeaderError::is_recoverable`] returns `true` are worth retrying
    /// briefly: the creator may still be populating the header.
    pub fn confirm_header(&self, payload_name: Option<&str>) -> Result<(), HeaderError> {
        if self.header.type_tag[0] == 0 {
            return Err(HeaderError::Uninitialized);
        }
        let expected_len = mem::size_of::<Self>();
        if self.header.length_tag != expected_len {
            return Err(HeaderError::LengthMismatch {
                expected: expected_len,
                found: self.header.length_tag,
            });
        }
        let expected = Self::expected_tag(payload_name);
        if expected != self.header.type_tag {
            return Err(HeaderError::TypeMismatch {
                expected: Header::tag_str(&expected).to_owned(),
                found: Header::tag_str(&self.header.type_tag).to_owned(),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // WRITER API
    // ---------------------------------------------------------------------

    /// Exclusive write access to the next slot, in place.
    ///
    /// The lowest-latency path: the record is built directly in its
    /// destination slot and published when the handle drops. Because the
    /// payload bytes are staged in shared memory before the lap counter
    /// matures, this discipline tolerates **at most one live non-locking
    /// handle per queue**. A second concurrent one, or any mix with the
    /// locked discipline, leaves readers free to observe torn records.
    pub fn next_write_slot(&self) -> WriteHandle<'_, P, N> {
        WriteHandle::new(self, self.header.write_counter.load(Ordering::Acquire))
    }

    /// Write access for concurrently committing producers.
    ///
    /// The record is staged in a handle-local copy; the drop claims the
    /// destination slot with a sentinel compare-and-swap and only then
    /// copies the bytes over, so any number of producers may hold these
    /// handles at once.
    pub fn next_write_slot_locked(&self) -> LockedWriteHandle<'_, P, N> {
        LockedWriteHandle::new(self)
    }

    /// Commit one record through the non-locking discipline.
    pub fn push(&self, value: P) {
        let mut slot = self.next_write_slot();
        *slot = value;
    }

    /// Commit one record through the locked discipline.
    pub fn push_locked(&self, value: P) {
        let mut slot = self.next_write_slot_locked();
        *slot = value;
    }

    /// Claim the current write slot for a locked commit; returns the claimed
    /// sequence number.
    ///
    /// The sentinel is a lap value no reader expects for another 2³¹ laps of
    /// this slot, so claimed slots read as not-ready without any reader
    /// coordination. If the claim cannot be won within [`CLAIM_SPIN_LIMIT`],
    /// a producer died while holding the sentinel; the claim loop breaks
    /// and publication proceeds anyway to keep the queue live.
    pub(crate) fn claim_write_slot(&self) -> u64 {
        let backoff = Backoff::new();
        let mut spin_start: Option<Instant> = None;
        loop {
            let seq = self.header.write_counter.load(Ordering::Acquire);
            let current_lap = (seq / N as u64) as u32;
            let sentinel = current_lap.wrapping_add(u32::MAX / 2);
            if self
                .slot(seq)
                .lap_counter
                .compare_exchange(current_lap, sentinel, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return seq;
            }
            let started = *spin_start.get_or_insert_with(Instant::now);
            if started.elapsed() >= CLAIM_SPIN_LIMIT {
                warn!(
                    slot = Self::index_of(seq),
                    write_count = seq,
                    expected_lap = current_lap,
                    "could not claim write slot within 1s; breaking the lock"
                );
                return seq;
            }
            backoff.snooze();
        }
    }

    /// Publish the record at `seq`: mature the lap counter, then advance the
    /// write counter. The two Release stores must retire in this order: the
    /// lap store is what readers synchronize with, and the counter store is the
    /// commit edge the next writer keys on.
    pub(crate) fn publish(&self, seq: u64) {
        self.slot(seq)
            .lap_counter
            .store(Self::lap_for(seq), Ordering::Release);
        self.header.write_counter.store(seq + 1, Ordering::Release);
    }

    pub(crate) fn write_count_relaxed(&self) -> u64 {
        self.header.write_counter.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // READER API
    // ---------------------------------------------------------------------

    /// Tentative read of the record at `cursor`.
    ///
    /// The handle is ready exactly when the slot's lap counter has matured
    /// to the lap the cursor expects; dropping a ready handle consumes the
    /// record by advancing the cursor. Readers store nothing in the queue.
    ///
    /// A reader lapped by the writers stops seeing ready handles: the
    /// records under its cursor were overwritten, and the queue does not
    /// silently skip them. Detect the condition with
    /// [`is_overrun`](Queue::is_overrun) and recover with
    /// [`ReaderCursor::fast_forward_to`].
    pub fn recv<'a>(&'a self, cursor: &'a mut ReaderCursor) -> ReadHandle<'a, P, N> {
        ReadHandle::new(self, cursor)
    }

    // ---------------------------------------------------------------------
    // OBSERVABILITY
    // ---------------------------------------------------------------------

    /// Count of records committed to this queue across all time.
    ///
    /// Advisory: readers key on lap counters, not on this value.
    pub fn write_count(&self) -> u64 {
        self.header.write_counter.load(Ordering::Acquire)
    }

    /// Records committed but not yet consumed by this reader.
    ///
    /// May be momentarily negative: a reader can observe a matured lap
    /// counter and advance before it observes the matching write-counter
    /// increment.
    pub fn backlog(&self, cursor: &ReaderCursor) -> i64 {
        self.write_count().wrapping_sub(cursor.count()) as i64
    }

    /// `true` once the writers have lapped this reader and overwritten
    /// records it never consumed.
    pub fn is_overrun(&self, cursor: &ReaderCursor) -> bool {
        self.backlog(cursor) > N as i64
    }
}
