//! Scoped-commit handles.
//!
//! All three handle kinds obey the same lifecycle: they are move-only, so
//! there is never more than one live handle per pending operation (moving
//! one leaves nothing behind to double-commit); [`abandon`] makes the
//! eventual drop a no-op; and drop itself is the edge that publishes
//! (writers) or consumes (readers).
//!
//! [`abandon`]: WriteHandle::abandon

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;

use crate::cursor::ReaderCursor;
use crate::invariants::debug_assert_exclusive_writer;
use crate::payload::Payload;
use crate::queue::Queue;

// ---------------------------------------------------------------------
// NON-LOCKING WRITER
// ---------------------------------------------------------------------

/// In-place write access granted by [`Queue::next_write_slot`].
///
/// Dereferences to the payload of the destination slot itself: the record is
/// assembled directly in shared memory and becomes visible to readers only
/// when the handle drops. Call [`abandon`](WriteHandle::abandon) to back out
/// without publishing.
pub struct WriteHandle<'a, P: Payload, const N: usize> {
    queue: Option<&'a Queue<P, N>>,
    seq: u64,
}

impl<'a, P: Payload, const N: usize> WriteHandle<'a, P, N> {
    pub(crate) fn new(queue: &'a Queue<P, N>, seq: u64) -> Self {
        Self {
            queue: Some(queue),
            seq,
        }
    }

    /// Forget the pending record; the drop will publish nothing.
    pub fn abandon(&mut self) {
        self.queue = None;
    }
}

impl<P: Payload, const N: usize> Deref for WriteHandle<'_, P, N> {
    type Target = P;

    fn deref(&self) -> &P {
        let queue = self.queue.expect("write handle already abandoned");
        // SAFETY: until the lap counter matures at drop, no reader looks at
        // this slot, and the single-live-handle discipline means no other
        // writer owns it either.
        unsafe { &*queue.slot(self.seq).payload.get() }
    }
}

impl<P: Payload, const N: usize> DerefMut for WriteHandle<'_, P, N> {
    fn deref_mut(&mut self) -> &mut P {
        let queue = self.queue.expect("write handle already abandoned");
        // SAFETY: as in `deref`; exclusive access to the unpublished slot.
        unsafe { &mut *queue.slot(self.seq).payload.get() }
    }
}

impl<P: Payload, const N: usize> Drop for WriteHandle<'_, P, N> {
    fn drop(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        debug_assert_exclusive_writer!(self.seq, queue.write_count_relaxed());
        queue.publish(self.seq);
    }
}

// ---------------------------------------------------------------------
// LOCKED WRITER
// ---------------------------------------------------------------------

/// Staged write access granted by [`Queue::next_write_slot_locked`].
///
/// Dereferences to a handle-local copy, not to shared memory. The drop
/// claims the destination slot (sentinel compare-and-swap on its lap
/// counter), copies the staged bytes over, and publishes, so concurrent
/// holders of these handles serialize only on the claim itself.
pub struct LockedWriteHandle<'a, P: Payload, const N: usize> {
    queue: Option<&'a Queue<P, N>>,
    staged: P,
}

impl<'a, P: Payload, const N: usize> LockedWriteHandle<'a, P, N> {
    pub(crate) fn new(queue: &'a Queue<P, N>) -> Self {
        // SAFETY: `Payload` guarantees the all-zero pattern is a valid `P`.
        let staged = unsafe { mem::zeroed() };
        Self {
            queue: Some(queue),
            staged,
        }
    }

    /// Forget the staged record; the drop will publish nothing.
    pub fn abandon(&mut self) {
        self.queue = None;
    }
}

impl<P: Payload, const N: usize> Deref for LockedWriteHandle<'_, P, N> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.staged
    }
}

impl<P: Payload, const N: usize> DerefMut for LockedWriteHandle<'_, P, N> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.staged
    }
}

impl<P: Payload, const N: usize> Drop for LockedWriteHandle<'_, P, N> {
    fn drop(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        let seq = queue.claim_write_slot();
        // SAFETY: the claim (or its watchdog break) made this writer the
        // slot's unique owner for this lap; readers treat the parked
        // sentinel as not-ready and will not touch the bytes until the lap
        // store inside `publish`.
        unsafe { *queue.slot(seq).payload.get() = self.staged };
        // The lap is derived from the sequence the claim captured, not from
        // a fresh read of the write counter: another producer cannot have
        // advanced it past our claim, and re-reading would mis-lap on ring
        // wrap if it ever did.
        debug_assert_exclusive_writer!(seq, queue.write_count_relaxed());
        queue.publish(seq);
    }
}

// ---------------------------------------------------------------------
// READER
// ---------------------------------------------------------------------

/// Tentative read granted by [`Queue::recv`].
///
/// Ready exactly when the slot under the cursor carries the lap the cursor
/// expects. Dropping a ready handle consumes the record (advances the
/// cursor); dropping a not-ready or abandoned handle changes nothing, so
/// polling is just calling [`Queue::recv`] in a loop.
pub struct ReadHandle<'a, P: Payload, const N: usize> {
    queue: Option<&'a Queue<P, N>>,
    cursor: &'a mut ReaderCursor,
    ready: bool,
}

impl<'a, P: Payload, const N: usize> ReadHandle<'a, P, N> {
    pub(crate) fn new(queue: &'a Queue<P, N>, cursor: &'a mut ReaderCursor) -> Self {
        let expected = Queue::<P, N>::lap_for(cursor.count());
        let lap = queue
            .slot(cursor.count())
            .lap_counter
            .load(Ordering::Acquire);
        Self {
            queue: Some(queue),
            ready: lap == expected,
            cursor,
        }
    }

    /// `true` when the record under the cursor has been published for the
    /// lap this reader expects.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// The record, if ready.
    pub fn payload(&self) -> Option<&P> {
        if !self.ready {
            return None;
        }
        let queue = self.queue?;
        // SAFETY: the Acquire load that set `ready` synchronized with the
        // publishing Release store, so the payload bytes are fully written.
        // Writers reuse the slot only a full lap later, which cannot happen
        // while this reader still expects the current lap, unless the
        // queue overruns, in which case the record was forfeit anyway and
        // `P` is inert bytes.
        Some(unsafe { &*queue.slot(self.cursor.count()).payload.get() })
    }

    /// Copy the record out, if ready.
    pub fn copied(&self) -> Option<P> {
        self.payload().copied()
    }

    /// Leave the cursor untouched even if the record was ready.
    pub fn abandon(&mut self) {
        self.queue = None;
    }
}

impl<P: Payload, const N: usize> Drop for ReadHandle<'_, P, N> {
    fn drop(&mut self) {
        if self.ready && self.queue.take().is_some() {
            self.cursor.advance();
        }
    }
}
