//! Debug assertion macros for the publication protocol.
//!
//! Only active in debug builds (`debug_assert!`), so the release hot paths
//! carry no checks.

/// Assert that a writer is publishing the sequence it acquired.
///
/// Holding two live non-locking write handles at once (or mixing them with
/// the locked discipline) moves the write counter under a handle's feet.
/// That misuse corrupts the ring silently in release builds; here it is loud.
///
/// Used in: `WriteHandle::drop()`, `LockedWriteHandle::drop()`
macro_rules! debug_assert_exclusive_writer {
    ($seq:expr, $counter:expr) => {
        debug_assert!(
            $seq == $counter,
            "publish out of turn: handle holds sequence {} but write counter is {}",
            $seq,
            $counter
        )
    };
}

/// Assert that in-place construction was handed zeroed memory.
///
/// The protocol depends on fresh lap counters and write counter reading
/// zero; construction over a dirty region produces a queue that looks
/// half-written to every reader.
///
/// Used in: `Queue::init_in_place()`
macro_rules! debug_assert_zeroed_region {
    ($length_tag:expr, $first_lap:expr) => {
        debug_assert!(
            $length_tag == 0 && $first_lap == 0,
            "in-place construction over non-zeroed memory (length tag {}, first lap {})",
            $length_tag,
            $first_lap
        )
    };
}

pub(crate) use debug_assert_exclusive_writer;
pub(crate) use debug_assert_zeroed_region;
