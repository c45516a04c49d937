use std::sync::atomic::AtomicU64;

use thiserror::Error;

/// Byte size of the identification string at the front of every queue.
pub const TYPE_TAG_LEN: usize = 1024;

/// Identification block at offset 0 of every queue.
///
/// Two processes disagreeing about the payload definition while sharing the
/// segment is a silent-corruption class of bug; this header is the contract.
/// `type_tag` must stay the first field so an attacher can inspect the tag
/// without knowing which payload type the segment was created for.
#[repr(C)]
pub(crate) struct Header {
    /// Printable, zero-terminated canonical name of the queue type.
    pub(crate) type_tag: [u8; TYPE_TAG_LEN],
    /// Total byte size of the queue object.
    pub(crate) length_tag: usize,
    /// Monotonic count of committed records. Advanced only by writer commit.
    pub(crate) write_counter: AtomicU64,
}

impl Header {
    /// Render `text` into a zero-padded tag, truncating if needed while
    /// keeping at least one terminating zero byte.
    pub(crate) fn render_tag(text: &str) -> [u8; TYPE_TAG_LEN] {
        let mut tag = [0u8; TYPE_TAG_LEN];
        let bytes = text.as_bytes();
        let n = bytes.len().min(TYPE_TAG_LEN - 1);
        tag[..n].copy_from_slice(&bytes[..n]);
        tag
    }

    pub(crate) fn tag_str(tag: &[u8; TYPE_TAG_LEN]) -> &str {
        let end = tag.iter().position(|&b| b == 0).unwrap_or(TYPE_TAG_LEN);
        std::str::from_utf8(&tag[..end]).unwrap_or("<non-utf8 tag>")
    }
}

/// Failure modes of [`Queue::confirm_header`](crate::Queue::confirm_header).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// The header is still all zeroes: the creating party has not finished
    /// populating it. Worth retrying for a bounded period.
    #[error("queue header not yet initialized")]
    Uninitialized,

    /// The stored total size differs from this attacher's view of the type.
    /// The two sides were compiled with different payload or capacity
    /// definitions; never a transient race.
    #[error("queue length mismatch: expected {expected} bytes, found {found}")]
    LengthMismatch {
        /// Byte size of the queue type this attacher was compiled with.
        expected: usize,
        /// Byte size recorded in the mapped header.
        found: usize,
    },

    /// The stored identification string differs from the expected one.
    #[error("queue type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// Tag this attacher computes from its own compile-time view.
        expected: String,
        /// Tag recorded in the mapped header.
        found: String,
    },
}

impl HeaderError {
    /// `true` for failures that can be a construction race worth retrying;
    /// a length mismatch never is.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::TypeMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_tag_round_trips_short_text() {
        let tag = Header::render_tag("Queue<i64, 4096>");
        assert_eq!(Header::tag_str(&tag), "Queue<i64, 4096>");
        // everything past the text stays zeroed
        assert!(tag[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn render_tag_truncates_and_keeps_terminator() {
        let long = "x".repeat(TYPE_TAG_LEN * 2);
        let tag = Header::render_tag(&long);
        assert_eq!(tag[TYPE_TAG_LEN - 1], 0);
        assert_eq!(Header::tag_str(&tag).len(), TYPE_TAG_LEN - 1);
    }

    #[test]
    fn recoverability_split() {
        assert!(HeaderError::Uninitialized.is_recoverable());
        assert!(HeaderError::TypeMismatch {
            expected: "a".into(),
            found: "b".into()
        }
        .is_recoverable());
        assert!(!HeaderError::LengthMismatch {
            expected: 1,
            found: 2
        }
        .is_recoverable());
    }
}
