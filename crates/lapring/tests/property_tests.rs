//! Randomized checks of the publication protocol against a simple model.
//!
//! The model is just the list of committed values: a reader at cursor `c`
//! must see value `c` exactly when `c < write_count <= c + capacity`
//! (anything later means the slot was overwritten, anything earlier means
//! the record does not exist yet).

use proptest::prelude::*;

use lapring::{Queue, ReaderCursor};

#[derive(Debug, Clone)]
enum Op {
    Write { locked: bool, abandon: bool },
    Read,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<bool>(), any::<bool>())
            .prop_map(|(locked, abandon)| Op::Write { locked, abandon }),
        Just(Op::Read),
    ]
}

proptest! {
    #[test]
    fn interleaved_ops_match_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        const CAP: usize = 8;
        let queue = Queue::<u64, CAP>::new_boxed(None);
        let mut cursor = ReaderCursor::new();
        let mut committed: Vec<u64> = Vec::new();
        let mut next_value = 0u64;

        for op in ops {
            match op {
                Op::Write { locked, abandon } => {
                    let value = next_value;
                    next_value += 1;
                    if locked {
                        let mut handle = queue.next_write_slot_locked();
                        *handle = value;
                        if abandon {
                            handle.abandon();
                        }
                    } else {
                        let mut handle = queue.next_write_slot();
                        *handle = value;
                        if abandon {
                            handle.abandon();
                        }
                    }
                    if !abandon {
                        committed.push(value);
                    }
                }
                Op::Read => {
                    let c = cursor.count();
                    let write_count = committed.len() as u64;
                    let expect_ready = c < write_count && write_count <= c + CAP as u64;

                    let record = queue.recv(&mut cursor);
                    prop_assert_eq!(record.is_ready(), expect_ready);
                    if expect_ready {
                        prop_assert_eq!(record.copied(), Some(committed[c as usize]));
                    }
                }
            }
        }

        prop_assert_eq!(queue.write_count(), committed.len() as u64);
    }

    #[test]
    fn payload_bytes_round_trip(bytes in prop::array::uniform32(any::<u8>())) {
        let queue = Queue::<[u8; 32], 4>::new_boxed(None);
        queue.push(bytes);

        let mut cursor = ReaderCursor::new();
        let record = queue.recv(&mut cursor);
        prop_assert_eq!(record.copied(), Some(bytes));
    }

    #[test]
    fn drained_reader_sees_a_contiguous_suffix(
        writes in 1usize..64,
        skip in 0u64..64,
    ) {
        const CAP: usize = 16;
        let queue = Queue::<u64, CAP>::new_boxed(None);
        for i in 0..writes as u64 {
            queue.push_locked(i);
        }

        let mut cursor = ReaderCursor::starting_at(skip);
        let mut seen = Vec::new();
        loop {
            let record = queue.recv(&mut cursor);
            match record.copied() {
                Some(v) => seen.push(v),
                None => break,
            }
        }

        let write_count = writes as u64;
        if skip >= write_count || write_count > skip + CAP as u64 {
            // nothing readable: either ahead of the stream or lapped
            prop_assert!(seen.is_empty());
        } else {
            let expected: Vec<u64> = (skip..write_count).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}
