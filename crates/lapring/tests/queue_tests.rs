use lapring::{Payload, Queue, ReaderCursor};

#[derive(Clone, Copy)]
#[repr(C)]
struct Record {
    i: i32,
    s: [u8; 16],
}

// SAFETY: repr(C), fields are inert scalars, every bit pattern is valid.
unsafe impl Payload for Record {}

fn tagged(i: i32, text: &str) -> Record {
    let mut s = [0u8; 16];
    s[..text.len()].copy_from_slice(text.as_bytes());
    Record { i, s }
}

#[test]
fn empty_queue_read_is_not_ready() {
    let queue = Queue::<Record, 4>::new_boxed(None);
    let mut cursor = ReaderCursor::new();
    {
        let record = queue.recv(&mut cursor);
        assert!(!record.is_ready());
        assert!(record.payload().is_none());
    }
    assert_eq!(cursor.count(), 0);
}

#[test]
fn single_record_round_trip() {
    let queue = Queue::<Record, 4>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    {
        let mut slot = queue.next_write_slot();
        *slot = tagged(7, "hi");
    }
    assert_eq!(queue.write_count(), 1);

    {
        let record = queue.recv(&mut cursor);
        let payload = record.payload().expect("published record must be ready");
        assert_eq!(payload.i, 7);
        assert_eq!(&payload.s[..2], b"hi");
    }
    assert_eq!(cursor.count(), 1);

    assert!(!queue.recv(&mut cursor).is_ready());
}

fn drain(queue: &Queue<Record, 1024>, cursor: &mut ReaderCursor) -> Vec<i32> {
    let mut seen = Vec::new();
    loop {
        let record = queue.recv(cursor);
        match record.copied() {
            Some(r) => seen.push(r.i),
            None => break,
        }
    }
    seen
}

#[test]
fn abandoned_writes_leave_no_trace() {
    let queue = Queue::<Record, 1024>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    for i in 0..=50 {
        let mut slot = queue.next_write_slot();
        *slot = tagged(i, "in place");
        if i % 10 == 0 {
            slot.abandon();
        }
    }

    assert_eq!(queue.write_count(), 45);
    let expected: Vec<i32> = (0..=50).filter(|i| i % 10 != 0).collect();
    assert_eq!(drain(&queue, &mut cursor), expected);
}

#[test]
fn abandoned_locked_writes_leave_no_trace() {
    let queue = Queue::<Record, 1024>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    for i in 0..=50 {
        let mut slot = queue.next_write_slot_locked();
        *slot = tagged(i, "staged");
        if i % 10 == 0 {
            slot.abandon();
        }
    }

    assert_eq!(queue.write_count(), 45);
    let expected: Vec<i32> = (0..=50).filter(|i| i % 10 != 0).collect();
    assert_eq!(drain(&queue, &mut cursor), expected);
}

#[test]
fn abandoned_read_leaves_cursor_and_record() {
    let queue = Queue::<u64, 4>::new_boxed(None);
    queue.push(9);
    let mut cursor = ReaderCursor::new();

    {
        let mut record = queue.recv(&mut cursor);
        assert!(record.is_ready());
        record.abandon();
    }
    assert_eq!(cursor.count(), 0);

    // the record is still there for the next recv
    assert_eq!(queue.recv(&mut cursor).copied(), Some(9));
    assert_eq!(cursor.count(), 1);
}

#[test]
fn moved_write_handle_commits_exactly_once() {
    let queue = Queue::<u64, 4>::new_boxed(None);

    let mut slot = queue.next_write_slot();
    *slot = 5;
    let moved = slot; // the old binding is inert after the move
    drop(moved);

    assert_eq!(queue.write_count(), 1);
    let mut cursor = ReaderCursor::new();
    assert_eq!(queue.recv(&mut cursor).copied(), Some(5));
    assert!(!queue.recv(&mut cursor).is_ready());
}

#[test]
fn moved_read_handle_consumes_exactly_once() {
    let queue = Queue::<u64, 4>::new_boxed(None);
    queue.push(3);
    let mut cursor = ReaderCursor::new();

    {
        let record = queue.recv(&mut cursor);
        let moved = record;
        assert_eq!(moved.copied(), Some(3));
    }
    assert_eq!(cursor.count(), 1);
}

#[test]
fn every_reader_sees_every_record() {
    let queue = Queue::<u64, 1024>::new_boxed(None);
    for i in 0..500 {
        queue.push(i);
    }

    for _ in 0..2 {
        let mut cursor = ReaderCursor::new();
        for i in 0..500 {
            assert_eq!(queue.recv(&mut cursor).copied(), Some(i));
        }
        assert!(!queue.recv(&mut cursor).is_ready());
    }
}

#[test]
fn reader_can_start_past_history() {
    let queue = Queue::<u64, 16>::new_boxed(None);
    for i in 0..8 {
        queue.push(i);
    }

    let mut cursor = ReaderCursor::starting_at(6);
    assert_eq!(queue.recv(&mut cursor).copied(), Some(6));
    assert_eq!(queue.recv(&mut cursor).copied(), Some(7));
    assert!(!queue.recv(&mut cursor).is_ready());
}

#[test]
fn lapped_reader_reports_overrun_and_can_fast_forward() {
    let queue = Queue::<u64, 4>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    for i in 0..6 {
        queue.push(i);
    }

    // more than one lap behind: the overwritten record is gone, and the
    // handle refuses to silently hand out a newer one in its place
    assert!(queue.is_overrun(&cursor));
    assert!(!queue.recv(&mut cursor).is_ready());
    assert_eq!(cursor.count(), 0);

    cursor.fast_forward_to(queue.write_count());
    assert!(!queue.is_overrun(&cursor));
    assert!(!queue.recv(&mut cursor).is_ready());

    queue.push(99);
    assert_eq!(queue.recv(&mut cursor).copied(), Some(99));
}

#[test]
fn backlog_tracks_unconsumed_records() {
    let queue = Queue::<u64, 16>::new_boxed(None);
    let mut cursor = ReaderCursor::new();
    assert_eq!(queue.backlog(&cursor), 0);

    queue.push(1);
    queue.push(2);
    assert_eq!(queue.backlog(&cursor), 2);

    drop(queue.recv(&mut cursor));
    assert_eq!(queue.backlog(&cursor), 1);
}

#[test]
fn wrapping_keeps_payloads_and_order() {
    let queue = Queue::<u64, 8>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    // stay in lockstep with the writer across several laps
    for i in 0..50 {
        queue.push(i);
        assert_eq!(queue.recv(&mut cursor).copied(), Some(i));
    }
    assert_eq!(cursor.count(), 50);
}

#[test]
fn locked_and_push_roundtrip_mixed_payload_sizes() {
    let queue = Queue::<[u8; 48], 16>::new_boxed(None);
    let mut cursor = ReaderCursor::new();

    let mut blob = [0u8; 48];
    for (i, byte) in blob.iter_mut().enumerate() {
        *byte = i as u8;
    }
    queue.push_locked(blob);

    let record = queue.recv(&mut cursor);
    assert_eq!(record.copied(), Some(blob));
}
