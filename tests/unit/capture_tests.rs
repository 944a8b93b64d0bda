//! Non-blocking capture: draining, chunk boundaries, and the forwarding cursor.

use fleetwire::capture::{OutputCapture, CHUNK_CAPACITY};

use super::test_helpers::FakePipe;

#[test]
fn poll_with_nothing_available_returns_without_blocking() {
    let pipe = FakePipe::new();
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(!capture.poll());
    assert_eq!(capture.pending(), 0);
    assert!(!capture.is_finished());
}

#[test]
fn poll_drains_everything_available_in_one_call() {
    let pipe = FakePipe::new();
    pipe.push(b"alpha ").push(b"beta ").push(b"gamma");
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(!capture.poll());
    assert_eq!(capture.pending(), 16);
    assert_eq!(capture.transcript(), b"alpha beta gamma");
}

#[test]
fn poll_stops_at_would_block_and_resumes_later() {
    let pipe = FakePipe::new();
    pipe.push(b"first").block().push(b"second");
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(!capture.poll());
    assert_eq!(capture.transcript(), b"first");

    assert!(!capture.poll());
    assert_eq!(capture.transcript(), b"firstsecond");
}

#[test]
fn end_of_stream_is_reported_and_sticky() {
    let pipe = FakePipe::new();
    pipe.push(b"tail").eof(7);
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(capture.poll());
    assert!(capture.is_finished());
    assert_eq!(capture.exit_code(), Some(7));

    let reads = pipe.reads();
    assert!(capture.poll(), "finished capture keeps reporting completion");
    assert_eq!(pipe.reads(), reads, "finished capture does not read again");
    assert_eq!(capture.take(64), b"tail");
}

#[test]
fn read_error_finishes_the_stream() {
    let pipe = FakePipe::new();
    pipe.push(b"partial").fail();
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(capture.poll());
    assert!(capture.is_finished());
    assert_eq!(capture.transcript(), b"partial");
}

#[test]
fn large_output_spans_multiple_chunks_without_overwrite() {
    let payload: Vec<u8> = (0..CHUNK_CAPACITY * 2 + 100)
        .map(|i| u8::try_from(i % 251).unwrap())
        .collect();
    let pipe = FakePipe::new();
    pipe.push(&payload);
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(!capture.poll());
    assert_eq!(capture.arena().chunk_count(), 3);
    assert!(capture.arena().chunks().all(|c| c.filled().len() <= CHUNK_CAPACITY));
    assert_eq!(capture.transcript(), payload);
}

#[test]
fn exactly_full_chunk_waits_for_bytes_before_growing() {
    let pipe = FakePipe::new();
    pipe.push(&vec![b'z'; CHUNK_CAPACITY]);
    let mut capture = OutputCapture::new(pipe.clone());

    assert!(!capture.poll());
    assert_eq!(capture.arena().chunk_count(), 1);

    pipe.push(b"more");
    assert!(!capture.poll());
    assert_eq!(capture.arena().chunk_count(), 2);
    assert_eq!(capture.pending(), CHUNK_CAPACITY + 4);
}

#[test]
fn take_advances_the_cursor_and_never_exceeds_request() {
    let pipe = FakePipe::new();
    pipe.push(b"0123456789");
    let mut capture = OutputCapture::new(pipe.clone());
    capture.poll();

    assert_eq!(capture.take(4), b"0123");
    assert_eq!(capture.pending(), 6);
    assert_eq!(capture.take(4), b"4567");
    assert_eq!(capture.take(100), b"89");
    assert!(capture.take(1).is_empty());
    assert_eq!(capture.transcript(), b"0123456789", "taken bytes stay captured");
}

#[test]
fn take_across_a_chunk_boundary_is_contiguous() {
    let payload = vec![b'x'; CHUNK_CAPACITY + 10];
    let pipe = FakePipe::new();
    pipe.push(&payload);
    let mut capture = OutputCapture::new(pipe.clone());
    capture.poll();

    assert_eq!(capture.take(CHUNK_CAPACITY - 5).len(), CHUNK_CAPACITY - 5);
    assert_eq!(capture.take(20).len(), 15);
}

#[test]
fn close_marks_finished_and_closes_the_source() {
    let pipe = FakePipe::new();
    pipe.push(b"kept");
    let mut capture = OutputCapture::new(pipe.clone());
    capture.poll();

    capture.close();
    assert!(pipe.is_closed());
    assert!(capture.is_finished());
    assert_eq!(capture.take(10), b"kept");
}
