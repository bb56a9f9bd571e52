mod common;

use tiered_mq::Message;

const SEGMENT_SIZE: u64 = 16384;

/// With the target pinned to zero, a run that doesn't land on an exact
/// segment boundary leaves q3 holding one full segment while Δ holds the
/// partial tail past it (§4.3's `Some(0)` selector branch re-evaluates the
/// boundary from q3's unmoved head seq-id, so nothing shifts until q3
/// itself is drained by fetches) — §8 scenario 5.
#[test]
fn partial_segment_splits_between_q3_and_delta() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = common::open(dir.path(), true);
    harness
        .queue
        .set_ram_duration_target(Some(0.0))
        .expect("pin target to zero");

    let half = SEGMENT_SIZE / 2;
    let total = SEGMENT_SIZE + half;
    for i in 0..total {
        let msg = Message::new(format!("m-{i}").into_bytes(), b"".to_vec(), true);
        harness.queue.publish(msg, false).expect("publish");
    }

    let status = harness.queue.status();
    assert_eq!(status.len, total);
    assert_eq!(status.q1, 0);
    assert_eq!(status.q4, 0);
    assert_eq!(status.q3, SEGMENT_SIZE);
    assert_eq!(status.delta, half);

    // Draining q3 (one full segment) triggers `maybe_deltas_to_betas`,
    // which promotes every surviving Δ entry (all within one segment of
    // its own start) straight back into q3.
    for i in 0..SEGMENT_SIZE {
        let (msg, _is_delivered, _tag, _remaining) =
            harness.queue.fetch(false).expect("fetch").expect("some message");
        assert_eq!(&*msg.payload, format!("m-{i}").as_bytes());
    }
    let status = harness.queue.status();
    assert_eq!(status.q3, half);
    assert_eq!(status.delta, 0);

    for i in SEGMENT_SIZE..total {
        let (msg, _is_delivered, _tag, _remaining) =
            harness.queue.fetch(false).expect("fetch").expect("some message");
        assert_eq!(&*msg.payload, format!("m-{i}").as_bytes());
    }
    assert_eq!(harness.queue.len(), 0);
    assert!(harness.queue.fetch(false).expect("fetch").is_none());
}
