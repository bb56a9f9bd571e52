mod common;

use tiered_mq::Message;

const SEGMENT_SIZE: u64 = 16384;

/// With no target set, every publish takes the pure-α path and piles up in
/// q4 (§4.3 storage-type selector, `None` branch). Lowering the target to
/// zero afterward must squeeze that backlog down in one go: `reduce_memory_use`
/// drains q4 via `maybe_push_q4_to_betas` (α → β/γ, landing in q3) and then
/// `push_betas_to_deltas` folds everything past the first segment boundary
/// into Δ, leaving exactly one segment resident in q3. Relaxing the target
/// back to unbounded afterward must not disturb FIFO order: every message,
/// whether it paged through Δ or stayed in q3, comes back out in publish
/// order (§8 scenario 4).
#[test]
fn squeezing_and_relaxing_the_target_preserves_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = common::open(dir.path(), false);

    let total = 2 * SEGMENT_SIZE;
    for i in 0..total {
        let msg = Message::new(format!("m-{i}").into_bytes(), b"".to_vec(), false);
        harness.queue.publish(msg, false).expect("publish");
    }

    let status = harness.queue.status();
    assert_eq!(status.len, total);
    assert_eq!(status.q1, 0);
    assert_eq!(status.q3, 0);
    assert_eq!(status.delta, 0);
    assert_eq!(status.q4, total);

    harness
        .queue
        .set_ram_duration_target(Some(0.0))
        .expect("squeeze target to zero");

    let status = harness.queue.status();
    assert_eq!(status.len, total);
    assert_eq!(status.q1, 0);
    assert_eq!(status.q4, 0);
    assert_eq!(status.q3, SEGMENT_SIZE);
    assert_eq!(status.delta, SEGMENT_SIZE);

    harness
        .queue
        .set_ram_duration_target(None)
        .expect("relax target");

    for i in 0..total {
        let (msg, _is_delivered, tag, _remaining) =
            harness.queue.fetch(false).expect("fetch").expect("some message");
        assert_eq!(&*msg.payload, format!("m-{i}").as_bytes());
        assert!(tag.is_none());
    }
    assert_eq!(harness.queue.len(), 0);
    assert!(harness.queue.fetch(false).expect("fetch").is_none());
}
