mod common;

use tiered_mq::Message;

/// Requeue puts messages back at the *tail* of the queue (like a fresh
/// publish), but the batch being requeued must come back out in the same
/// relative order the ack tags were given in, not reshuffled (§8 scenario
/// 6).
#[test]
fn requeued_batch_keeps_its_relative_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = common::open(dir.path(), false);

    for i in 0..5u32 {
        let msg = Message::new(format!("m-{i}").into_bytes(), b"".to_vec(), false);
        harness.queue.publish(msg, false).expect("publish");
    }

    let mut tags = Vec::new();
    for _ in 0..3 {
        let (_msg, _is_delivered, tag, _remaining) =
            harness.queue.fetch(true).expect("fetch").expect("some message");
        tags.push(tag.expect("ack tag"));
    }
    harness.queue.requeue(&tags).expect("requeue");

    let mut seen = Vec::new();
    while let Some((msg, _is_delivered, tag, _remaining)) = harness.queue.fetch(false).expect("fetch") {
        assert!(tag.is_none());
        seen.push(String::from_utf8(msg.payload.to_vec()).expect("utf8 payload"));
    }

    // m-3, m-4 were never fetched and stay at the front; m-0, m-1, m-2 were
    // requeued and land at the back, in the order they were requeued.
    assert_eq!(seen, vec!["m-3", "m-4", "m-0", "m-1", "m-2"]);
}
