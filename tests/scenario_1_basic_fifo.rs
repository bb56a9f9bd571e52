mod common;

use tiered_mq::Message;

#[test]
fn basic_fifo_transient_fetch_without_ack() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = common::open(dir.path(), false);

    let a = Message::new(b"a".to_vec(), b"".to_vec(), false);
    let b = Message::new(b"b".to_vec(), b"".to_vec(), false);
    let c = Message::new(b"c".to_vec(), b"".to_vec(), false);

    harness.queue.publish(a.clone(), false).expect("publish a");
    harness.queue.publish(b.clone(), false).expect("publish b");
    harness.queue.publish(c.clone(), false).expect("publish c");
    assert_eq!(harness.queue.len(), 3);

    for expected in [&a, &b, &c] {
        let (msg, is_delivered, tag, _remaining) =
            harness.queue.fetch(false).expect("fetch").expect("some message");
        assert_eq!(&*msg.payload, &*expected.payload);
        assert!(!is_delivered);
        assert!(tag.is_none());
    }

    assert_eq!(harness.queue.len(), 0);
    assert!(harness.queue.fetch(false).expect("fetch").is_none());
}
