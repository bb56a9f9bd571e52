mod common;

use tiered_mq::Message;

/// Persist 20000 messages, shut down cleanly, and confirm the restart
/// recovers every one of them folded into a single Δ run (§8 scenario 2).
///
/// The RAM-duration target is pinned to zero *before* any publish so every
/// message takes the Index path (γ-eligible) rather than the pure-α Msg
/// path, which never gains a PQI record and would otherwise be unrecoverable
/// across a restart (see DESIGN.md).
#[test]
fn persists_across_clean_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let mut harness = common::open(dir.path(), true);
        harness
            .queue
            .set_ram_duration_target(Some(0.0))
            .expect("set target");

        for i in 0..20_000u32 {
            let msg = Message::new(format!("msg-{i}").into_bytes(), b"".to_vec(), true);
            harness.queue.publish(msg, false).expect("publish");
        }
        assert_eq!(harness.queue.len(), 20_000);
        common::clean_shutdown(harness);
    }

    {
        let mut harness = common::open(dir.path(), true);
        assert_eq!(harness.queue.len(), 20_000);
        let status = harness.queue.status();
        assert_eq!(status.delta, 20_000);
        assert_eq!(status.q1, 0);
        assert_eq!(status.q2, 0);
        assert_eq!(status.q3, 0);
        assert_eq!(status.q4, 0);

        for _ in 0..20_000u32 {
            let (_msg, _is_delivered, tag, _remaining) =
                harness.queue.fetch(true).expect("fetch").expect("some message");
            let tag = tag.expect("ack tag");
            harness.queue.ack(&[tag]).expect("ack");
        }
        assert_eq!(harness.queue.len(), 0);
        common::clean_shutdown(harness);
    }

    {
        let mut harness = common::open(dir.path(), true);
        assert_eq!(harness.queue.len(), 0);
        assert!(harness.queue.fetch(false).expect("fetch").is_none());
    }
}
