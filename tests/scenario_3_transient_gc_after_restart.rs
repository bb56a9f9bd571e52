mod common;

use tiered_mq::Message;

/// Interleave transient and persistent publishes, then simulate a crash
/// (drop everything without flushing) and confirm the restart keeps only
/// the persistent messages — transient ones are gone from both the queue
/// and the transient store (§3/§4.1 "transient clears on start").
#[test]
fn transient_messages_do_not_survive_an_unclean_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut transient_guids = Vec::new();

    {
        let mut harness = common::open(dir.path(), true);
        // Keep everything on the Index path so persistent entries reach PQI
        // promptly; the pure-α Msg path never gains a PQI record at all.
        harness
            .queue
            .set_ram_duration_target(Some(0.0))
            .expect("set target");
        for i in 0..1000u32 {
            let t = Message::new(format!("transient-{i}").into_bytes(), b"".to_vec(), false);
            transient_guids.push(t.guid);
            harness.queue.publish(t, false).expect("publish transient");

            let p = Message::new(format!("persistent-{i}").into_bytes(), b"".to_vec(), true);
            harness.queue.publish(p, false).expect("publish persistent");
        }
        assert_eq!(harness.queue.len(), 2000);
        // No sync/terminate/close: this drop simulates a crash.
    }

    {
        let harness = common::open(dir.path(), true);
        assert_eq!(harness.queue.len(), 1000);
        for guid in &transient_guids {
            assert!(!harness.transient_store.contains(guid));
        }
    }
}
