use super::*;

fn put(ob: &mut Outbox, id: u16, kind: PacketType, now: u64, payload: &[u8]) {
    ob.put(payload, id, kind, now, false).unwrap();
}

#[test]
fn dispatch_order_is_fifo_among_not_pending() {
    let mut ob = Outbox::new();
    put(&mut ob, 1, PacketType::Publish, 0, b"first");
    put(&mut ob, 2, PacketType::Publish, 1, b"second");
    put(&mut ob, 3, PacketType::Subscribe, 2, b"third");

    let idx = ob.oldest_not_pending().unwrap();
    assert_eq!(ob.entry(idx).unwrap().message_id(), 1);
    ob.mark_dispatched(idx);

    // Head is pending now; selection moves to the next insertion.
    let idx = ob.oldest_not_pending().unwrap();
    assert_eq!(ob.entry(idx).unwrap().message_id(), 2);
}

#[test]
fn all_pending_yields_none() {
    let mut ob = Outbox::new();
    put(&mut ob, 1, PacketType::Publish, 0, b"x");
    ob.mark_dispatched(0);
    assert_eq!(ob.oldest_not_pending(), None);
    assert_eq!(Outbox::new().oldest_not_pending(), None);
}

#[test]
fn delete_by_id_and_kind_is_exact() {
    let mut ob = Outbox::new();
    // Same id at two different flow stages, as in a QoS 2 exchange.
    put(&mut ob, 5, PacketType::Publish, 0, b"data");
    put(&mut ob, 5, PacketType::PubRel, 1, b"rel");
    put(&mut ob, 6, PacketType::Publish, 2, b"other");

    assert_eq!(ob.delete_by_id_and_kind(5, PacketType::Publish), 1);
    assert_eq!(ob.len(), 2);
    assert_eq!(ob.get(5).unwrap().kind(), PacketType::PubRel);

    // No entry with the targeted (id, kind) pair remains.
    assert_eq!(ob.delete_by_id_and_kind(5, PacketType::Publish), 0);
}

#[test]
fn delete_by_id_removes_all_matches() {
    let mut ob = Outbox::new();
    put(&mut ob, 7, PacketType::Publish, 0, b"a");
    put(&mut ob, 7, PacketType::PubRel, 0, b"b");
    put(&mut ob, 8, PacketType::Publish, 0, b"c");
    assert_eq!(ob.delete_by_id(7), 2);
    assert_eq!(ob.len(), 1);
    assert_eq!(ob.get(8).unwrap().message_id(), 8);
}

#[test]
fn expiry_removes_exactly_the_old_entries() {
    let mut ob = Outbox::new();
    put(&mut ob, 1, PacketType::Publish, 0, b"old");
    put(&mut ob, 2, PacketType::Publish, 500, b"newer");
    put(&mut ob, 3, PacketType::Publish, 1_000, b"newest");

    assert_eq!(ob.delete_expired(1_100, 1_000), 1);
    assert!(ob.get(1).is_none());
    assert!(ob.get(2).is_some());
    assert!(ob.get(3).is_some());

    // Boundary: age exactly equal to max_age is kept.
    assert_eq!(ob.delete_expired(1_500, 1_000), 0);
}

#[test]
fn cleanup_evicts_head_first_and_is_idempotent() {
    let mut ob = Outbox::new();
    put(&mut ob, 1, PacketType::Publish, 0, &[0u8; 400]);
    put(&mut ob, 2, PacketType::Publish, 0, &[0u8; 400]);
    put(&mut ob, 3, PacketType::Publish, 0, &[0u8; 400]);
    assert_eq!(ob.total_bytes(), 1_200);

    assert_eq!(ob.cleanup(800), 1);
    assert!(ob.get(1).is_none());
    assert_eq!(ob.total_bytes(), 800);

    // Second call with no intervening put changes nothing.
    assert_eq!(ob.cleanup(800), 0);
    assert_eq!(ob.total_bytes(), 800);
}

#[test]
fn cleanup_ignores_pending_state() {
    let mut ob = Outbox::new();
    put(&mut ob, 1, PacketType::Publish, 0, &[0u8; 600]);
    put(&mut ob, 2, PacketType::Publish, 0, &[0u8; 600]);
    ob.mark_dispatched(0);
    ob.cleanup(700);
    // The pending head is evicted regardless.
    assert!(ob.get(1).is_none());
    assert!(ob.get(2).is_some());
}

#[test]
fn put_into_full_store_evicts_oldest() {
    let mut ob = Outbox::new();
    for id in 0..MAX_ENTRIES as u16 {
        put(&mut ob, id + 1, PacketType::Publish, 0, b"p");
    }
    assert_eq!(ob.len(), MAX_ENTRIES);

    put(&mut ob, 100, PacketType::Publish, 0, b"overflow");
    assert_eq!(ob.len(), MAX_ENTRIES);
    assert!(ob.get(1).is_none());
    assert!(ob.get(100).is_some());
}

#[test]
fn put_refuses_oversized_payloads() {
    let mut ob = Outbox::new();
    let oversized = [0u8; MAX_PACKET_LEN + 1];
    assert_eq!(
        ob.put(&oversized, 1, PacketType::Publish, 0, false),
        Err(Error::BufferOverflow)
    );
    assert!(ob.is_empty());
}

#[test]
fn retries_count_dispatches() {
    let mut ob = Outbox::new();
    put(&mut ob, 1, PacketType::Publish, 0, b"x");
    ob.mark_dispatched(0);
    assert_eq!(ob.entry(0).unwrap().retries(), 1);
    assert!(ob.entry(0).unwrap().pending());
}
