use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{ServerSession, ServerSessionPool};
use crate::bson::{spec::BinarySubtype, Timestamp};

#[tokio::test]
async fn session_ids_are_uuid_binary() {
    let pool = ServerSessionPool::new();
    let session = pool.check_out(Some(Duration::from_secs(30 * 60))).await;

    let id = session.id.get_binary("id").expect("lsid id should be binary");
    assert_eq!(id.subtype, BinarySubtype::Uuid);
    assert_eq!(id.bytes.len(), 16);
}

#[tokio::test]
async fn pool_reuses_sessions_in_lifo_order() {
    let timeout = Some(Duration::from_secs(30 * 60));
    let pool = ServerSessionPool::new();

    let a = pool.check_out(timeout).await;
    let b = pool.check_out(timeout).await;
    let a_id = a.id.clone();
    let b_id = b.id.clone();
    assert_ne!(a_id, b_id);

    pool.check_in(a, timeout).await;
    pool.check_in(b, timeout).await;

    // Ending a and then b makes b the most recently returned, so it is reused first.
    let c = pool.check_out(timeout).await;
    let d = pool.check_out(timeout).await;
    assert_eq!(c.id, b_id);
    assert_eq!(d.id, a_id);
}

#[tokio::test]
async fn dirty_sessions_are_discarded() {
    let timeout = Some(Duration::from_secs(30 * 60));
    let pool = ServerSessionPool::new();

    let mut session = pool.check_out(timeout).await;
    let id = session.id.clone();
    session.dirty = true;
    pool.check_in(session, timeout).await;

    let fresh = pool.check_out(timeout).await;
    assert_ne!(fresh.id, id);
}

#[tokio::test]
async fn expiring_sessions_are_not_reused() {
    // Within a minute of expiry counts as expired.
    let timeout = Some(Duration::from_secs(30));
    let pool = ServerSessionPool::new();

    let session = pool.check_out(timeout).await;
    let id = session.id.clone();
    pool.check_in(session, timeout).await;

    let fresh = pool.check_out(timeout).await;
    assert_ne!(fresh.id, id);
}

#[test]
fn txn_numbers_increase_monotonically() {
    let mut session = ServerSession::new();
    assert_eq!(session.txn_number, 0);
    session.txn_number += 1;
    assert_eq!(session.txn_number, 1);
}

#[test]
fn operation_time_ordering() {
    // Timestamps order lexicographically on (time, increment).
    let early = Timestamp { time: 5, increment: 9 };
    let later = Timestamp { time: 6, increment: 0 };
    assert!(early < later);
}
