//! The `I`/`Q` lease handshake: miss-fill, quarantined refresh and
//! invalidate, commit and release (spec §4.7.1 - §4.7.6, §8 scenarios 4-6).

use leasecache_engine::test_support::TestCache;
use leasecache_engine::{IqError, IqOutcome, StoreResult, TxResult};

#[test]
fn clean_miss_grants_an_i_lease_then_iqset_fills_it() {
    let mut cache = TestCache::new();

    let token = match cache.engine.iqget(b"t1", b"k", 0, false).unwrap() {
        IqOutcome::Lease(token) => token,
        other => panic!("expected a fresh lease, got {other:?}"),
    };

    // A second racer arrives before the fill and gets LEASE_HOTMISS.
    assert_eq!(cache.engine.iqget(b"t1", b"k", token.wrapping_add(1), false), Err(IqError::Miss));

    assert_eq!(cache.engine.iqset(b"k", 0, 0, b"value", token).unwrap(), StoreResult::Stored);

    let item = cache.engine.get(b"k").unwrap();
    assert_eq!(cache.engine.item(item).data, b"value");
    cache.engine.release_item(item);
}

#[test]
fn iqset_with_a_stale_token_is_refused() {
    let mut cache = TestCache::new();
    let token = match cache.engine.iqget(b"t1", b"k", 0, false).unwrap() {
        IqOutcome::Lease(token) => token,
        other => panic!("expected a fresh lease, got {other:?}"),
    };
    assert_eq!(cache.engine.iqset(b"k", 0, 0, b"value", token.wrapping_add(1)).unwrap(), StoreResult::NotStored);
}

#[test]
fn iqget_on_a_live_value_returns_it_without_a_lease() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"hit").unwrap();

    match cache.engine.iqget(b"t1", b"k", 0, false).unwrap() {
        IqOutcome::Value(item) => {
            assert_eq!(cache.engine.item(item).data, b"hit");
            cache.engine.release_item(item);
        }
        other => panic!("expected a value, got {other:?}"),
    }
}

#[test]
fn quarantine_and_read_then_commit_promotes_the_pending_version() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"original").unwrap();

    match cache.engine.quarantine_and_read(b"t1", b"k", 0).unwrap() {
        IqOutcome::Value(item) => {
            assert_eq!(cache.engine.item(item).data, b"original");
            cache.engine.release_item(item);
        }
        other => panic!("expected the cloned live value as a pending version, got {other:?}"),
    }

    // a Q_REF lease in flight does not block ordinary reads of the still-live
    // value; only the transaction that already knows the lease token collapses
    // to NoValue.
    match cache.engine.iqget(b"other-tid", b"k", 0, false) {
        Ok(IqOutcome::Value(item)) => cache.engine.release_item(item),
        other => panic!("expected an ordinary read to still see the live value, got {other:?}"),
    }

    assert_eq!(cache.engine.commit(b"t1", false, 7).unwrap(), TxResult::Ok);
    assert_eq!(cache.engine.commit(b"t1", false, 7).unwrap(), TxResult::NotFound);
}

#[test]
fn release_discards_the_quarantine_without_promoting() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"original").unwrap();
    cache.engine.quarantine_and_read(b"t1", b"k", 0).unwrap();

    assert_eq!(cache.engine.release(b"t1").unwrap(), TxResult::Ok);

    let item = cache.engine.get(b"k").expect("release must not touch the live value");
    assert_eq!(cache.engine.item(item).data, b"original");
    cache.engine.release_item(item);
}

#[test]
fn quarantine_and_register_blocks_reads_from_outside_the_transaction() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"v").unwrap();
    cache.engine.quarantine_and_register(b"t1", b"k", cache.engine.config().item_update_interval + 1_000).unwrap();

    // t1 itself, inside the quarantine, sees NoValue (not a fresh lease).
    assert_eq!(cache.engine.iqget(b"t1", b"k", 0, false).unwrap(), leasecache_engine::IqOutcome::NoValue);

    // an outsider gets a miss rather than being handed the quarantined value.
    match cache.engine.iqget(b"outsider", b"k", 0, false) {
        Ok(IqOutcome::Value(item)) => {
            cache.engine.release_item(item);
            panic!("a Q_INV quarantine must not serve the live value to an outsider")
        }
        _ => {}
    }

    assert_eq!(cache.engine.commit(b"t1", false, 0).unwrap(), TxResult::Ok);
}

#[test]
fn iqincr_mints_a_lease_then_applies_the_delta_on_the_pending_version() {
    let mut cache = TestCache::new();
    cache.engine.set(b"counter", 0, 0, b"10").unwrap();

    let token = match cache.engine.iqincr(b"counter", 5, 0).unwrap() {
        IqOutcome::LeaseNoValue(token) => token,
        other => panic!("expected a fresh Q_INCR lease, got {other:?}"),
    };

    match cache.engine.iqincr(b"counter", 5, token).unwrap() {
        IqOutcome::Value(item) => {
            assert_eq!(cache.engine.item(item).data, b"15");
            cache.engine.release_item(item);
        }
        other => panic!("expected the updated pending version, got {other:?}"),
    }
}

#[test]
fn iqdecr_saturates_at_zero() {
    let mut cache = TestCache::new();
    cache.engine.set(b"counter", 0, 0, b"3").unwrap();
    let token = match cache.engine.iqdecr(b"counter", 1, 0).unwrap() {
        IqOutcome::LeaseNoValue(token) => token,
        other => panic!("expected a fresh Q_INCR lease, got {other:?}"),
    };
    match cache.engine.iqdecr(b"counter", 10, token).unwrap() {
        IqOutcome::Value(item) => {
            assert_eq!(cache.engine.item(item).data, b"0");
            cache.engine.release_item(item);
        }
        other => panic!("expected the saturated pending version, got {other:?}"),
    }
}
