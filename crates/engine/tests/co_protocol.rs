//! The cooperative/owner (CO) lease family: colease join, owner-refresh
//! handoff, write-back, commit and validation (spec §4.7.7, §8).

use leasecache_engine::test_support::TestCache;
use leasecache_engine::{CiGetOutcome, CoResult, IqOutcome, OqReadOutcome, OqWriteOutcome};

#[test]
fn ciget_joins_a_cooperative_colease_on_an_existing_value() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"v1").unwrap();

    match cache.engine.ciget(b"sid1", b"k", 0).unwrap() {
        CiGetOutcome::Ok => {}
        other => panic!("expected a plain Ok (value already live), got {other:?}"),
    }
}

#[test]
fn ciget_on_a_missing_value_mints_an_i_lease_alongside_the_colease() {
    let mut cache = TestCache::new();
    assert_eq!(cache.engine.ciget(b"sid1", b"k", 0).unwrap(), CiGetOutcome::Ok);

    // the I lease minted by ciget blocks a conflicting iqget from a third party.
    match cache.engine.iqget(b"t1", b"k", 0, false) {
        Err(leasecache_engine::IqError::Miss) => {}
        other => panic!("expected the ciget-minted I lease to hotmiss a racer, got {other:?}"),
    }
}

#[test]
fn ciget_retries_against_a_mismatched_lease_token() {
    let mut cache = TestCache::new();
    let token = match cache.engine.iqget(b"t1", b"k", 0, false).unwrap() {
        IqOutcome::Lease(t) => t,
        other => panic!("expected a fresh I lease, got {other:?}"),
    };

    assert_eq!(cache.engine.ciget(b"sid1", b"k", token.wrapping_add(1)).unwrap(), CiGetOutcome::Retry);
    assert_eq!(cache.engine.ciget(b"sid1", b"k", token).unwrap(), CiGetOutcome::Ok);
}

#[test]
fn oqread_evicts_cooperative_readers_and_grants_exclusive_owner_standing() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"v1").unwrap();

    assert_eq!(cache.engine.ciget(b"sid1", b"k", 0).unwrap(), CiGetOutcome::Ok);

    match cache.engine.oqread(b"sid2", b"k").unwrap() {
        OqReadOutcome::Value(item) => {
            assert_eq!(cache.engine.item(item).data, b"v1");
            cache.engine.release_item(item);
        }
        other => panic!("expected oqread to read the live value, got {other:?}"),
    }

    // sid1 was bumped out of the colease by sid2's oqread; its next touch
    // self-cleans via the ABORT fast path (spec §4.7.7 abort_sessions).
    assert_eq!(cache.engine.validate(b"sid1").unwrap(), CoResult::Abort);
}

#[test]
fn oqswap_requires_sid_to_already_hold_the_owner_colease() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"v1").unwrap();

    assert_eq!(cache.engine.oqswap(b"sid1", b"k", 0, 0, b"v2").unwrap(), OqWriteOutcome::Abort);

    cache.engine.oqread(b"sid1", b"k").unwrap();
    assert_eq!(cache.engine.oqswap(b"sid1", b"k", 0, 0, b"v2").unwrap(), OqWriteOutcome::Ok);
}

#[test]
fn oqwrite_tolerates_no_prior_colease_by_creating_one() {
    let mut cache = TestCache::new();
    assert_eq!(cache.engine.oqwrite(b"sid1", b"k", 0, 0, b"v1").unwrap(), OqWriteOutcome::Ok);
}

#[test]
fn dcommit_promotes_the_owner_refresh_pending_version() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"original").unwrap();

    cache.engine.oqread(b"sid1", b"k").unwrap();
    assert_eq!(cache.engine.oqswap(b"sid1", b"k", 0, 0, b"refreshed").unwrap(), OqWriteOutcome::Ok);
    assert_eq!(cache.engine.dcommit(b"sid1").unwrap(), CoResult::Ok);

    let item = cache.engine.get(b"k").expect("dcommit must promote the pending version");
    assert_eq!(cache.engine.item(item).data, b"refreshed");
    cache.engine.release_item(item);

    // the session was torn down by dcommit; a repeat is a clean not-found.
    assert_eq!(cache.engine.dcommit(b"sid1").unwrap(), CoResult::NotFound);
}

#[test]
fn co_unlease_unconditionally_discards_without_promoting() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"original").unwrap();

    cache.engine.oqread(b"sid1", b"k").unwrap();
    cache.engine.oqswap(b"sid1", b"k", 0, 0, b"refreshed").unwrap();
    cache.engine.co_unlease(b"sid1").unwrap();

    let item = cache.engine.get(b"k").expect("co_unlease must not touch the live value");
    assert_eq!(cache.engine.item(item).data, b"original");
    cache.engine.release_item(item);
}

#[test]
fn validate_passes_while_the_colease_still_lists_the_session() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"v1").unwrap();
    cache.engine.oqread(b"sid1", b"k").unwrap();

    assert_eq!(cache.engine.validate(b"sid1").unwrap(), CoResult::Ok);
}
