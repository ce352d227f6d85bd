//! End-to-end coverage of the plain value store family (spec §4.7.2, §8
//! scenario 1) and the refcount/CAS invariants it must uphold (spec §8
//! properties 1-3).

use leasecache_core::time::Clock;
use leasecache_engine::test_support::TestCache;
use leasecache_engine::{ClientError, StoreResult};

#[test]
fn set_get_delete_get_round_trip() {
    let mut cache = TestCache::new();

    assert_eq!(cache.engine.set(b"a", 0, 0, b"hello").unwrap(), StoreResult::Stored);

    let item = cache.engine.get(b"a").expect("value present after set");
    assert_eq!(cache.engine.item(item).data, b"hello");
    cache.engine.release_item(item);

    assert_eq!(cache.engine.delete(b"a").unwrap(), StoreResult::Exists);
    assert!(cache.engine.get(b"a").is_none());
    assert_eq!(cache.engine.delete(b"a").unwrap(), StoreResult::NotFound);
}

#[test]
fn add_refuses_an_existing_key_replace_refuses_a_missing_one() {
    let mut cache = TestCache::new();

    assert_eq!(cache.engine.add(b"k", 0, 0, b"v1").unwrap(), StoreResult::Stored);
    assert_eq!(cache.engine.add(b"k", 0, 0, b"v2").unwrap(), StoreResult::NotStored);

    assert_eq!(cache.engine.replace(b"missing", 0, 0, b"v").unwrap(), StoreResult::NotStored);
    assert_eq!(cache.engine.replace(b"k", 0, 0, b"v2").unwrap(), StoreResult::Stored);

    let item = cache.engine.get(b"k").unwrap();
    assert_eq!(cache.engine.item(item).data, b"v2");
    cache.engine.release_item(item);
}

#[test]
fn cas_checks_the_token_before_storing() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"v1").unwrap();

    let item = cache.engine.get(b"k").unwrap();
    let cas = cache.engine.item(item).cas;
    cache.engine.release_item(item);

    assert_eq!(cache.engine.cas(b"k", 0, 0, b"v2", cas.wrapping_add(1)).unwrap(), StoreResult::Exists);
    assert_eq!(cache.engine.cas(b"k", 0, 0, b"v2", cas).unwrap(), StoreResult::Stored);
    assert_eq!(cache.engine.cas(b"missing", 0, 0, b"v", 1).unwrap(), StoreResult::NotFound);
}

#[test]
fn cas_values_assigned_at_link_time_strictly_increase() {
    let mut cache = TestCache::new();
    cache.engine.set(b"a", 0, 0, b"1").unwrap();
    cache.engine.set(b"b", 0, 0, b"2").unwrap();

    let a = cache.engine.get(b"a").unwrap();
    let b = cache.engine.get(b"b").unwrap();
    assert!(cache.engine.item(b).cas > cache.engine.item(a).cas);
    cache.engine.release_item(a);
    cache.engine.release_item(b);
}

#[test]
fn append_and_prepend_merge_around_the_existing_bytes() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"middle").unwrap();

    assert_eq!(cache.engine.append(b"k", b"-end").unwrap(), StoreResult::Stored);
    assert_eq!(cache.engine.prepend(b"k", b"start-").unwrap(), StoreResult::Stored);

    let item = cache.engine.get(b"k").unwrap();
    assert_eq!(cache.engine.item(item).data, b"start-middle-end");
    cache.engine.release_item(item);
}

#[test]
fn append_to_a_missing_key_is_not_stored() {
    let mut cache = TestCache::new();
    assert_eq!(cache.engine.append(b"missing", b"x").unwrap(), StoreResult::NotStored);
}

#[test]
fn append_over_the_slab_class_ceiling_is_a_client_error() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, 0, b"small").unwrap();
    let oversized = vec![b'x'; 8 * 1024 * 1024];
    assert_eq!(cache.engine.append(b"k", &oversized), Err(ClientError::AppendSizeExceedsSlabClass));
}

#[test]
fn lazily_expired_items_disappear_on_get_and_do_not_leak_refcount() {
    let mut cache = TestCache::new();
    cache.engine.set(b"k", 0, cache.clock.now() + 5, b"v").unwrap();
    let item = cache.engine.get(b"k").expect("not yet expired");
    cache.engine.release_item(item);

    cache.advance(10);
    assert!(cache.engine.get(b"k").is_none());
    assert!(cache.engine.get(b"k").is_none());
}

#[test]
fn flush_all_invalidates_items_linked_before_the_call() {
    let mut cache = TestCache::new();
    cache.engine.set(b"old", 0, 0, b"v").unwrap();
    cache.advance(5);
    cache.engine.flush_all();
    cache.engine.set(b"new", 0, 0, b"v").unwrap();

    assert!(cache.engine.get(b"old").is_none());
    let item = cache.engine.get(b"new").expect("items linked after flush_all survive it");
    cache.engine.release_item(item);
}
