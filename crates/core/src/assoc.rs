//! The associative index collaborator contract (spec §6). Only exact-match
//! `find`/`insert`/`delete` is needed; the hash table's own internals
//! (bucket layout, resize policy) are out of scope (spec §1).

use crate::slab::ItemRef;

pub trait AssocIndex {
    fn find(&self, key: &[u8]) -> Option<ItemRef>;
    fn insert(&mut self, key: &[u8], item: ItemRef);
    fn delete(&mut self, key: &[u8]);
}
