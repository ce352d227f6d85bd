//! `HashMap`-backed associative index (spec §4.3, §6). Bucket layout and
//! resize policy are deliberately plain — the contract only needs
//! exact-match lookup.

use std::collections::HashMap;

use leasecache_core::assoc::AssocIndex;
use leasecache_core::slab::ItemRef;

#[derive(Default)]
pub struct MemoryIndex {
    table: HashMap<Vec<u8>, ItemRef>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssocIndex for MemoryIndex {
    fn find(&self, key: &[u8]) -> Option<ItemRef> {
        self.table.get(key).copied()
    }

    fn insert(&mut self, key: &[u8], item: ItemRef) {
        self.table.insert(key.to_vec(), item);
    }

    fn delete(&mut self, key: &[u8]) {
        self.table.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find_then_delete() {
        let mut idx = MemoryIndex::new();
        idx.insert(b"k", ItemRef(7));
        assert_eq!(idx.find(b"k"), Some(ItemRef(7)));
        idx.delete(b"k");
        assert_eq!(idx.find(b"k"), None);
    }
}
