//! Bounded LRU cache of decoded-from-storage objects.

use std::num::NonZeroUsize;
use std::sync::Arc;

use gitcore_hash::ObjectId;
use lru::LruCache;

use crate::RawObject;

/// Keeps recently read objects so repeated reads (tree walks, delta bases)
/// skip decompression.
pub struct ObjectCache {
    entries: LruCache<ObjectId, Arc<RawObject>>,
    hits: u64,
    misses: u64,
}

impl ObjectCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, oid: &ObjectId) -> Option<Arc<RawObject>> {
        match self.entries.get(oid) {
            Some(obj) => {
                self.hits += 1;
                Some(Arc::clone(obj))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, oid: ObjectId, obj: Arc<RawObject>) {
        self.entries.put(oid, obj);
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.entries.contains(oid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectType;

    fn entry(n: u8) -> (ObjectId, Arc<RawObject>) {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        (ObjectId::Sha1(bytes), Arc::new(RawObject::new(ObjectType::Blob, vec![n])))
    }

    #[test]
    fn least_recent_is_evicted() {
        let mut cache = ObjectCache::new(2);
        let (a, oa) = entry(1);
        let (b, ob) = entry(2);
        let (c, oc) = entry(3);
        cache.insert(a, oa);
        cache.insert(b, ob);
        assert!(cache.get(&a).is_some());
        cache.insert(c, oc);
        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn counts_hits_and_misses() {
        let mut cache = ObjectCache::new(0);
        assert_eq!(cache.capacity(), 1);
        let (a, oa) = entry(1);
        assert!(cache.get(&a).is_none());
        cache.insert(a, oa);
        assert_eq!(cache.get(&a).unwrap().data, vec![1]);
        assert_eq!(cache.stats(), (1, 1));
    }
}
