//! Request ids for superseding in-flight pulls.
//!
//! Every pull is tagged with an id from a single monotonic counter. Only a
//! response carrying the latest id issued for its resource is accepted;
//! anything older was superseded while in flight.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Latest issued request id per resource key.
#[derive(Debug)]
pub struct RequestTracker<K> {
    next: u64,
    latest: HashMap<K, RequestId>,
}

impl<K: Hash + Eq> Default for RequestTracker<K> {
    fn default() -> Self {
        Self {
            next: 1,
            latest: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> RequestTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new id for `key`, superseding any earlier one.
    pub fn issue(&mut self, key: K) -> RequestId {
        let id = RequestId(self.next);
        self.next += 1;
        self.latest.insert(key, id);
        id
    }

    /// True if `id` is the latest id issued for `key`.
    pub fn is_latest(&self, key: &K, id: RequestId) -> bool {
        self.latest.get(key) == Some(&id)
    }

    /// Supersede every in-flight request. Ids stay monotonic.
    pub fn clear(&mut self) {
        self.latest.clear();
    }
}
