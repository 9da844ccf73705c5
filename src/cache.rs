//! Response cache collaborator.
//!
//! The repository does not cache responses itself; after every mutation of
//! a live version it emits invalidation tags so an external response cache
//! can purge pages referencing the resource.

use uuid::Uuid;

/// An invalidation key emitted to the response cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTag {
    /// All cached responses embedding the resource with this identifier
    Resource(Uuid),
    /// All cached resource listings for this subject
    Subject(String),
}

/// External response cache notified about content mutations.
pub trait ResponseCache: Send + Sync {
    /// Purge all entries carrying any of the given tags. With `cascade`,
    /// entries derived from purged ones are dropped as well.
    fn invalidate(&self, tags: &[CacheTag], cascade: bool);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records invalidations for assertions.
    #[derive(Default)]
    pub struct RecordingCache {
        pub invalidations: Mutex<Vec<Vec<CacheTag>>>,
    }

    impl ResponseCache for RecordingCache {
        fn invalidate(&self, tags: &[CacheTag], _cascade: bool) {
            self.invalidations.lock().unwrap().push(tags.to_vec());
        }
    }
}
