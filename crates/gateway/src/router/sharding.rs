use hermes_core::BookKey;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Strategy for distributing books across lanes
pub trait ShardingStrategy: Send + Sync {
    /// Lane index for `key`, in `0..lanes`
    fn lane_for(&self, key: &BookKey, lanes: usize) -> usize;
}

/// Default strategy: hash of the whole key
pub struct HashStrategy;

impl ShardingStrategy for HashStrategy {
    fn lane_for(&self, key: &BookKey, lanes: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % lanes.max(1)
    }
}
