use crate::types::CacheOp;

/// Receiver of cache updates produced by a merge pass.
///
/// Implementations apply the ops in order and atomically with respect to
/// readers: a reader sees either none or all of one `apply` call.
pub trait CacheSink: Send + Sync {
    fn apply(&self, ops: &[CacheOp]);
}
