use crate::signal::Signal;
use crate::NodeError;

/// Rate limiter consulted before a node starts work on a signal.
///
/// Returns `NodeError::RateLimited` when no capacity is left right now.
/// Implementations must not block.
pub trait RateLimiter: Send + Sync {
    fn rate_limit(&self, signal: &Signal) -> Result<(), NodeError>;
}
