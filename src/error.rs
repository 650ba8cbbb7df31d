//! Core error kinds, one variant per §7 error category.
//!
//! Ray-level failures are *not* represented here: an adapter that cannot
//! finish a ray sets [`crate::ray::TermFlags::TIMEOUT`] and the ray is
//! treated as terminated with its current color. Only system-level failures
//! reach this type, and the core never retries them.

use thiserror::Error;

use crate::ray::BlockId;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown scheduler/adapter/policy name, or a malformed config value.
    /// Fails fast at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Allocation failure for a queue or framebuffer. Fatal on the offending
    /// rank; callers should fold this into a poisoned vote so the frame is
    /// aborted cluster-wide rather than silently producing a partial image.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// The adapter reported a failure outside the per-ray timeout path
    /// (e.g. `load()`/`unload()` failing for a block).
    #[error("adapter error on block {block:?}: {message}")]
    Adapter { block: BlockId, message: String },

    /// A collective or point-to-point exchange failed. Fatal to the frame;
    /// the core does not retry.
    #[error("communication error: {0}")]
    Communication(String),

    /// A protocol message arrived out of state (e.g. a vote before a
    /// PROPOSE). The voter's state machine discards these; this variant
    /// exists so callers that want to log/alert on it still can.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
