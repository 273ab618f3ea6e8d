//! Bounded-retry allocation for large chunk buffers.
//!
//! A failed reservation is retried up to [`AllocPolicy::attempts`] times with
//! a fixed [`AllocPolicy::backoff`] in between; running out of attempts is
//! reported as [`AllocError::Exhausted`] and left to the caller.

use log::warn;
use std::time::Duration;
use thiserror::Error;

/// Default number of allocation attempts.
pub const ALLOC_ATTEMPTS: u32 = 200;

/// Default pause between two allocation attempts.
pub const ALLOC_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
/// Allocation failure after every retry.
pub enum AllocError {
    #[error("failed to allocate {elements} elements for {what} after {attempts} attempts")]
    Exhausted {
        what: &'static str,
        elements: usize,
        attempts: u32,
    },
}

/// Retry budget for chunk allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self {
            attempts: ALLOC_ATTEMPTS,
            backoff: ALLOC_BACKOFF,
        }
    }
}

/// Resize `buf` to exactly `len` copies of `fill`, reusing its allocation when
/// the capacity suffices. Returns `true` if the buffer had to grow.
pub fn try_allocate<T: Clone>(
    buf: &mut Vec<T>,
    len: usize,
    fill: T,
    what: &'static str,
    policy: AllocPolicy,
) -> Result<bool, AllocError> {
    buf.clear();
    let grew = buf.capacity() < len;
    if grew {
        let attempts = policy.attempts.max(1);
        let mut attempt = 0u32;
        while let Err(e) = buf.try_reserve_exact(len) {
            attempt += 1;
            if attempt >= attempts {
                return Err(AllocError::Exhausted {
                    what,
                    elements: len,
                    attempts,
                });
            }
            warn!("allocation retrying for {what} ({len} elements), attempt {attempt}: {e}");
            std::thread::sleep(policy.backoff);
        }
    }
    buf.resize(len, fill);
    Ok(grew)
}
