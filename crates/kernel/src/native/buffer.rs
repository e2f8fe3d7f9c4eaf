use super::QueryResult;
use crate::error::Error;
use tracing::trace;

/// Sizing rules for a variable-length native query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Size of the first attempt in bytes.
    pub initial: usize,
    /// Slack added on top of the size the kernel reports.
    pub margin: usize,
    /// Total attempts, the first included.
    pub max_attempts: u32,
}

impl BufferPolicy {
    /// One fixed-size attempt followed by one retry at exactly the reported size.
    pub fn exact(initial: usize) -> Self {
        Self {
            initial,
            margin: 0,
            max_attempts: 2,
        }
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            initial: 1024 * 1024,
            margin: 1024 * 1024,
            max_attempts: 16,
        }
    }
}

/// Run `query` with growing buffers until it stops reporting a short buffer.
///
/// The returned buffer is the exact allocation the successful query wrote
/// into; structures inside it may point back into it.
pub(crate) fn negotiate<F>(
    call: &'static str,
    policy: &BufferPolicy,
    mut query: F,
) -> Result<Vec<u8>, Error>
where
    F: FnMut(&mut [u8]) -> QueryResult,
{
    let attempts = policy.max_attempts.max(1);
    let mut size = policy.initial.max(1);

    for attempt in 1..=attempts {
        let mut buffer = vec![0u8; size];
        let result = query(&mut buffer);
        if result.status.is_success() {
            trace!(call, size, attempt, "native query succeeded");
            return Ok(buffer);
        }
        if !result.status.is_size_mismatch() {
            return Err(Error::Status {
                call,
                status: result.status,
            });
        }
        let required = result.return_length as usize;
        size = next_size(size, required, policy.margin);
        trace!(call, attempt, required, next = size, "buffer too small");
    }

    Err(Error::BufferNegotiation { call, attempts })
}

/// Never smaller than what the kernel last asked for. When the reported size
/// is not larger than what was already tried, the buffer doubles instead.
fn next_size(current: usize, required: usize, margin: usize) -> usize {
    if required > current {
        required.saturating_add(margin)
    } else {
        current.saturating_mul(2).max(required.saturating_add(margin))
    }
}
