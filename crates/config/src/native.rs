use serde::{Deserialize, Serialize};

/// Buffer sizing for the system-wide handle table query.
///
/// The table size cannot be known up front and changes between the size
/// probe and the data query, so the query is retried with a grown buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Native {
    /// Size of the first attempt, in bytes.
    pub initial_buffer: usize,
    /// Extra bytes added on top of the size the kernel asked for.
    pub buffer_margin: usize,
    /// Attempts before the scan is given up for this cycle.
    pub max_attempts: u32,
}

impl Default for Native {
    fn default() -> Self {
        Self {
            initial_buffer: 1024 * 1024,
            buffer_margin: 1024 * 1024,
            max_attempts: 16,
        }
    }
}

impl Native {
    pub fn clamp(self) -> Self {
        Self {
            initial_buffer: self.initial_buffer.max(64),
            max_attempts: self.max_attempts.max(1),
            ..self
        }
    }
}
