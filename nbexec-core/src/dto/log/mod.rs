//! Log DTOs for the query surface

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One page of captured output, addressed by absolute line index
///
/// `next_since_line` feeds straight back into the next poll; repeated
/// polling with the returned cursor yields every line exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub success: bool,
    pub job_id: Uuid,
    pub stdout_chunk: Vec<String>,
    pub next_since_line: u64,
}
