use serde::{Deserialize, Serialize};

use crate::recording::BoundaryPolicy;

/// What happens to the sequence counter when a chunk is abandoned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    /// The next chunk reuses the abandoned index
    #[default]
    ReuseIndex,
    /// The abandoned index is skipped, leaving a gap the receiver can detect
    AdvanceIndex,
}

/// Configuration for a recording session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Segment boundaries (interval, size ceiling, fragment timeslice)
    pub boundary: BoundaryPolicy,

    /// Encoder formats in order of preference
    pub formats: Vec<String>,

    pub drop_policy: DropPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boundary: BoundaryPolicy::default(),
            formats: vec!["wav".to_string(), "pcm".to_string()],
            drop_policy: DropPolicy::default(),
        }
    }
}
