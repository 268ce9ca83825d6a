use serde::{Deserialize, Serialize};

/// Call-site parameters that shape prepared kernel state but not kernel
/// selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct RunnerConfig {
    pub beam_width: usize,
    pub max_num_requests: usize,
    pub attention_window_size: usize,
    pub sink_token_length: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            beam_width: 1,
            max_num_requests: 1,
            attention_window_size: 0,
            sink_token_length: 0,
        }
    }
}
