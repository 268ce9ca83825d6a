use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Context,
    Generation,
}

/// Requests and tokens covered by one phase of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseSpan {
    pub phase: Phase,
    pub seq_offset: usize,
    pub num_seqs: usize,
    pub token_offset: usize,
    pub num_tokens: usize,
    pub predicted_tokens_per_seq: usize,
}

impl PhaseSpan {
    pub fn is_context(&self) -> bool {
        self.phase == Phase::Context
    }

    pub fn seq_end(&self) -> usize {
        self.seq_offset + self.num_seqs
    }

    pub fn token_end(&self) -> usize {
        self.token_offset + self.num_tokens
    }
}
