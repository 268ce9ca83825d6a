use serde::{Deserialize, Serialize};

/// Dimensions of the low-rank projections used by latent attention.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct LatentAttentionDims {
    pub q_lora_rank: usize,
    pub kv_lora_rank: usize,
    pub qk_nope_head_dim: usize,
    pub qk_rope_head_dim: usize,
    pub v_head_dim: usize,
}

impl LatentAttentionDims {
    /// Head size of the compressed cache entry and of generation queries.
    pub fn compressed_head_size(&self) -> usize {
        self.kv_lora_rank + self.qk_rope_head_dim
    }

    /// Head size of uncompressed context queries.
    pub fn context_head_size(&self) -> usize {
        self.qk_nope_head_dim + self.qk_rope_head_dim
    }
}

/// Latent parameters as frozen into an operation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LatentAttentionParams {
    pub dims: LatentAttentionDims,
    pub predicted_tokens_per_seq: usize,
    pub num_layers: usize,
}
