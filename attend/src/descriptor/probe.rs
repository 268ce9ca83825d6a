use serde::{Deserialize, Serialize};

use super::{DescriptorKey, FloatBits, OperationDescriptor};
use crate::{
    DataType,
    config::{
        AttentionConfig, MaskType, PositionEmbeddingType, QuantMode,
        RotaryScalingType, SpecDecodingFlags,
    },
};

/// Arguments of the compressed-output capability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompressedOutputProbe {
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_size: usize,
    pub tokens_per_block: Option<usize>,
    pub mask_type: MaskType,
    pub quant_mode: QuantMode,
    pub use_paged_context_fmha: bool,
    pub is_latent_attention: bool,
}

impl From<&AttentionConfig> for CompressedOutputProbe {
    fn from(config: &AttentionConfig) -> Self {
        Self {
            num_heads: config.num_heads,
            num_kv_heads: config.num_kv_heads,
            head_size: config.head_size,
            tokens_per_block: config.tokens_per_block,
            mask_type: config.mask_type,
            quant_mode: config.quant_mode,
            use_paged_context_fmha: config.use_paged_context_fmha,
            is_latent_attention: config.is_latent_attention_enabled(),
        }
    }
}

impl CompressedOutputProbe {
    /// Fingerprint of the descriptor probed on behalf of this query: a paged
    /// f16 operation with fused 4-bit output.
    pub fn key(&self) -> DescriptorKey {
        DescriptorKey {
            data_type: DataType::F16,
            layer_idx: 0,
            num_heads: self.num_heads,
            num_kv_heads: self.num_kv_heads,
            head_size: self.head_size,
            mask_type: self.mask_type,
            kv_cache_quant_mode: self.quant_mode,
            use_kv_cache: true,
            paged_kv_cache: true,
            tokens_per_block: self.tokens_per_block,
            fp8_context_fmha: self.quant_mode.has_fp8_kv_cache(),
            fuse_fp4_quant: true,
            fmha_force_fp32_acc: false,
            max_context_length: 0,
            q_scaling: FloatBits::from(1.0),
            position_embedding_type: PositionEmbeddingType::LearnedAbsolute,
            rotary_dim: 0,
            rotary_base: FloatBits::from(0.0),
            rotary_scale_type: RotaryScalingType::None,
            rotary_scales: [FloatBits::from(1.0); 3],
            rotary_max_positions: 0,
            rotary_original_max_positions: 0,
            paged_context_fmha: self.use_paged_context_fmha,
            attention_chunk_size: None,
            spec_decoding: SpecDecodingFlags::default(),
            multi_block_mode: true,
            latent: None,
            is_generation_latent: false,
        }
    }

    pub fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::from_key(self.key())
    }
}
