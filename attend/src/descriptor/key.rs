use crate::{
    DataType,
    config::{
        LatentAttentionParams, MaskType, PositionEmbeddingType, QuantMode,
        RotaryScalingType, SpecDecodingFlags,
    },
};

/// `f64` keyed by its bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatBits(u64);

impl FloatBits {
    pub fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for FloatBits {
    fn from(value: f64) -> Self {
        Self(value.to_bits())
    }
}

/// Every field that influences kernel selection or workspace sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    pub data_type: DataType,
    pub layer_idx: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_size: usize,
    pub mask_type: MaskType,
    pub kv_cache_quant_mode: QuantMode,
    pub use_kv_cache: bool,
    pub paged_kv_cache: bool,
    pub tokens_per_block: Option<usize>,
    pub fp8_context_fmha: bool,
    pub fuse_fp4_quant: bool,
    pub fmha_force_fp32_acc: bool,
    pub max_context_length: usize,
    pub q_scaling: FloatBits,
    pub position_embedding_type: PositionEmbeddingType,
    pub rotary_dim: usize,
    pub rotary_base: FloatBits,
    pub rotary_scale_type: RotaryScalingType,
    pub rotary_scales: [FloatBits; 3],
    pub rotary_max_positions: usize,
    pub rotary_original_max_positions: usize,
    pub paged_context_fmha: bool,
    pub attention_chunk_size: Option<usize>,
    pub spec_decoding: SpecDecodingFlags,
    pub multi_block_mode: bool,
    pub latent: Option<LatentAttentionParams>,
    /// Generation queries arrive already projected into the compressed space.
    pub is_generation_latent: bool,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_float_bits_distinguish_signed_zero() {
        assert_ne!(FloatBits::from(0.0), FloatBits::from(-0.0));
        assert_eq!(FloatBits::from(f64::NAN), FloatBits::from(f64::NAN));
        assert_eq!(FloatBits::from(1.25).get(), 1.25);
        let keys: HashSet<FloatBits> =
            [1.0, 1.0, 2.0].into_iter().map(FloatBits::from).collect();
        assert_eq!(keys.len(), 2);
    }
}
