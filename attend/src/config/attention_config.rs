use serde::{Deserialize, Serialize};

use super::{
    AttentionInputType, LatentAttentionDims, MaskType, PositionEmbeddingType,
    QuantMode, RotaryConfig, RunnerConfig, SpecDecodingFlags,
};
use crate::{DataType, error::ConfigError};

/// Scalar configuration of one attention call.
///
/// Device tensors travel separately in
/// [`AttentionInputs`](crate::dispatcher::AttentionInputs); everything here is
/// plain data and can be loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Requested output element type, `None` to match the input type.
    pub output_data_type: Option<DataType>,
    pub is_fused_qkv: bool,
    pub update_kv_cache: bool,
    pub predicted_tokens_per_seq: usize,
    pub layer_idx: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_size: usize,
    pub tokens_per_block: Option<usize>,
    pub max_num_requests: usize,
    pub max_context_length: usize,
    pub attention_window_size: usize,
    pub sink_token_length: usize,
    pub beam_width: usize,
    pub mask_type: MaskType,
    pub quant_mode: QuantMode,
    pub q_scaling: f64,
    pub position_embedding_type: PositionEmbeddingType,
    pub rotary: RotaryConfig,
    pub use_paged_context_fmha: bool,
    pub attention_input_type: Option<AttentionInputType>,
    /// Present iff latent attention is enabled.
    pub latent: Option<LatentAttentionDims>,
    pub attention_chunk_size: Option<usize>,
    #[serde(deserialize_with = "SpecDecodingFlags::deserialize_flags")]
    pub spec_decoding: SpecDecodingFlags,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            output_data_type: None,
            is_fused_qkv: true,
            update_kv_cache: true,
            predicted_tokens_per_seq: 1,
            layer_idx: 0,
            num_heads: 0,
            num_kv_heads: 0,
            head_size: 0,
            tokens_per_block: None,
            max_num_requests: 1,
            max_context_length: 0,
            attention_window_size: 0,
            sink_token_length: 0,
            beam_width: 1,
            mask_type: MaskType::Causal,
            quant_mode: QuantMode::default(),
            q_scaling: 1.0,
            position_embedding_type: PositionEmbeddingType::LearnedAbsolute,
            rotary: RotaryConfig::default(),
            use_paged_context_fmha: false,
            attention_input_type: None,
            latent: None,
            attention_chunk_size: None,
            spec_decoding: SpecDecodingFlags::default(),
        }
    }
}

impl AttentionConfig {
    pub fn is_latent_attention_enabled(&self) -> bool {
        self.latent.is_some()
    }

    pub fn input_type(&self) -> AttentionInputType {
        self.attention_input_type.unwrap_or_default()
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            beam_width: self.beam_width,
            max_num_requests: self.max_num_requests,
            attention_window_size: self.attention_window_size,
            sink_token_length: self.sink_token_length,
        }
    }

    /// Checks the scalar-only preconditions; input presence is validated
    /// against the classified batch by the dispatcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_fused_qkv {
            return Err(ConfigError::UnfusedQkv);
        }
        if !self.update_kv_cache {
            return Err(ConfigError::CacheUpdateDisabled);
        }
        if self.num_heads == 0 || self.num_kv_heads == 0 || self.head_size == 0
        {
            return Err(ConfigError::EmptyHeadGeometry {
                num_heads: self.num_heads,
                num_kv_heads: self.num_kv_heads,
                head_size: self.head_size,
            });
        }
        if self.num_heads % self.num_kv_heads != 0 {
            return Err(ConfigError::HeadCountNotDivisible {
                num_heads: self.num_heads,
                num_kv_heads: self.num_kv_heads,
            });
        }
        if self.beam_width == 0 {
            return Err(ConfigError::ZeroBeamWidth);
        }
        if self.rotary.dim > self.head_size {
            return Err(ConfigError::RotaryDimTooLarge {
                rotary_dim: self.rotary.dim,
                head_size: self.head_size,
            });
        }
        Ok(())
    }
}
