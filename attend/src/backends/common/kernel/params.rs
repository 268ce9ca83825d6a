use serde::Serialize;

use crate::{
    DataType,
    config::LatentAttentionParams,
    descriptor::OperationDescriptor,
    tensor::{BufferId, DeviceTensor},
};

/// Base of a cache pool shifted by a layer's intra-pool byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PoolAddress {
    pub buffer: BufferId,
    pub byte_offset: usize,
}

/// Zeroed synchronization slots for multi-block generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreArray {
    pub buffer: BufferId,
    pub count: usize,
}

/// Per-runner state handed to the backend once, before the first launch.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPreparation<'a> {
    pub descriptor: &'a OperationDescriptor,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
    pub beam_width: usize,
    pub max_num_requests: usize,
    pub max_attention_window_size: usize,
    pub cyclic_attention_window_size: usize,
    pub sink_token_length: usize,
}

/// Fields shared by both phases.
#[derive(Debug, Clone)]
pub struct CommonParams<'a> {
    pub descriptor: &'a OperationDescriptor,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
    pub attention_input: DeviceTensor,
    pub rotary_inv_freq: Option<DeviceTensor>,
    pub rotary_cos_sin: Option<DeviceTensor>,
    pub max_past_kv_length: usize,
    pub max_attention_window_size: usize,
    pub cyclic_attention_window_size: usize,
    pub max_cyclic_attention_window_size: usize,
    pub can_use_one_more_block: bool,
    pub sink_token_length: usize,
    pub kv_scale_orig_quant: Option<DeviceTensor>,
    pub kv_scale_quant_orig: Option<DeviceTensor>,
    pub attention_output_orig_quant: Option<DeviceTensor>,
    pub attention_output_sf_scale: Option<DeviceTensor>,
    pub context_buf: DeviceTensor,
    pub context_buf_sf: Option<DeviceTensor>,
    pub block_offsets: Option<DeviceTensor>,
    pub host_primary_pool: Option<PoolAddress>,
    pub host_secondary_pool: Option<PoolAddress>,
    pub num_tokens: usize,
    pub max_blocks_per_sequence: usize,
    pub sequence_lengths: DeviceTensor,
    pub context_lengths: DeviceTensor,
    pub host_context_lengths: &'a [i32],
    pub workspace: DeviceTensor,
    pub input_seq_length: usize,
}

impl CommonParams<'_> {
    /// First token row of the phase inside the batch.
    pub fn token_offset(&self) -> usize {
        match self.attention_input.strides().first() {
            Some(&row) if row > 0 => self.attention_input.offset() / row,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextParams<'a> {
    pub common: CommonParams<'a>,
    pub host_block_offsets: Option<&'a [i32]>,
    pub batch_size: usize,
    pub softmax_stats: Option<DeviceTensor>,
    pub latent: Option<LatentParams>,
    pub multi_rope_cos_sin: Option<DeviceTensor>,
}

#[derive(Debug, Clone)]
pub struct SpecDecodingParams {
    pub generation_lengths: DeviceTensor,
    pub position_offsets: DeviceTensor,
    pub packed_mask: DeviceTensor,
    pub is_generation_length_variable: bool,
    pub max_generation_length: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationParams<'a> {
    pub common: CommonParams<'a>,
    pub beam_width: usize,
    pub num_requests: usize,
    pub cache_indirection: Option<DeviceTensor>,
    pub semaphores: SemaphoreArray,
    pub host_past_kv_lengths: &'a [i32],
    pub start_token_idx_sf: usize,
    pub multi_rope_position_deltas: Option<DeviceTensor>,
    pub spec_decoding: Option<SpecDecodingParams>,
}

/// Decoupled rotary part of the generation query, addressed by its leading
/// dimension and row stride.
#[derive(Debug, Clone)]
pub struct DecoupledRotaryQuery {
    pub tensor: DeviceTensor,
    pub leading_dimension: usize,
    pub stride: usize,
}

#[derive(Debug, Clone)]
pub struct LatentParams {
    pub meta: LatentAttentionParams,
    pub attention_input: DeviceTensor,
    pub context_buf: DeviceTensor,
    pub cos_sin_cache: Option<DeviceTensor>,
    pub latent_cache: Option<DeviceTensor>,
    pub context_paged_kv: Option<DeviceTensor>,
    pub context_block_offsets: Option<DeviceTensor>,
    pub context_paged_kv_max_blocks_per_seq: usize,
    pub q_pe: Option<DecoupledRotaryQuery>,
    pub block_ids_per_seq: Option<DeviceTensor>,
    pub cache_seq_lens: DeviceTensor,
    pub batch_size: usize,
    pub acc_q_len: usize,
    pub head_num: usize,
    pub max_input_seq_len: usize,
    pub workspace: DeviceTensor,
}
