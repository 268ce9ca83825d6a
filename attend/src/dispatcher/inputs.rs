use crate::{config::RequestType, paged_cache::PagedCacheInputs, tensor::DeviceTensor};

#[derive(Debug, Clone)]
pub struct KvQuantScales {
    /// Scale applied when writing into the quantized cache.
    pub orig_quant: DeviceTensor,
    /// Scale applied when reading back from the quantized cache.
    pub quant_orig: DeviceTensor,
}

#[derive(Debug, Clone, Default)]
pub struct RotaryInputs {
    pub inv_freq: Option<DeviceTensor>,
    pub cos_sin: Option<DeviceTensor>,
}

#[derive(Debug, Clone, Default)]
pub struct LatentInputs {
    pub latent_cache: Option<DeviceTensor>,
    /// Decoupled rotary query `[tokens, heads, rope_dim]`, unit inner stride.
    pub q_pe: Option<DeviceTensor>,
    pub block_ids_per_seq: Option<DeviceTensor>,
    pub context_paged_kv: Option<DeviceTensor>,
    pub context_block_offsets: Option<DeviceTensor>,
}

#[derive(Debug, Clone, Default)]
pub struct MultiRopeInputs {
    pub cos_sin: Option<DeviceTensor>,
    pub position_deltas: Option<DeviceTensor>,
}

#[derive(Debug, Clone, Default)]
pub struct SpecDecodingInputs {
    pub generation_lengths: Option<DeviceTensor>,
    pub position_offsets: Option<DeviceTensor>,
    pub packed_mask: Option<DeviceTensor>,
}

/// Device tensors and host arrays of one attention call.
///
/// Requests are packed context-first; per-request arrays are indexed by
/// request and `qkv`/`output` rows by token.
#[derive(Debug, Clone)]
pub struct AttentionInputs<'a> {
    pub qkv: DeviceTensor,
    pub k: Option<DeviceTensor>,
    pub v: Option<DeviceTensor>,
    pub output: DeviceTensor,
    pub output_scale_factors: Option<DeviceTensor>,
    pub sequence_lengths: DeviceTensor,
    pub host_past_kv_lengths: &'a [i32],
    pub context_lengths: DeviceTensor,
    pub host_context_lengths: &'a [i32],
    pub host_request_types: &'a [RequestType],
    pub paged_cache: Option<PagedCacheInputs<'a>>,
    pub cache_indirection: Option<DeviceTensor>,
    pub kv_quant_scales: Option<KvQuantScales>,
    pub output_scale: Option<DeviceTensor>,
    pub rotary: RotaryInputs,
    pub latent: LatentInputs,
    pub multi_rope: MultiRopeInputs,
    pub softmax_stats: Option<DeviceTensor>,
    pub spec_decoding: SpecDecodingInputs,
}

impl<'a> AttentionInputs<'a> {
    pub fn new(
        qkv: DeviceTensor,
        output: DeviceTensor,
        sequence_lengths: DeviceTensor,
        host_past_kv_lengths: &'a [i32],
        context_lengths: DeviceTensor,
        host_context_lengths: &'a [i32],
        host_request_types: &'a [RequestType],
    ) -> Self {
        Self {
            qkv,
            k: None,
            v: None,
            output,
            output_scale_factors: None,
            sequence_lengths,
            host_past_kv_lengths,
            context_lengths,
            host_context_lengths,
            host_request_types,
            paged_cache: None,
            cache_indirection: None,
            kv_quant_scales: None,
            output_scale: None,
            rotary: RotaryInputs::default(),
            latent: LatentInputs::default(),
            multi_rope: MultiRopeInputs::default(),
            softmax_stats: None,
            spec_decoding: SpecDecodingInputs::default(),
        }
    }

    /// Total packed tokens of the call.
    pub fn num_tokens(&self) -> usize {
        self.qkv.shape().first().copied().unwrap_or(0)
    }

    pub fn num_seqs(&self) -> usize {
        self.host_context_lengths.len()
    }
}
