use serde::{Deserialize, Serialize};

use super::{TraceContext, TraceError};
use crate::{
    ArrayElement, DataType,
    backends::common::{Context, NativeBuffer},
    config::{AttentionConfig, RequestType},
    dispatcher::{
        AttentionInputs, KvQuantScales, LatentInputs, MultiRopeInputs, RotaryInputs,
        SpecDecodingInputs,
    },
    paged_cache::{CachePool, PagedCacheInputs, PoolHandle, PoolMapping},
    tensor::DeviceTensor,
};

/// Host-side description of a batch, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchShape {
    pub data_type: DataType,
    pub request_types: Vec<RequestType>,
    pub context_lengths: Vec<i32>,
    pub past_kv_lengths: Vec<i32>,
    pub generation_tokens_per_seq: usize,
    /// Overrides the packed token count derived from the requests.
    pub num_tokens: Option<usize>,
    pub max_blocks_per_sequence: usize,
    pub num_pools: usize,
    pub num_layers: usize,
    pub secondary_pools: bool,
}

impl Default for BatchShape {
    fn default() -> Self {
        Self {
            data_type: DataType::F16,
            request_types: Vec::new(),
            context_lengths: Vec::new(),
            past_kv_lengths: Vec::new(),
            generation_tokens_per_seq: 1,
            num_tokens: None,
            max_blocks_per_sequence: 4,
            num_pools: 1,
            num_layers: 1,
            secondary_pools: false,
        }
    }
}

impl BatchShape {
    /// Context requests with `prompts` tokens followed by generation
    /// requests that have already cached `past` tokens.
    pub fn mixed(
        data_type: DataType,
        prompts: &[i32],
        past: &[i32],
    ) -> Self {
        let request_types = std::iter::repeat_n(RequestType::Context, prompts.len())
            .chain(std::iter::repeat_n(RequestType::Generation, past.len()))
            .collect();
        let lengths: Vec<i32> = prompts.iter().chain(past).copied().collect();
        Self {
            data_type,
            request_types,
            context_lengths: lengths.clone(),
            past_kv_lengths: lengths,
            ..Default::default()
        }
    }

    pub fn num_seqs(&self) -> usize {
        self.request_types.len()
    }

    pub fn num_tokens(&self) -> usize {
        self.num_tokens.unwrap_or_else(|| {
            self.request_types
                .iter()
                .zip(&self.context_lengths)
                .map(|(request_type, &length)| match request_type {
                    RequestType::Context => usize::try_from(length).unwrap_or(0),
                    RequestType::Generation => self.generation_tokens_per_seq,
                })
                .sum()
        })
    }

    fn num_generation_tokens(&self) -> usize {
        let num_generations =
            self.request_types.iter().filter(|&&request_type| request_type == RequestType::Generation).count();
        num_generations * self.generation_tokens_per_seq
    }
}

/// Device tensors and host arrays of one batch, allocated on a trace context.
#[derive(Debug)]
pub struct TraceBatch {
    request_types: Vec<RequestType>,
    host_context_lengths: Vec<i32>,
    host_past_kv_lengths: Vec<i32>,
    host_block_offsets: Vec<i32>,
    pools: Vec<CachePool>,
    pool_mapping: Vec<PoolMapping>,
    block_offsets: Option<DeviceTensor>,
    qkv: DeviceTensor,
    output: DeviceTensor,
    output_scale_factors: Option<DeviceTensor>,
    sequence_lengths: DeviceTensor,
    context_lengths: DeviceTensor,
    cache_indirection: Option<DeviceTensor>,
    kv_quant_scales: Option<KvQuantScales>,
    output_scale: Option<DeviceTensor>,
    rotary: RotaryInputs,
    latent: LatentInputs,
    multi_rope: MultiRopeInputs,
    spec_decoding: SpecDecodingInputs,
}

impl TraceBatch {
    /// Allocates every tensor `config` asks for. A paged cache is attached
    /// when `config.tokens_per_block` is set.
    pub fn new(
        context: &TraceContext,
        config: &AttentionConfig,
        shape: &BatchShape,
    ) -> Result<Self, TraceError> {
        let num_seqs = shape.num_seqs();
        let num_tokens = shape.num_tokens();
        let data_type = shape.data_type;
        let output_data_type = config.output_data_type.unwrap_or(data_type);
        let hidden_size = config.num_heads * config.head_size;

        let qkv_width = (config.num_heads + 2 * config.num_kv_heads) * config.head_size;
        let qkv = context.create_tensor(data_type, &[num_tokens, qkv_width])?;
        let output = context.create_tensor(output_data_type, &[num_tokens, hidden_size])?;
        let sequence_lengths = filled(context, DataType::I32, &[num_seqs], &shape.past_kv_lengths)?;
        let context_lengths = filled(context, DataType::I32, &[num_seqs], &shape.context_lengths)?;

        let mut batch = Self {
            request_types: shape.request_types.clone(),
            host_context_lengths: shape.context_lengths.clone(),
            host_past_kv_lengths: shape.past_kv_lengths.clone(),
            host_block_offsets: Vec::new(),
            pools: Vec::new(),
            pool_mapping: Vec::new(),
            block_offsets: None,
            qkv,
            output,
            output_scale_factors: None,
            sequence_lengths,
            context_lengths,
            cache_indirection: None,
            kv_quant_scales: None,
            output_scale: None,
            rotary: RotaryInputs::default(),
            latent: LatentInputs::default(),
            multi_rope: MultiRopeInputs::default(),
            spec_decoding: SpecDecodingInputs::default(),
        };

        if let Some(tokens_per_block) = config.tokens_per_block {
            batch.attach_paged_cache(context, config, shape, tokens_per_block)?;
        }

        if config.beam_width > 1 {
            let num_requests = (num_seqs / config.beam_width).max(1);
            batch.cache_indirection = Some(context.create_tensor(
                DataType::I32,
                &[num_requests, config.beam_width, config.attention_window_size],
            )?);
        }
        if config.quant_mode.has_kv_cache_quant() {
            batch.kv_quant_scales = Some(KvQuantScales {
                orig_quant: filled(context, DataType::F32, &[1], &[1.0f32])?,
                quant_orig: filled(context, DataType::F32, &[1], &[1.0f32])?,
            });
        }
        if output_data_type.is_compressed() {
            batch.output_scale = Some(filled(context, DataType::F32, &[1], &[1.0f32])?);
        }
        if output_data_type == DataType::FP4E2M1 {
            batch.output_scale_factors =
                Some(context.create_tensor(DataType::U8, &[num_tokens, hidden_size.div_ceil(16)])?);
        }

        let rotary = &config.rotary;
        if config.position_embedding_type.is_rotary() {
            batch.rotary = RotaryInputs {
                inv_freq: Some(context.create_tensor(DataType::F32, &[rotary.dim / 2])?),
                cos_sin: Some(context.create_tensor(DataType::F32, &[rotary.max_positions(), rotary.dim])?),
            };
        }
        if config.position_embedding_type.is_multi_rotary() {
            batch.multi_rope = MultiRopeInputs {
                cos_sin: Some(context.create_tensor(DataType::F32, &[rotary.max_positions(), rotary.dim])?),
                position_deltas: Some(context.create_tensor(DataType::I32, &[num_seqs])?),
            };
        }

        if let Some(dims) = config.latent {
            let max_blocks = shape.max_blocks_per_sequence;
            batch.latent = LatentInputs {
                latent_cache: Some(context.create_tensor(data_type, &[num_tokens, dims.compressed_head_size()])?),
                q_pe: Some(context.create_tensor(data_type, &[num_tokens, config.num_heads, dims.qk_rope_head_dim])?),
                block_ids_per_seq: Some(context.create_tensor(DataType::I32, &[num_seqs, max_blocks])?),
                context_paged_kv: None,
                context_block_offsets: None,
            };
            if config.use_paged_context_fmha {
                let tokens_per_block = config.tokens_per_block.unwrap_or(1);
                batch.latent.context_paged_kv = Some(context.create_tensor(
                    data_type,
                    &[num_seqs * max_blocks, tokens_per_block, dims.context_head_size()],
                )?);
                batch.latent.context_block_offsets =
                    Some(context.create_tensor(DataType::I32, &[num_seqs, 2, max_blocks])?);
            }
        }

        if config.spec_decoding.is_active() {
            let num_gen_tokens = shape.num_generation_tokens();
            let per_seq = shape.generation_tokens_per_seq;
            batch.spec_decoding = SpecDecodingInputs {
                generation_lengths: Some(context.create_tensor(DataType::I32, &[num_seqs])?),
                position_offsets: Some(context.create_tensor(DataType::I32, &[num_gen_tokens])?),
                packed_mask: Some(context.create_tensor(DataType::I32, &[num_gen_tokens, per_seq.div_ceil(32)])?),
            };
        }

        Ok(batch)
    }

    /// Pools hold `num_layers` layers split evenly; block offsets enumerate
    /// each sequence's blocks consecutively.
    fn attach_paged_cache(
        &mut self,
        context: &TraceContext,
        config: &AttentionConfig,
        shape: &BatchShape,
        tokens_per_block: usize,
    ) -> Result<(), TraceError> {
        let num_seqs = shape.num_seqs();
        let num_pools = shape.num_pools.max(1);
        let max_blocks = shape.max_blocks_per_sequence;
        let layers_per_pool = shape.num_layers.div_ceil(num_pools).max(1);

        let (kv_factor, num_kv_heads, head_size) = match config.latent {
            Some(dims) => (1, 1, dims.compressed_head_size()),
            None => (2, config.num_kv_heads, config.head_size),
        };
        let element_bytes = if config.quant_mode.has_kv_cache_quant() {
            1
        } else {
            shape.data_type.size_in_bytes()
        };
        let block_bytes = tokens_per_block * num_kv_heads * head_size * element_bytes;
        let pool_length = layers_per_pool * kv_factor * num_seqs * max_blocks * block_bytes;

        let allocate_pool = || -> Result<PoolHandle, TraceError> {
            let buffer = context.create_buffer(pool_length)?;
            Ok(PoolHandle {
                buffer: buffer.id(),
                length: buffer.length(),
            })
        };
        for _ in 0..num_pools {
            let primary = allocate_pool()?;
            let secondary = if shape.secondary_pools {
                Some(allocate_pool()?)
            } else {
                None
            };
            self.pools.push(CachePool {
                primary,
                secondary,
            });
        }
        self.pool_mapping = (0..shape.num_layers)
            .map(|layer| PoolMapping {
                pool_index: layer / layers_per_pool,
                layer_in_pool: layer % layers_per_pool,
            })
            .collect();

        let per_pool = num_seqs * 2 * max_blocks;
        self.host_block_offsets = (0..num_pools * per_pool)
            .map(|index| {
                let within_pool = index % per_pool;
                let seq = within_pool / (2 * max_blocks);
                let kv = within_pool / max_blocks % 2;
                let block = within_pool % max_blocks;
                ((seq * max_blocks + block) * 2 + kv) as i32
            })
            .collect();
        self.block_offsets = Some(filled(
            context,
            DataType::I32,
            &[num_pools, num_seqs, 2, max_blocks],
            &self.host_block_offsets,
        )?);
        Ok(())
    }

    pub fn output(&self) -> &DeviceTensor {
        &self.output
    }

    pub fn pools(&self) -> &[CachePool] {
        &self.pools
    }

    pub fn pool_mapping(&self) -> &[PoolMapping] {
        &self.pool_mapping
    }

    /// Borrowed view passed to the dispatcher.
    pub fn inputs(&self) -> AttentionInputs<'_> {
        let mut inputs = AttentionInputs::new(
            self.qkv.clone(),
            self.output.clone(),
            self.sequence_lengths.clone(),
            &self.host_past_kv_lengths,
            self.context_lengths.clone(),
            &self.host_context_lengths,
            &self.request_types,
        );
        inputs.paged_cache = self.block_offsets.as_ref().map(|block_offsets| PagedCacheInputs {
            block_offsets: block_offsets.clone(),
            host_block_offsets: &self.host_block_offsets,
            pools: &self.pools,
            pool_mapping: &self.pool_mapping,
        });
        inputs.output_scale_factors = self.output_scale_factors.clone();
        inputs.cache_indirection = self.cache_indirection.clone();
        inputs.kv_quant_scales = self.kv_quant_scales.clone();
        inputs.output_scale = self.output_scale.clone();
        inputs.rotary = self.rotary.clone();
        inputs.latent = self.latent.clone();
        inputs.multi_rope = self.multi_rope.clone();
        inputs.spec_decoding = self.spec_decoding.clone();
        inputs
    }
}

fn filled<T: ArrayElement>(
    context: &TraceContext,
    data_type: DataType,
    shape: &[usize],
    values: &[T],
) -> Result<DeviceTensor, TraceError> {
    let tensor = context.create_tensor(data_type, shape)?;
    context.write(&tensor, values)?;
    Ok(tensor)
}
