#![allow(dead_code)]

use std::{rc::Rc, sync::Arc};

use attend::{
    BatchDispatcher, DataType, DescriptorCache,
    backends::{
        common::DeviceProperties,
        trace::{BatchShape, Trace, TraceBatch, TraceContext, TraceKernels},
    },
    config::{AttentionConfig, LatentAttentionDims, PositionEmbeddingType, RotaryConfig},
};

pub struct Harness {
    pub context: Rc<TraceContext>,
    pub kernels: Rc<TraceKernels>,
    pub dispatcher: BatchDispatcher<Trace>,
}

impl Harness {
    pub fn new(compute_capability: u32) -> Self {
        Self::with_cache(compute_capability, Arc::new(DescriptorCache::new()))
    }

    pub fn with_cache(
        compute_capability: u32,
        cache: Arc<DescriptorCache>,
    ) -> Self {
        let context = TraceContext::new(DeviceProperties {
            compute_capability,
            multiprocessor_count: 132,
        });
        let kernels = context.kernels();
        let dispatcher = BatchDispatcher::new(context.clone(), kernels.clone(), cache);
        Self {
            context,
            kernels,
            dispatcher,
        }
    }

    /// Harness whose dispatcher scans every generation output.
    pub fn checking_non_finite(compute_capability: u32) -> Self {
        let mut harness = Self::new(compute_capability);
        harness.dispatcher = BatchDispatcher::new(
            harness.context.clone(),
            harness.kernels.clone(),
            Arc::new(DescriptorCache::new()),
        )
        .with_non_finite_check(true);
        harness
    }

    pub fn batch(
        &self,
        config: &AttentionConfig,
        shape: &BatchShape,
    ) -> TraceBatch {
        TraceBatch::new(&self.context, config, shape).unwrap()
    }
}

/// Grouped-query layer with rotary embedding and a paged cache.
pub fn llama_config() -> AttentionConfig {
    AttentionConfig {
        num_heads: 32,
        num_kv_heads: 8,
        head_size: 128,
        tokens_per_block: Some(64),
        max_num_requests: 8,
        max_context_length: 4096,
        attention_window_size: 4096,
        position_embedding_type: PositionEmbeddingType::RopeGptNeox,
        rotary: RotaryConfig {
            dim: 128,
            base: 500000.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Latent attention layer whose queries use the compressed head size.
pub fn latent_config() -> AttentionConfig {
    let dims = LatentAttentionDims {
        q_lora_rank: 1536,
        kv_lora_rank: 512,
        qk_nope_head_dim: 128,
        qk_rope_head_dim: 64,
        v_head_dim: 128,
    };
    AttentionConfig {
        num_heads: 16,
        num_kv_heads: 16,
        head_size: dims.compressed_head_size(),
        tokens_per_block: Some(64),
        max_num_requests: 4,
        max_context_length: 2048,
        attention_window_size: 2048,
        position_embedding_type: PositionEmbeddingType::Yarn,
        rotary: RotaryConfig {
            dim: 64,
            ..Default::default()
        },
        latent: Some(dims),
        ..Default::default()
    }
}

pub fn mixed_shape(
    prompts: &[i32],
    past: &[i32],
) -> BatchShape {
    BatchShape::mixed(DataType::F16, prompts, past)
}
