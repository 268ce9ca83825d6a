use serde::Serialize;

use super::DescriptorKey;
use crate::{
    backends::common::DeviceProperties,
    config::{MaskType, PositionEmbeddingType},
    error::ConfigError,
};

const FUSED_CONTEXT_HEAD_SIZES: [usize; 12] =
    [32, 40, 64, 72, 80, 96, 104, 128, 160, 192, 256, 576];
const GROUPED_QUERY_HEAD_SIZES: [usize; 3] = [64, 128, 256];
const MAX_GROUPED_QUERY_HEADS_PER_KV_HEAD: usize = 32;
const FLASH_LATENT_COMPUTE_CAPABILITY: u32 = 90;
const FLASH_LATENT_TOKENS_PER_BLOCK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKernel {
    FusedMultiHead,
    Unfused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKernel {
    MaskedMultiHead,
    FusedGroupedQuery,
    LatentFmha,
    FlashLatent,
}

/// Kernel variants chosen for one descriptor on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelSelection {
    pub context: ContextKernel,
    pub generation: GenerationKernel,
    pub device: DeviceProperties,
    pub supports_compressed_output: bool,
}

/// 4-bit output fusion exists on compute capability 10.x and 11.x only.
pub fn supports_fp4_output(compute_capability: u32) -> bool {
    compute_capability >= 100 && compute_capability != 120
}

fn is_alibi(position_embedding_type: PositionEmbeddingType) -> bool {
    matches!(
        position_embedding_type,
        PositionEmbeddingType::Alibi | PositionEmbeddingType::AlibiWithScale
    )
}

fn context_kernel(
    key: &DescriptorKey,
    compute_capability: u32,
) -> ContextKernel {
    let head_size = key
        .latent
        .map_or(key.head_size, |latent| latent.dims.context_head_size());
    let fused = compute_capability >= 80
        && FUSED_CONTEXT_HEAD_SIZES.contains(&head_size)
        && key.position_embedding_type != PositionEmbeddingType::Relative
        && key.mask_type != MaskType::Custom;
    if fused {
        ContextKernel::FusedMultiHead
    } else {
        ContextKernel::Unfused
    }
}

fn generation_kernel(
    key: &DescriptorKey,
    compute_capability: u32,
) -> GenerationKernel {
    if key.latent.is_some() {
        return if compute_capability == FLASH_LATENT_COMPUTE_CAPABILITY
            && key.tokens_per_block == Some(FLASH_LATENT_TOKENS_PER_BLOCK)
        {
            GenerationKernel::FlashLatent
        } else {
            GenerationKernel::LatentFmha
        };
    }
    let grouped_query = compute_capability >= 80
        && key.paged_kv_cache
        && GROUPED_QUERY_HEAD_SIZES.contains(&key.head_size)
        && key.num_heads / key.num_kv_heads.max(1)
            <= MAX_GROUPED_QUERY_HEADS_PER_KV_HEAD
        && matches!(key.mask_type, MaskType::Causal | MaskType::SlidingWindowCausal)
        && !is_alibi(key.position_embedding_type)
        && (!key.kv_cache_quant_mode.has_fp4_kv_cache()
            || supports_fp4_output(compute_capability));
    if grouped_query {
        GenerationKernel::FusedGroupedQuery
    } else {
        GenerationKernel::MaskedMultiHead
    }
}

impl KernelSelection {
    pub fn select(
        key: &DescriptorKey,
        device: &DeviceProperties,
    ) -> Result<Self, ConfigError> {
        let compute_capability = device.compute_capability;
        if key.fp8_context_fmha && compute_capability < 89 {
            return Err(ConfigError::UnsupportedHardware {
                feature: "8-bit context attention",
                required: 89,
                actual: compute_capability,
            });
        }
        if key.fuse_fp4_quant && !supports_fp4_output(compute_capability) {
            return Err(ConfigError::UnsupportedHardware {
                feature: "4-bit output fusion",
                required: 100,
                actual: compute_capability,
            });
        }

        let context = context_kernel(key, compute_capability);
        let generation = generation_kernel(key, compute_capability);
        let supports_compressed_output = supports_fp4_output(compute_capability)
            && key.latent.is_none()
            && context == ContextKernel::FusedMultiHead
            && generation == GenerationKernel::FusedGroupedQuery;

        Ok(Self {
            context,
            generation,
            device: *device,
            supports_compressed_output,
        })
    }
}
