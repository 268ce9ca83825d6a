//! Address arithmetic over externally owned paged cache pools.

use crate::{
    DataType,
    backends::common::kernel::PoolAddress,
    descriptor::OperationDescriptor,
    error::{ConfigError, ShapeError},
    tensor::{BufferId, DeviceTensor},
};

/// A pool buffer owned by the cache allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    pub buffer: BufferId,
    pub length: usize,
}

/// Primary storage of one pool plus its optional secondary (offloaded) copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachePool {
    pub primary: PoolHandle,
    pub secondary: Option<PoolHandle>,
}

/// Location of one model layer inside the pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolMapping {
    pub pool_index: usize,
    pub layer_in_pool: usize,
}

/// Paged cache tensors supplied with a batch.
///
/// `block_offsets` is laid out as `[num_pools, max_seqs, 2, max_blocks]` and
/// `host_block_offsets` mirrors it element for element.
#[derive(Debug, Clone)]
pub struct PagedCacheInputs<'a> {
    pub block_offsets: DeviceTensor,
    pub host_block_offsets: &'a [i32],
    pub pools: &'a [CachePool],
    pub pool_mapping: &'a [PoolMapping],
}

impl PagedCacheInputs<'_> {
    pub fn num_layers(&self) -> usize {
        self.pool_mapping.len()
    }

    pub fn max_blocks_per_sequence(&self) -> usize {
        self.block_offsets.last_dim()
    }

    pub fn max_sequences(&self) -> usize {
        self.block_offsets.shape().get(1).copied().unwrap_or(0)
    }

    pub fn validate_layout(&self) -> Result<(), ShapeError> {
        if self.block_offsets.rank() != 4 {
            return Err(ShapeError::InvalidLayout {
                tensor: "block offsets",
                reason: "expected [num_pools, max_seqs, 2, max_blocks]",
            });
        }
        if self.host_block_offsets.len() != self.block_offsets.num_elements() {
            return Err(ShapeError::LengthMismatch {
                what: "host block offsets",
                expected: self.block_offsets.num_elements(),
                actual: self.host_block_offsets.len(),
            });
        }
        if self.pools.len() < self.block_offsets.dim(0) {
            return Err(ShapeError::LengthMismatch {
                what: "cache pools",
                expected: self.block_offsets.dim(0),
                actual: self.pools.len(),
            });
        }
        Ok(())
    }
}

/// Block layout of the cache for one descriptor and element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    pub tokens_per_block: usize,
    pub num_kv_heads: usize,
    pub head_size: usize,
    pub element_bytes: usize,
    /// 1 for the compressed latent cache, 2 for separate keys and values.
    pub kv_factor: usize,
}

impl CacheGeometry {
    pub fn new(
        descriptor: &OperationDescriptor,
        element_type: DataType,
    ) -> Result<Self, ConfigError> {
        let tokens_per_block =
            descriptor.tokens_per_block().ok_or(ConfigError::MissingTokensPerBlock)?;
        let element_bytes = if descriptor.kv_cache_quant_mode().has_kv_cache_quant() {
            1
        } else {
            element_type.size_in_bytes()
        };
        Ok(Self {
            tokens_per_block,
            num_kv_heads: descriptor.num_kv_heads(),
            head_size: descriptor.head_size(),
            element_bytes,
            kv_factor: if descriptor.is_latent_attention_enabled() {
                1
            } else {
                2
            },
        })
    }

    /// Elements in one block of one layer.
    pub fn block_size(&self) -> usize {
        self.tokens_per_block * self.num_kv_heads * self.head_size
    }

    pub fn bytes_per_block(&self) -> usize {
        self.block_size() * self.element_bytes
    }

    pub fn intra_pool_offset(
        &self,
        layer_in_pool: usize,
    ) -> usize {
        layer_in_pool * self.kv_factor * self.bytes_per_block()
    }
}

/// Cache addresses of one layer for one contiguous slice of sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCache<'a> {
    pub mapping: PoolMapping,
    pub primary: PoolAddress,
    pub secondary: Option<PoolAddress>,
    pub block_offsets: DeviceTensor,
    pub host_block_offsets: &'a [i32],
    pub max_blocks_per_sequence: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAddressResolver {
    geometry: CacheGeometry,
}

impl CacheAddressResolver {
    pub fn new(geometry: CacheGeometry) -> Self {
        Self {
            geometry,
        }
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn pool_mapping(
        &self,
        pool_mapping: &[PoolMapping],
        layer_idx: usize,
    ) -> Result<PoolMapping, ShapeError> {
        pool_mapping.get(layer_idx).copied().ok_or(ShapeError::LayerNotMapped {
            layer_idx,
            num_layers: pool_mapping.len(),
        })
    }

    /// Primary and secondary pool bases shifted to the layer's slot.
    pub fn pool_addresses(
        &self,
        pools: &[CachePool],
        mapping: PoolMapping,
    ) -> Result<(PoolAddress, Option<PoolAddress>), ShapeError> {
        let pool = pools.get(mapping.pool_index).ok_or(ShapeError::PoolOutOfRange {
            pool_index: mapping.pool_index,
            num_pools: pools.len(),
        })?;
        let byte_offset = self.geometry.intra_pool_offset(mapping.layer_in_pool);
        let address = |handle: PoolHandle| PoolAddress {
            buffer: handle.buffer,
            byte_offset,
        };
        Ok((address(pool.primary), pool.secondary.map(address)))
    }

    /// Block offset rows `seq_offset..seq_offset + num_seqs` of `pool_index`,
    /// on device and on host. The caller guarantees the range is in bounds.
    pub fn block_offsets<'a>(
        &self,
        inputs: &PagedCacheInputs<'a>,
        pool_index: usize,
        seq_offset: usize,
        num_seqs: usize,
    ) -> Result<(DeviceTensor, &'a [i32]), ShapeError> {
        let device = inputs.block_offsets.index(&[pool_index])?.narrow(seq_offset, num_seqs)?;
        let start = device.offset() - inputs.block_offsets.offset();
        let host = inputs
            .host_block_offsets
            .get(start..start + device.num_elements())
            .ok_or(ShapeError::SliceOutOfRange {
                start,
                len: device.num_elements(),
                total: inputs.host_block_offsets.len(),
            })?;
        Ok((device, host))
    }

    pub fn resolve<'a>(
        &self,
        inputs: &PagedCacheInputs<'a>,
        layer_idx: usize,
        seq_offset: usize,
        num_seqs: usize,
    ) -> Result<ResolvedCache<'a>, ShapeError> {
        let mapping = self.pool_mapping(inputs.pool_mapping, layer_idx)?;
        let (primary, secondary) = self.pool_addresses(inputs.pools, mapping)?;
        let (block_offsets, host_block_offsets) =
            self.block_offsets(inputs, mapping.pool_index, seq_offset, num_seqs)?;
        Ok(ResolvedCache {
            mapping,
            primary,
            secondary,
            block_offsets,
            host_block_offsets,
            max_blocks_per_sequence: inputs.max_blocks_per_sequence(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(kv_factor: usize) -> CacheGeometry {
        CacheGeometry {
            tokens_per_block: 32,
            num_kv_heads: 8,
            head_size: 128,
            element_bytes: 2,
            kv_factor,
        }
    }

    #[test]
    fn test_intra_pool_offset_scales_with_kv_factor() {
        let conventional = geometry(2);
        assert_eq!(conventional.bytes_per_block(), 32 * 8 * 128 * 2);
        assert_eq!(conventional.intra_pool_offset(0), 0);
        assert_eq!(conventional.intra_pool_offset(3), 3 * 2 * conventional.bytes_per_block());
        assert_eq!(geometry(1).intra_pool_offset(3), 3 * conventional.bytes_per_block());
    }

    #[test]
    fn test_block_offsets_slice_device_and_host_together() {
        let host: Vec<i32> = (0..2 * 4 * 2 * 3).collect();
        let inputs = PagedCacheInputs {
            block_offsets: DeviceTensor::new(BufferId(9), DataType::I32, &[2, 4, 2, 3]),
            host_block_offsets: &host,
            pools: &[],
            pool_mapping: &[],
        };
        let resolver = CacheAddressResolver::new(geometry(2));
        let (device, host_slice) = resolver.block_offsets(&inputs, 1, 2, 2).unwrap();
        assert_eq!(device.shape(), &[2, 2, 3]);
        assert_eq!(device.offset(), 24 + 12);
        assert_eq!(host_slice, &host[36..48]);
        assert!(resolver.block_offsets(&inputs, 1, 3, 2).is_err());
    }

    #[test]
    fn test_unmapped_layer() {
        let resolver = CacheAddressResolver::new(geometry(2));
        let mapping = [PoolMapping {
            pool_index: 0,
            layer_in_pool: 0,
        }];
        assert_eq!(
            resolver.pool_mapping(&mapping, 4),
            Err(ShapeError::LayerNotMapped {
                layer_idx: 4,
                num_layers: 1
            })
        );
    }
}
