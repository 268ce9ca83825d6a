use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit set describing weight, activation and KV-cache quantization.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct QuantMode(u32);

impl QuantMode {
    pub const INT4_WEIGHTS: u32 = 1 << 0;
    pub const INT8_WEIGHTS: u32 = 1 << 1;
    pub const ACTIVATIONS: u32 = 1 << 2;
    pub const PER_CHANNEL: u32 = 1 << 3;
    pub const PER_TOKEN: u32 = 1 << 4;
    pub const PER_GROUP: u32 = 1 << 5;
    pub const INT8_KV_CACHE: u32 = 1 << 6;
    pub const FP8_KV_CACHE: u32 = 1 << 7;
    pub const FP8_QDQ: u32 = 1 << 8;
    pub const FP8_ROWWISE: u32 = 1 << 9;
    pub const FP4_KV_CACHE: u32 = 1 << 13;

    const KV_CACHE_MASK: u32 =
        Self::INT8_KV_CACHE | Self::FP8_KV_CACHE | Self::FP4_KV_CACHE;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(
        &self,
        flag: u32,
    ) -> bool {
        self.0 & flag == flag
    }

    pub const fn has_int8_kv_cache(&self) -> bool {
        self.contains(Self::INT8_KV_CACHE)
    }

    pub const fn has_fp8_kv_cache(&self) -> bool {
        self.contains(Self::FP8_KV_CACHE)
    }

    pub const fn has_fp4_kv_cache(&self) -> bool {
        self.contains(Self::FP4_KV_CACHE)
    }

    pub const fn has_kv_cache_quant(&self) -> bool {
        self.0 & Self::KV_CACHE_MASK != 0
    }

    /// Size in bits of one cached element when the cache is quantized.
    pub const fn kv_cache_element_bits(&self) -> Option<usize> {
        if self.has_fp4_kv_cache() {
            Some(4)
        } else if self.has_kv_cache_quant() {
            Some(8)
        } else {
            None
        }
    }
}

impl From<u32> for QuantMode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Debug for QuantMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "QuantMode({:#06x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_cache_quant_flags() {
        let plain = QuantMode::from_bits(QuantMode::INT8_WEIGHTS);
        assert!(!plain.has_kv_cache_quant());
        assert_eq!(plain.kv_cache_element_bits(), None);

        let fp8 = QuantMode::from_bits(QuantMode::FP8_KV_CACHE);
        assert!(fp8.has_kv_cache_quant());
        assert!(fp8.has_fp8_kv_cache());
        assert_eq!(fp8.kv_cache_element_bits(), Some(8));

        let fp4 = QuantMode::from_bits(QuantMode::FP4_KV_CACHE);
        assert_eq!(fp4.kv_cache_element_bits(), Some(4));
    }
}
