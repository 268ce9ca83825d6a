use bytemuck::Pod;
use half::{bf16, f16};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Copy,
    Clone,
    Serialize,
    Deserialize,
)]
pub enum DataType {
    // Floating point
    BF16,
    F16,
    F32,
    // Compressed floating point
    F8E4M3,
    FP4E2M1,
    // Integers
    I8,
    U8,
    I32,
    I64,
}

impl DataType {
    pub const fn size_in_bits(&self) -> usize {
        match self {
            DataType::FP4E2M1 => 4,
            DataType::F8E4M3 | DataType::I8 | DataType::U8 => 8,
            DataType::BF16 | DataType::F16 => 16,
            DataType::F32 | DataType::I32 => 32,
            DataType::I64 => 64,
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        self.size_in_bits().div_ceil(8)
    }

    pub const fn is_compressed(&self) -> bool {
        matches!(self, DataType::F8E4M3 | DataType::FP4E2M1)
    }

    pub const fn is_floating_point(&self) -> bool {
        matches!(
            self,
            DataType::BF16
                | DataType::F16
                | DataType::F32
                | DataType::F8E4M3
                | DataType::FP4E2M1
        )
    }

    /// Bytes occupied by `count` elements, rounding sub-byte types up.
    pub const fn bytes_for(
        &self,
        count: usize,
    ) -> usize {
        (count * self.size_in_bits()).div_ceil(8)
    }
}

/// Host-readable element types, used when a backend inspects buffer contents.
pub trait ArrayElement: NumCast + Pod {
    fn data_type() -> DataType;
}

macro_rules! impl_array_element {
    ($($type:ty => $variant:ident),+ $(,)?) => {
        $(
            impl ArrayElement for $type {
                fn data_type() -> DataType {
                    DataType::$variant
                }
            }
        )+
    };
}

impl_array_element! {
    f16 => F16,
    bf16 => BF16,
    f32 => F32,
    i8 => I8,
    u8 => U8,
    i32 => I32,
    i64 => I64,
}

/// 8-bit floating point storage (e4m3), opaque to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct F8E4M3(pub u8);

/// Two packed 4-bit floating point values (e2m1), opaque to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FP4E2M1x2(pub u8);

/// Element types an attention runner can be instantiated with.
pub trait AttentionElement: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;
}

macro_rules! impl_attention_element {
    ($($type:ty => $variant:ident),+ $(,)?) => {
        $(
            impl AttentionElement for $type {
                const DATA_TYPE: DataType = DataType::$variant;
            }
        )+
    };
}

impl_attention_element! {
    f32 => F32,
    f16 => F16,
    bf16 => BF16,
    F8E4M3 => F8E4M3,
    FP4E2M1x2 => FP4E2M1,
}
