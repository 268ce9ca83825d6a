use std::{error::Error, fmt::Debug};

use super::{AttentionKernels, Context, NativeBuffer};

pub trait Backend: Debug + Sized + 'static {
    type NativeBuffer: NativeBuffer<Backend = Self>;
    type Context: Context<Backend = Self>;
    type Kernels: AttentionKernels<Backend = Self>;
    type Error: Error + Send + Sync + 'static;
}
