mod backend;
mod context;
mod device_properties;
pub mod kernel;
mod native_buffer;

pub use backend::Backend;
pub use context::Context;
pub use device_properties::{DeviceProperties, MemoryInfo};
pub use kernel::AttentionKernels;
pub use native_buffer::NativeBuffer;
