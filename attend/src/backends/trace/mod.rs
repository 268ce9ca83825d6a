//! In-process reference backend.
//!
//! Buffers are host vectors and kernels perform no math: every launch is
//! recorded in submission order so callers can inspect exactly what a
//! dispatch would have run on a device.

mod backend;
mod batch;
mod buffer;
mod context;
mod error;
mod kernels;
mod memory;

pub use backend::Trace;
pub use batch::{BatchShape, TraceBatch};
pub use buffer::TraceBuffer;
pub use context::TraceContext;
pub use error::TraceError;
pub use kernels::{KernelLaunch, LaunchKernel, TraceKernels};
