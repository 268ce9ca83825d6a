use super::{TraceBuffer, TraceContext, TraceError, TraceKernels};
use crate::backends::common::Backend;

#[derive(Debug, Clone)]
pub struct Trace;

impl Backend for Trace {
    type NativeBuffer = TraceBuffer;
    type Context = TraceContext;
    type Kernels = TraceKernels;
    type Error = TraceError;
}
