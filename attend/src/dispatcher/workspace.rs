use crate::{
    DataType,
    backends::common::{Backend, Context, NativeBuffer},
    error::DispatchError,
    tensor::DeviceTensor,
};

/// Requirements at or above this size are checked against free device
/// memory before allocating.
pub const WORKSPACE_MEMORY_CHECK_THRESHOLD: usize = 16 << 30;

/// Caller-owned scratch buffer reused across dispatches.
#[derive(Debug)]
pub struct Workspace<B: Backend> {
    buffer: B::NativeBuffer,
}

impl<B: Backend> Workspace<B> {
    pub fn new(buffer: B::NativeBuffer) -> Self {
        Self {
            buffer,
        }
    }

    pub fn allocate(
        context: &B::Context,
        size: usize,
    ) -> Result<Self, B::Error> {
        context.create_buffer(size).map(Self::new)
    }

    pub fn size(&self) -> usize {
        self.buffer.length()
    }

    pub fn buffer(&self) -> &B::NativeBuffer {
        &self.buffer
    }

    pub fn tensor(&self) -> DeviceTensor {
        DeviceTensor::new(self.buffer.id(), DataType::U8, &[self.size()])
    }
}

/// Fails fast when a very large workspace would not fit in free memory.
pub(crate) fn check_available_memory<B: Backend>(
    context: &B::Context,
    required: usize,
) -> Result<(), DispatchError<B>> {
    if required < WORKSPACE_MEMORY_CHECK_THRESHOLD {
        return Ok(());
    }
    let available = context.memory_info().map_err(DispatchError::Backend)?.free;
    if required >= available {
        return Err(DispatchError::ResourceExhausted {
            required,
            available,
        });
    }
    Ok(())
}

/// Returns a workspace of at least `required` bytes, growing the caller's
/// slot when needed. An adequate workspace is left untouched.
pub(crate) fn acquire<'w, B: Backend>(
    context: &B::Context,
    slot: &'w mut Option<Workspace<B>>,
    required: usize,
) -> Result<&'w Workspace<B>, DispatchError<B>> {
    let workspace = match slot.take() {
        Some(workspace) if workspace.size() >= required => workspace,
        Some(workspace) => {
            log::warn!(
                "Attention workspace size is not enough, increase the size from {} bytes to {} bytes",
                workspace.size(),
                required
            );
            drop(workspace);
            Workspace::allocate(context, required).map_err(DispatchError::Backend)?
        },
        None => Workspace::allocate(context, required).map_err(DispatchError::Backend)?,
    };
    Ok(slot.insert(workspace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        common::DeviceProperties,
        trace::{Trace, TraceContext},
    };

    #[test]
    fn test_acquire_grows_but_never_shrinks() {
        let context = TraceContext::new(DeviceProperties::default());
        let mut slot: Option<Workspace<Trace>> = None;

        let id = acquire(&*context, &mut slot, 1024).unwrap().buffer().id();
        assert_eq!(slot.as_ref().unwrap().size(), 1024);

        assert_eq!(acquire(&*context, &mut slot, 512).unwrap().buffer().id(), id);
        assert_eq!(slot.as_ref().unwrap().size(), 1024);

        let grown = acquire(&*context, &mut slot, 4096).unwrap().buffer().id();
        assert_ne!(grown, id);
        assert_eq!(slot.as_ref().unwrap().size(), 4096);
    }

    #[test]
    fn test_large_requirement_checks_free_memory() {
        let context = TraceContext::new(DeviceProperties::default());
        context.set_free_memory(20 << 30);
        assert!(check_available_memory::<Trace>(&context, 1 << 30).is_ok());
        assert!(check_available_memory::<Trace>(&context, 17 << 30).is_ok());
        assert!(matches!(
            check_available_memory::<Trace>(&context, 24 << 30),
            Err(DispatchError::ResourceExhausted {
                required,
                available,
            }) if required == 24 << 30 && available == 20 << 30
        ));
    }
}
