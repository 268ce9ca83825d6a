use super::{Backend, DeviceProperties, MemoryInfo};

pub trait Context: Sized {
    type Backend: Backend<Context = Self>;

    fn device_properties(&self) -> DeviceProperties;

    fn memory_info(
        &self
    ) -> Result<MemoryInfo, <Self::Backend as Backend>::Error>;

    fn create_buffer(
        &self,
        size: usize,
    ) -> Result<
        <Self::Backend as Backend>::NativeBuffer,
        <Self::Backend as Backend>::Error,
    >;
}
