use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::{
    backends::common::DeviceProperties,
    descriptor::{DescriptorKey, OperationDescriptor},
    error::ConfigError,
};

type CacheKey = (DescriptorKey, DeviceProperties);

/// Process-scoped store of initialized descriptors.
///
/// Entries are keyed by fingerprint and device, so dispatchers on different
/// devices can share one cache. Entries are never evicted. Lookups of cached
/// entries only take a read lock; first-time creation is serialized so that
/// each entry is initialized at most once even when several threads race on
/// it.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    descriptors: RwLock<HashMap<CacheKey, Arc<OperationDescriptor>>>,
    capabilities: RwLock<HashMap<CacheKey, bool>>,
    creation: Mutex<()>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor cached under `key` for `device`, or stores the
    /// one built by `factory`. The factory runs at most once per entry.
    pub fn get_or_create<E, F>(
        &self,
        key: &DescriptorKey,
        device: &DeviceProperties,
        factory: F,
    ) -> Result<Arc<OperationDescriptor>, E>
    where
        E: From<ConfigError>,
        F: FnOnce() -> Result<OperationDescriptor, E>,
    {
        let cache_key = (*key, *device);
        if let Some(descriptor) = self.cached_descriptor(&cache_key)? {
            log::trace!("Descriptor cache hit for layer {}", key.layer_idx);
            return Ok(descriptor);
        }

        let _creation = self.creation.lock().map_err(|_| ConfigError::CachePoisoned)?;
        if let Some(descriptor) = self.cached_descriptor(&cache_key)? {
            return Ok(descriptor);
        }
        log::trace!("Creating descriptor {:?} on {:?}", key, device);
        let descriptor = Arc::new(factory()?);
        debug_assert_eq!(descriptor.key(), key, "factory built a different fingerprint");
        self.descriptors
            .write()
            .map_err(|_| ConfigError::CachePoisoned)?
            .insert(cache_key, descriptor.clone());
        Ok(descriptor)
    }

    /// Cached answer of the compressed-output capability query for `key` on
    /// `device`, computed by `probe` on first use.
    pub fn supports_compressed_output<E, F>(
        &self,
        key: &DescriptorKey,
        device: &DeviceProperties,
        probe: F,
    ) -> Result<bool, E>
    where
        E: From<ConfigError>,
        F: FnOnce() -> Result<bool, E>,
    {
        let cache_key = (*key, *device);
        let cached = self
            .capabilities
            .read()
            .map_err(|_| ConfigError::CachePoisoned)?
            .get(&cache_key)
            .copied();
        if let Some(supported) = cached {
            return Ok(supported);
        }

        let _creation = self.creation.lock().map_err(|_| ConfigError::CachePoisoned)?;
        let mut capabilities =
            self.capabilities.write().map_err(|_| ConfigError::CachePoisoned)?;
        if let Some(&supported) = capabilities.get(&cache_key) {
            return Ok(supported);
        }
        let supported = probe()?;
        capabilities.insert(cache_key, supported);
        Ok(supported)
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.read().map_or(0, |descriptors| descriptors.len())
    }

    fn cached_descriptor(
        &self,
        key: &CacheKey,
    ) -> Result<Option<Arc<OperationDescriptor>>, ConfigError> {
        Ok(self
            .descriptors
            .read()
            .map_err(|_| ConfigError::CachePoisoned)?
            .get(key)
            .cloned())
    }
}
