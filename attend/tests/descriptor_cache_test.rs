mod common;

use std::sync::Arc;

use attend::{
    ConfigError, DataType, DescriptorCache, DispatchError, OperationDescriptor,
    config::{AttentionConfig, MaskType, QuantMode},
    descriptor::OutputQuantization,
};
use common::{Harness, llama_config, mixed_shape};

fn key_of(config: &AttentionConfig) -> attend::descriptor::DescriptorKey {
    *OperationDescriptor::new(config, DataType::F16, OutputQuantization::None, true, None)
        .unwrap()
        .key()
}

#[test]
fn test_fingerprint_covers_descriptor_fields() {
    let base = llama_config();
    let base_key = key_of(&base);
    assert_eq!(base_key, key_of(&llama_config()));

    let variants = [
        AttentionConfig {
            tokens_per_block: Some(32),
            ..llama_config()
        },
        AttentionConfig {
            q_scaling: 0.5,
            ..llama_config()
        },
        AttentionConfig {
            mask_type: MaskType::SlidingWindowCausal,
            ..llama_config()
        },
        AttentionConfig {
            quant_mode: QuantMode::from_bits(QuantMode::INT8_KV_CACHE),
            ..llama_config()
        },
        AttentionConfig {
            layer_idx: 3,
            ..llama_config()
        },
    ];
    for variant in &variants {
        assert_ne!(key_of(variant), base_key, "{variant:?}");
    }

    // Call-site parameters do not take part in kernel selection.
    let runner_only = AttentionConfig {
        beam_width: 4,
        max_num_requests: 64,
        attention_window_size: 128,
        ..llama_config()
    };
    assert_eq!(key_of(&runner_only), base_key);
}

#[test]
fn test_runner_configuration_shares_descriptor() {
    let harness = Harness::new(90);
    let config = llama_config();
    let batch = harness.batch(&config, &mixed_shape(&[8], &[16]));
    harness.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();

    let wider = AttentionConfig {
        max_num_requests: 16,
        ..llama_config()
    };
    harness.dispatcher.run(&wider, &batch.inputs(), &mut None).unwrap();

    assert_eq!(harness.dispatcher.cache().descriptor_count(), 1);
    assert_eq!(harness.dispatcher.operation_count(), 2);
    assert_eq!(harness.kernels.load_count(), 1);
    assert_eq!(harness.kernels.preparation_count(), 2);
    assert_eq!(harness.kernels.semaphore_reservations(), vec![32 * 8, 32 * 16]);
}

#[test]
fn test_cache_is_shared_between_dispatchers() {
    let cache = Arc::new(DescriptorCache::new());
    let first = Harness::with_cache(90, cache.clone());
    let second = Harness::with_cache(90, cache.clone());
    let config = llama_config();

    let batch = first.batch(&config, &mixed_shape(&[8], &[16]));
    first.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    let batch = second.batch(&config, &mixed_shape(&[8], &[16]));
    second.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();

    assert_eq!(cache.descriptor_count(), 1);
    // Each backend loads its own kernels and prepares its own semaphores.
    for harness in [&first, &second] {
        assert_eq!(harness.kernels.load_count(), 1);
        assert_eq!(harness.kernels.preparation_count(), 1);
        assert_eq!(harness.kernels.semaphore_reservations().len(), 1);
        assert_eq!(harness.dispatcher.operation_count(), 1);
        assert_eq!(harness.kernels.launches().len(), 2);
    }
}

#[test]
fn test_devices_sharing_a_cache_keep_their_own_checks() {
    let cache = Arc::new(DescriptorCache::new());
    let hopper = Harness::with_cache(90, cache.clone());
    let ampere = Harness::with_cache(80, cache.clone());
    let fp8_output = AttentionConfig {
        output_data_type: Some(DataType::F8E4M3),
        ..llama_config()
    };

    let batch = hopper.batch(&fp8_output, &mixed_shape(&[8], &[16]));
    hopper.dispatcher.run(&fp8_output, &batch.inputs(), &mut None).unwrap();
    let batch = ampere.batch(&fp8_output, &mixed_shape(&[8], &[16]));
    assert!(matches!(
        ampere.dispatcher.run(&fp8_output, &batch.inputs(), &mut None),
        Err(DispatchError::Configuration(ConfigError::UnsupportedHardware {
            required: 89,
            actual: 80,
            ..
        }))
    ));
    assert!(ampere.kernels.launches().is_empty());
    assert_eq!(ampere.kernels.load_count(), 0);
    assert_eq!(cache.descriptor_count(), 1);

    let config = llama_config();
    let batch = hopper.batch(&config, &mixed_shape(&[8], &[16]));
    hopper.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    let batch = ampere.batch(&config, &mixed_shape(&[8], &[16]));
    ampere.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(cache.descriptor_count(), 3);
    assert_eq!(ampere.kernels.load_count(), 1);
    assert_eq!(ampere.kernels.preparation_count(), 1);
}

#[test]
fn test_failed_initialization_is_not_cached() {
    let cache = Arc::new(DescriptorCache::new());
    let config = AttentionConfig {
        output_data_type: Some(DataType::F8E4M3),
        ..llama_config()
    };

    let ampere = Harness::with_cache(80, cache.clone());
    let batch = ampere.batch(&config, &mixed_shape(&[8], &[]));
    assert!(ampere.dispatcher.run(&config, &batch.inputs(), &mut None).is_err());
    assert_eq!(cache.descriptor_count(), 0);

    let hopper = Harness::with_cache(90, cache.clone());
    let batch = hopper.batch(&config, &mixed_shape(&[8], &[]));
    hopper.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(cache.descriptor_count(), 1);
}
