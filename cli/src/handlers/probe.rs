use std::sync::Arc;

use attend::{
    BatchDispatcher, CompressedOutputProbe, DescriptorCache,
    backends::{
        common::DeviceProperties,
        trace::{Trace, TraceContext},
    },
    config::AttentionConfig,
};
use console::Style;

use super::{HandlerResult, load_json};

pub fn handle_probe(
    config_path: String,
    device: DeviceProperties,
) -> HandlerResult {
    let config: AttentionConfig = load_json(&config_path)?;
    let probe = CompressedOutputProbe::from(&config);

    let context = TraceContext::new(device);
    let kernels = context.kernels();
    let dispatcher = BatchDispatcher::<Trace>::new(context, kernels, Arc::new(DescriptorCache::new()));
    let supported = dispatcher.supports_compressed_output(&probe)?;

    let style = if supported {
        Style::new().green().bold()
    } else {
        Style::new().yellow().bold()
    };
    println!(
        "{} on compute capability {}: {}",
        Style::new().bold().apply_to("4-bit compressed output"),
        device.compute_capability,
        style.apply_to(if supported {
            "supported"
        } else {
            "unsupported"
        }),
    );
    Ok(())
}
