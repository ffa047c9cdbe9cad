use {
    prometheus::{Encoder, Registry, TextEncoder},
    prometheus_metric_storage::StorageRegistry,
    std::sync::OnceLock,
};

static STORAGE_REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();

pub fn get_storage_registry() -> &'static StorageRegistry {
    STORAGE_REGISTRY.get_or_init(|| StorageRegistry::new(Registry::new()))
}

pub fn get_registry() -> &'static Registry {
    get_storage_registry().registry()
}

/// Renders all registered metrics in the text exposition format.
pub fn encode() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&get_registry().gather(), &mut buffer) {
        tracing::error!(?err, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
