use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{EventSink, VolumeEnumerator, VolumeRegistry};

/// Shared daemon state handed to the watcher and the RPC handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub registry: VolumeRegistry,
    pub enumerator: Arc<dyn VolumeEnumerator>,
    pub sink: Arc<dyn EventSink>,
}

impl AppContext {
    /// Build the context and seed batch mode from the configuration.
    pub fn new(
        config: AppConfig,
        enumerator: Arc<dyn VolumeEnumerator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let registry = VolumeRegistry::new();
        registry.set_batch(config.batch.clone());

        Self {
            config: Arc::new(config),
            registry,
            enumerator,
            sink,
        }
    }
}
