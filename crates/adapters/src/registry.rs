//! Adapter registry.
//!
//! An immutable map from resource id to adapter, assembled once at process
//! start. Registration failures are recorded (with secrets masked) rather
//! than aborting startup, so an operator can see what went wrong from the
//! admin surface instead of scraping boot logs.

use std::collections::HashMap;
use std::sync::Arc;

use prg_domain::config::Config;

use crate::gemini::GeminiAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::ResourceAdapter;
use crate::util::mask_secrets;

/// Records an adapter that failed to initialize.
#[derive(Debug, Clone)]
pub struct AdapterInitError {
    pub resource_id: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Immutable `resourceId → adapter` map.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ResourceAdapter>>,
    init_errors: Vec<AdapterInitError>,
}

impl AdapterRegistry {
    /// Build the registry: the built-in LLM adapters plus any extra
    /// OpenAI-compatible resources named in `[resources]` with a base URL.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = RegistryBuilder::default();

        builder.register(OpenAiCompatAdapter::new(
            "groq",
            "https://api.groq.com/openai/v1",
        ));
        builder.register(OpenAiCompatAdapter::new("openai", "https://api.openai.com/v1"));
        builder.register(GeminiAdapter::new());

        // Extra OpenAI-compatible providers declared in config, e.g.
        // [resources."llm:together"] base_url = "https://api.together.xyz/v1"
        for (resource_id, resource_cfg) in &config.resources {
            if builder.adapters.contains_key(resource_id) {
                continue;
            }
            let Some((resource_type, provider)) =
                prg_domain::permission::split_resource_id(resource_id)
            else {
                builder.init_errors.push(AdapterInitError {
                    resource_id: resource_id.clone(),
                    error: "not a valid <type>:<provider> id".into(),
                });
                continue;
            };
            if resource_type != "llm" {
                builder.init_errors.push(AdapterInitError {
                    resource_id: resource_id.clone(),
                    error: format!("no adapter family for resource type '{resource_type}'"),
                });
                continue;
            }
            match &resource_cfg.base_url {
                Some(base_url) => {
                    builder.register(OpenAiCompatAdapter::new(provider, base_url));
                }
                None => builder.init_errors.push(AdapterInitError {
                    resource_id: resource_id.clone(),
                    error: "config-declared resource needs a base_url".into(),
                }),
            }
        }

        for err in &builder.init_errors {
            tracing::warn!(
                resource_id = %err.resource_id,
                error = %mask_secrets(&err.error),
                "adapter not registered"
            );
        }
        tracing::info!(adapters = builder.adapters.len(), "adapter registry ready");

        AdapterRegistry {
            adapters: builder.adapters,
            init_errors: builder.init_errors,
        }
    }

    /// Registry over an explicit adapter set (tests, embedding).
    pub fn from_adapters(adapters: Vec<Arc<dyn ResourceAdapter>>) -> Self {
        let mut map = HashMap::new();
        for adapter in adapters {
            map.insert(adapter.descriptor().id.clone(), adapter);
        }
        AdapterRegistry {
            adapters: map,
            init_errors: Vec::new(),
        }
    }

    pub fn get(&self, resource_id: &str) -> Option<Arc<dyn ResourceAdapter>> {
        self.adapters.get(resource_id).cloned()
    }

    /// All registered adapters, sorted by resource id (for discovery).
    pub fn list(&self) -> Vec<Arc<dyn ResourceAdapter>> {
        let mut all: Vec<_> = self.adapters.values().cloned().collect();
        all.sort_by(|a, b| a.descriptor().id.cmp(&b.descriptor().id));
        all
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Initialization errors (empty when everything registered).
    pub fn init_errors(&self) -> &[AdapterInitError] {
        &self.init_errors
    }
}

#[derive(Default)]
struct RegistryBuilder {
    adapters: HashMap<String, Arc<dyn ResourceAdapter>>,
    init_errors: Vec<AdapterInitError>,
}

impl RegistryBuilder {
    fn register<A: ResourceAdapter + 'static>(&mut self, adapter: A) {
        let id = adapter.descriptor().id.clone();
        tracing::debug!(resource_id = %id, "registered adapter");
        self.adapters.insert(id, Arc::new(adapter));
    }
}
