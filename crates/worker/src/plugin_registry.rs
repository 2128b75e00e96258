use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use scheduler_core::traits::{JobPlugin, PluginConfiguration};
use scheduler_core::{SchedulerError, SchedulerResult};
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Creates a fresh, uninitialized plugin.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn JobPlugin> + Send + Sync>;

/// A plugin together with its one-shot initialization flag.
pub struct PluginInstance {
    name: String,
    plugin: Arc<dyn JobPlugin>,
    initialized: AtomicBool,
}

impl PluginInstance {
    pub fn new(name: impl Into<String>, plugin: Arc<dyn JobPlugin>) -> Self {
        Self {
            name: name.into(),
            plugin,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &Arc<dyn JobPlugin> {
        &self.plugin
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Runs the plugin's `initialize` exactly once. A second call fails with
    /// `PluginAlreadyInitialized`; a failed initialization may be retried.
    pub async fn initialize(&self, config: PluginConfiguration) -> SchedulerResult<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SchedulerError::PluginAlreadyInitialized(self.name.clone()));
        }

        if let Err(err) = self.plugin.initialize(config).await {
            self.initialized.store(false, Ordering::Release);
            return Err(SchedulerError::PluginInitialization {
                name: self.name.clone(),
                message: err.to_string(),
            });
        }
        Ok(())
    }
}

struct PluginSlot {
    factory: PluginFactory,
    parallel: bool,
    instance: OnceCell<Arc<PluginInstance>>,
}

impl PluginSlot {
    fn new(factory: PluginFactory, parallel: bool) -> Self {
        Self {
            factory,
            parallel,
            instance: OnceCell::new(),
        }
    }
}

/// Name → factory table with one shared instance per name.
///
/// The instance for a name is created and initialized on first use, with the
/// parameters of the job that first needed it. Initialization runs outside the
/// table lock, so a slow plugin only holds up callers of that same name.
#[derive(Default)]
pub struct PluginRegistry {
    slots: RwLock<HashMap<String, Arc<PluginSlot>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory. The factory is called once here to learn whether the
    /// plugin supports parallel execution.
    pub async fn register<F>(&self, name: impl Into<String>, factory: F) -> SchedulerResult<()>
    where
        F: Fn() -> Arc<dyn JobPlugin> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut slots = self.slots.write().await;
        if slots.contains_key(&name) {
            return Err(SchedulerError::PluginAlreadyRegistered(name));
        }
        let parallel = factory().supports_parallel_execution();
        info!(plugin = %name, parallel, "plugin registered");
        slots.insert(name, Arc::new(PluginSlot::new(Arc::new(factory), parallel)));
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.slots.read().await.contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub async fn available_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the shared instance for `name`, creating and initializing it on first use.
    ///
    /// Concurrent first calls for one name initialize a single instance; a failed
    /// initialization is not cached.
    pub async fn get_or_create(
        &self,
        name: &str,
        parameters: &HashMap<String, Value>,
    ) -> SchedulerResult<Arc<PluginInstance>> {
        let slot = self
            .slots
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownPlugin(name.to_string()))?;

        let instance = slot
            .instance
            .get_or_try_init(|| async {
                let instance = Arc::new(PluginInstance::new(name, (slot.factory)()));
                instance
                    .initialize(PluginConfiguration::new(parameters.clone()))
                    .await?;
                debug!(
                    plugin = %name,
                    version = instance.plugin().version(),
                    "plugin instance created"
                );
                Ok::<_, SchedulerError>(instance)
            })
            .await?;
        Ok(Arc::clone(instance))
    }

    pub async fn instance(&self, name: &str) -> Option<Arc<PluginInstance>> {
        self.slots
            .read()
            .await
            .get(name)
            .and_then(|slot| slot.instance.get().cloned())
    }

    /// Whether jobs of this plugin may overlap. Unknown plugins report `true`.
    pub async fn supports_parallel_execution(&self, name: &str) -> bool {
        self.slots
            .read()
            .await
            .get(name)
            .map_or(true, |slot| slot.parallel)
    }

    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let instances = self.created_instances().await;
        let checks = instances.iter().map(|instance| async move {
            (instance.name().to_string(), instance.plugin().is_healthy().await)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Shuts down every created instance and forgets them. Factories stay registered.
    pub async fn shutdown(&self) {
        let instances: Vec<Arc<PluginInstance>> = {
            let mut slots = self.slots.write().await;
            slots
                .values_mut()
                .filter_map(|slot| {
                    let fresh =
                        Arc::new(PluginSlot::new(Arc::clone(&slot.factory), slot.parallel));
                    std::mem::replace(slot, fresh).instance.get().cloned()
                })
                .collect()
        };
        if instances.is_empty() {
            return;
        }
        join_all(instances.iter().map(|instance| instance.plugin().shutdown())).await;
        info!(count = instances.len(), "plugins shut down");
    }

    async fn created_instances(&self) -> Vec<Arc<PluginInstance>> {
        self.slots
            .read()
            .await
            .values()
            .filter_map(|slot| slot.instance.get().cloned())
            .collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").finish_non_exhaustive()
    }
}

/// Logs and swallows a registration conflict; used for idempotent bootstrap.
pub(crate) fn warn_if_registered(result: SchedulerResult<()>) -> SchedulerResult<()> {
    match result {
        Err(SchedulerError::PluginAlreadyRegistered(name)) => {
            warn!(plugin = %name, "plugin already registered, keeping existing factory");
            Ok(())
        }
        other => other,
    }
}
