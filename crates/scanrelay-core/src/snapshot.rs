//! Immutable configuration snapshot built from one load.
//!
//! A snapshot is built completely off to the side and only then published, so
//! readers never observe a half-built routing table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scanrelay_state::RetentionLimits;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::ConfigError;
use crate::obs;
use crate::outputs::{Output, OutputFactory};
use crate::routing::Route;
use crate::template::{build_evaluator, ContentEvaluator, TemplateEngine};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const MAINTENANCE_BASE: Duration = Duration::from_secs(60 * 60);

pub struct Snapshot {
    server_url: Arc<str>,
    retention: RetentionLimits,
    maintenance_interval: Duration,
    queue_capacity: usize,
    permits: Arc<Semaphore>,
    /// Routes in configuration order.
    routes: Vec<Arc<Route>>,
    route_index: HashMap<String, usize>,
    evaluators: HashMap<String, Arc<dyn ContentEvaluator>>,
    outputs: HashMap<String, Arc<dyn Output>>,
}

impl Snapshot {
    /// Build evaluators and initialise enabled outputs.
    ///
    /// Any evaluator or output failure aborts the whole build; outputs already
    /// initialised are terminated before the error is returned.
    pub async fn build(
        config: &Config,
        engine: &dyn TemplateEngine,
        factory: &dyn OutputFactory,
        http: &reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let mut evaluators = HashMap::new();
        for template in &config.templates {
            let evaluator =
                build_evaluator(template, engine, http, config.bundle_dir.as_deref()).await?;
            evaluators.insert(template.name.clone(), evaluator);
        }

        let mut outputs: HashMap<String, Arc<dyn Output>> = HashMap::new();
        for settings in &config.outputs {
            if !settings.enable {
                info!(output = %settings.name, "output is disabled, skipping");
                continue;
            }
            let initialised = match factory.build(settings) {
                Ok(output) => match output.init().await {
                    Ok(()) => Ok(output),
                    Err(e) => Err(ConfigError::Output {
                        name: settings.name.clone(),
                        reason: format!("init failed: {e}"),
                    }),
                },
                Err(e) => Err(e),
            };
            match initialised {
                Ok(output) => {
                    outputs.insert(settings.name.clone(), output);
                }
                Err(e) => {
                    terminate_all(outputs.values()).await;
                    return Err(e);
                }
            }
        }

        let routes: Vec<Arc<Route>> = config
            .routes
            .iter()
            .map(|r| Arc::new(Route::from_settings(r)))
            .collect();
        let route_index = routes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        for route in &routes {
            if route.outputs.is_empty() {
                warn!(route = %route.name, "route has no outputs and will never dispatch");
            }
        }

        let retention = RetentionLimits {
            max_size_bytes: (config.max_db_size > 0).then_some(config.max_db_size),
            max_age: (config.delete_old_data > 0)
                .then(|| Duration::from_secs(config.delete_old_data * SECONDS_PER_DAY)),
        };

        obs::emit_config_loaded(routes.len(), outputs.len(), evaluators.len());
        Ok(Self {
            server_url: Arc::from(config.server_url_prefix()),
            retention,
            maintenance_interval: MAINTENANCE_BASE * config.maintenance_multiplier(),
            queue_capacity: config.queue_capacity(),
            permits: Arc::new(Semaphore::new(config.max_in_flight())),
            routes,
            route_index,
            evaluators,
            outputs,
        })
    }

    pub fn server_url(&self) -> Arc<str> {
        Arc::clone(&self.server_url)
    }

    pub fn retention(&self) -> RetentionLimits {
        self.retention
    }

    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Bound on concurrently running processor jobs.
    pub fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn route(&self, name: &str) -> Option<&Arc<Route>> {
        self.route_index.get(name).map(|i| &self.routes[*i])
    }

    pub fn evaluator(&self, name: &str) -> Option<&Arc<dyn ContentEvaluator>> {
        self.evaluators.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Arc<dyn Output>> {
        self.outputs.get(name)
    }

    pub fn output_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.outputs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Terminate every output of this snapshot; errors are logged.
    pub async fn terminate_outputs(&self) {
        terminate_all(self.outputs.values()).await;
    }
}

async fn terminate_all<'a>(outputs: impl Iterator<Item = &'a Arc<dyn Output>>) {
    for output in outputs {
        match output.terminate().await {
            Ok(()) => info!(output = %output.name(), "output terminated"),
            Err(e) => warn!(output = %output.name(), error = %e, "output terminate failed"),
        }
    }
}
