// server/src/state.rs

use std::sync::Arc;

use crate::builder::{load_branding, PackageBuilder};
use crate::config::ServerConfig;
use crate::lifecycle::{JobManager, LifecycleSettings};
use crate::runner::{ProcessRunner, TokioProcessRunner};
use crate::scheduler::CleanupScheduler;
use crate::stager::AssetStager;
use crate::store::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Arma el manager con el toolchain real.
    pub async fn new(config: ServerConfig) -> Self {
        let runner: Arc<dyn ProcessRunner> =
            Arc::new(TokioProcessRunner::new(config.toolchain.timeout));
        Self::with_runner(config, runner).await
    }

    /// Igual que `new` pero con un runner inyectado (tests).
    pub async fn with_runner(config: ServerConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        let branding = load_branding(config.toolchain.branding_template.as_deref()).await;
        let builder = PackageBuilder::new(
            runner,
            config.toolchain.program.clone(),
            config.toolchain.platform.clone(),
            branding,
        );

        let settings = LifecycleSettings {
            uploads_root: config.uploads_dir(),
            builds_root: config.builds_dir(),
            cleanup_delay: config.cleanup_delay,
            record_ttl: config.record_ttl,
        };

        let manager = JobManager::new(
            JobStore::new(),
            AssetStager::new(),
            builder,
            CleanupScheduler::new(),
            settings,
        );

        Self {
            manager: Arc::new(manager),
            config: Arc::new(config),
        }
    }
}
