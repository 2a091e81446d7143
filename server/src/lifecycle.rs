use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use common::{
    validation::{self, ValidationError},
    AppConfig, JobId, JobStatus, JobView,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::builder::{BuildRequest, PackageBuilder};
use crate::error::{CleanupError, CreateError, PipelineError};
use crate::scheduler::{CleanupKind, CleanupScheduler};
use crate::stager::{AssetStager, StageRequest};
use crate::store::{Job, JobStore, Removal};

/// Rutas y tiempos que usa el manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub uploads_root: PathBuf,
    pub builds_root: PathBuf,
    pub cleanup_delay: Duration,
    pub record_ttl: Option<Duration>,
}

/// Pedido de creación: los archivos ya están escritos en `uploadDir`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub config: AppConfig,
    pub input_files: Vec<PathBuf>,
    pub icon_file: Option<PathBuf>,
}

/// Dueño del ciclo de vida de los jobs: crea, expone, borra y maneja el
/// pipeline de cada uno en su propio task.
pub struct JobManager {
    store: JobStore,
    stager: AssetStager,
    builder: PackageBuilder,
    scheduler: CleanupScheduler,
    settings: LifecycleSettings,
}

impl JobManager {
    pub fn new(
        store: JobStore,
        stager: AssetStager,
        builder: PackageBuilder,
        scheduler: CleanupScheduler,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            stager,
            builder,
            scheduler,
            settings,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    /// Id nuevo, sin registrar todavía. Sirve de nombre para `uploadDir`.
    pub fn allocate_id(&self) -> JobId {
        Uuid::new_v4().to_string()
    }

    pub fn upload_dir(&self, id: &str) -> PathBuf {
        self.settings.uploads_root.join(id)
    }

    pub fn build_dir(&self, id: &str) -> PathBuf {
        self.settings.builds_root.join(id)
    }

    /// Valida, registra el job en `queued` y lanza su pipeline sin esperar.
    pub fn create(self: &Arc<Self>, req: NewJob) -> Result<JobId, CreateError> {
        validate_new_job(&req)?;

        let job = Job::new(
            req.id.clone(),
            req.config,
            req.input_files,
            req.icon_file,
            self.upload_dir(&req.id),
            self.build_dir(&req.id),
        );

        if let Err(job) = self.store.insert(job) {
            return Err(CreateError::DuplicateId(job.id));
        }

        info!("job {} creado (queued)", req.id);
        self.spawn_pipeline(req.id.clone());
        Ok(req.id)
    }

    pub fn get(&self, id: &str) -> Option<JobView> {
        self.store.get(id)
    }

    /// Borra los dos directorios del job y después su registro. Un job que
    /// todavía está corriendo no se toca. Si falla un borrado el registro
    /// queda, así el cleanup se puede reintentar.
    pub async fn delete(&self, id: &str) -> Result<(), CleanupError> {
        let (finished, upload_dir, build_dir) = self
            .store
            .read(id, |job| {
                (
                    job.status.is_terminal(),
                    job.upload_dir.clone(),
                    job.build_dir.clone(),
                )
            })
            .ok_or(CleanupError::NotFound)?;
        if !finished {
            return Err(CleanupError::Busy(id.to_string()));
        }

        remove_dir_if_exists(&upload_dir).await?;
        remove_dir_if_exists(&build_dir).await?;

        // un job terminado no vuelve a correr; Missing = lo expiró el scheduler
        if let Removal::Busy = self.store.remove_finished(id) {
            return Err(CleanupError::Busy(id.to_string()));
        }
        self.scheduler.cancel(id);

        info!("job {} limpiado", id);
        Ok(())
    }

    /// Un task independiente por job. El resultado se guarda en el store;
    /// nadie espera el `JoinHandle`.
    fn spawn_pipeline(self: &Arc<Self>, id: JobId) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = manager.run_pipeline(&id).await;
            manager.finish(&id, outcome);
        });
    }

    async fn run_pipeline(&self, id: &str) -> Result<String, PipelineError> {
        let job = self
            .store
            .read(id, Job::clone)
            .ok_or_else(|| PipelineError::JobVanished(id.to_string()))?;

        self.advance(id, JobStatus::Processing, 10)?;
        let layout = self
            .stager
            .stage(&StageRequest {
                job_id: id,
                input_files: &job.input_files,
                icon_file: job.icon_file.as_deref(),
                build_dir: &job.build_dir,
            })
            .await?;
        self.advance(id, JobStatus::Processing, 30)?;

        self.advance(id, JobStatus::Building, 30)?;
        let artifact = self
            .builder
            .build(&BuildRequest {
                job_id: id,
                config: &job.config,
                build_dir: &job.build_dir,
                staged: &layout,
            })
            .await?;
        self.advance(id, JobStatus::Building, 80)?;

        // reservado para firmar el artefacto
        self.advance(id, JobStatus::Signing, 90)?;

        Ok(artifact_url(id, &artifact))
    }

    fn advance(&self, id: &str, status: JobStatus, progress: u8) -> Result<(), PipelineError> {
        match self.store.update(id, |job| job.advance(status, progress)) {
            Some(Ok(())) => Ok(()),
            // el pipeline es el único que escribe: esto es un bug, no se sigue
            Some(Err(e)) => {
                error!("job {}: {}", id, e);
                Err(e.into())
            }
            None => Err(PipelineError::JobVanished(id.to_string())),
        }
    }

    fn finish(&self, id: &str, outcome: Result<String, PipelineError>) {
        let recorded = match outcome {
            Ok(url) => {
                let done = self.store.update(id, |job| job.complete(url.clone()));
                if matches!(done, Some(Ok(()))) {
                    info!("build completo para job {} -> {}", id, url);
                    self.schedule_upload_cleanup(id);
                }
                done
            }
            Err(e) => {
                error!("build falló para job {}: {}", id, e);
                self.store.update(id, |job| job.fail(e.to_string()))
            }
        };

        match recorded {
            Some(Ok(())) => self.schedule_expiry(id),
            Some(Err(e)) => warn!("job {}: no se pudo cerrar: {}", id, e),
            None => warn!("job {} ya no existe al terminar el pipeline", id),
        }
    }

    fn schedule_upload_cleanup(&self, id: &str) {
        let Some(upload_dir) = self.store.read(id, |job| job.upload_dir.clone()) else {
            return;
        };
        let job_id = id.to_string();

        self.scheduler.schedule(
            id,
            CleanupKind::Uploads,
            self.settings.cleanup_delay,
            async move {
                match remove_dir_if_exists(&upload_dir).await {
                    Ok(()) => info!("uploads de job {} limpiados", job_id),
                    Err(e) => error!("error limpiando uploads de job {}: {}", job_id, e),
                }
            },
        );
    }

    fn schedule_expiry(&self, id: &str) {
        let Some(ttl) = self.settings.record_ttl else {
            return;
        };
        let store = self.store.clone();
        let job_id = id.to_string();

        self.scheduler
            .schedule(id, CleanupKind::Expire, ttl, async move {
                let job = match store.remove_finished(&job_id) {
                    Removal::Removed(job) => job,
                    _ => return,
                };
                for dir in [&job.upload_dir, &job.build_dir] {
                    if let Err(e) = remove_dir_if_exists(dir).await {
                        error!("error expirando job {}: {}", job_id, e);
                    }
                }
                info!("job {} expirado", job_id);
            });
    }
}

/// Reglas de `create`: config completa, package válido, al menos un
/// archivo y un solo `index.html`.
pub fn validate_new_job(req: &NewJob) -> Result<(), ValidationError> {
    if req.input_files.is_empty() {
        return Err(ValidationError::NoFiles);
    }
    validation::validate_config(&req.config)?;
    if !validation::has_single_index(&req.input_files) {
        return Err(ValidationError::MissingIndex);
    }
    Ok(())
}

pub fn artifact_url(id: &str, artifact: &Path) -> String {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("/downloads/{id}/{name}")
}

/// `remove_dir_all` que ignora directorios que ya no están.
pub async fn remove_dir_if_exists(dir: &Path) -> Result<(), CleanupError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
