use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use common::{AppConfig, JobId, JobStatus, JobView};
use thiserror::Error;

/// Registro completo de un job. Sólo el task del pipeline lo escribe
/// mientras está activo; los polls de status lo leen.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub config: AppConfig,
    pub input_files: Vec<PathBuf>,
    pub icon_file: Option<PathBuf>,
    pub upload_dir: PathBuf,
    pub build_dir: PathBuf,
    pub artifact_url: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Job {
    pub fn new(
        id: JobId,
        config: AppConfig,
        input_files: Vec<PathBuf>,
        icon_file: Option<PathBuf>,
        upload_dir: PathBuf,
        build_dir: PathBuf,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            config,
            input_files,
            icon_file,
            upload_dir,
            build_dir,
            artifact_url: None,
            error_detail: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mueve status y progreso juntos. El status nunca retrocede y el
    /// progreso nunca baja (se queda con el máximo).
    pub fn advance(&mut self, status: JobStatus, progress: u8) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(status) {
            return Err(InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.progress = self.progress.max(progress.min(100));
        Ok(())
    }

    pub fn complete(&mut self, artifact_url: String) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Completed, 100)?;
        self.artifact_url = Some(artifact_url);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// El progreso queda donde estaba.
    pub fn fail(&mut self, detail: String) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Failed, self.progress)?;
        self.error_detail = Some(detail);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            artifact_url: self.artifact_url.clone(),
            error_detail: self.error_detail.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Resultado de intentar sacar un job del registro.
#[derive(Debug)]
pub enum Removal {
    Removed(Job),
    /// El pipeline todavía está corriendo; no se tocó nada.
    Busy,
    Missing,
}

/// Registro compartido de jobs: mapa id → entrada con su propio lock.
///
/// El `RwLock` externo sólo protege la forma del mapa (altas, bajas,
/// búsquedas); cada job se muta bajo su `Mutex`, así un poll de un job no
/// espera a la escritura de otro.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, Arc<Mutex<Job>>>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta un job nuevo. Si el id ya existe no pisa nada y devuelve
    /// el job de vuelta.
    pub fn insert(&self, job: Job) -> Result<(), Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(job);
        }
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    fn entry(&self, id: &str) -> Option<Arc<Mutex<Job>>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).cloned()
    }

    pub fn get(&self, id: &str) -> Option<JobView> {
        self.read(id, Job::view)
    }

    /// Lee el job bajo su lock.
    pub fn read<R>(&self, id: &str, f: impl FnOnce(&Job) -> R) -> Option<R> {
        let entry = self.entry(id)?;
        let job = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&job))
    }

    /// Modifica el job en el lugar. `None` si el id no existe.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let entry = self.entry(id)?;
        let mut job = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut job))
    }

    /// Saca el job sólo si ya terminó (completed/failed). El chequeo y el
    /// borrado pasan bajo el mismo write lock del mapa.
    pub fn remove_finished(&self, id: &str) -> Removal {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let finished = match jobs.get(id) {
            None => return Removal::Missing,
            Some(entry) => entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .status
                .is_terminal(),
        };
        if !finished {
            return Removal::Busy;
        }
        match jobs.remove(id) {
            Some(entry) => {
                let job = entry.lock().unwrap_or_else(PoisonError::into_inner).clone();
                Removal::Removed(job)
            }
            None => Removal::Missing,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
