use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Datos de la app que manda el cliente en el campo `config`.
///
/// Los campos son `String` con default para que un JSON incompleto se pueda
/// parsear y el error salga de la validación ("faltan campos"), no de serde.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub package_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Building,
    Signing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Posición en el orden del pipeline. `Failed` queda al final porque
    /// se puede llegar a él desde cualquier etapa activa.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Building => 2,
            JobStatus::Signing => 3,
            JobStatus::Completed => 4,
            JobStatus::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Devuelve true si pasar de `self` a `next` respeta el orden
    /// queued → processing → building → signing → completed
    /// (o el desvío a failed). Quedarse en el mismo estado también vale.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed => self != JobStatus::Queued,
            _ => next.rank() > self.rank(),
        }
    }

    /// Si `next` se puede alcanzar desde `self` en una o más transiciones.
    /// A diferencia de `can_advance_to`, failed se alcanza también desde
    /// queued (pasando por processing).
    pub fn can_reach(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Building => "building",
            JobStatus::Signing => "signing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lo que ve un cliente al consultar `/api/status/:jobId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
