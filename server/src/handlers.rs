use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{StatusCode, Uri},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    validation::{self, ValidationError},
    AppConfig, BuildAccepted, CleanupResponse, ErrorBody, HealthResponse, JobStatus, JobView,
};
use serde_json::{json, Value};
use tokio::{fs, io::AsyncWriteExt};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::lifecycle::{remove_dir_if_exists, NewJob};
use crate::state::AppState;

const ICON_UPLOAD_DIR: &str = "icon";

pub fn build_router(state: AppState) -> Router {
    let downloads = ServeDir::new(state.config.builds_dir());
    let body_limit = state.config.max_request_bytes();

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/build", post(create_build))
        .route("/api/status/:job_id", get(get_status))
        .route("/api/cleanup/:job_id", delete(cleanup_job))
        .nest_service("/downloads", downloads)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn index() -> Json<Value> {
    Json(json!({
        "name": "apk-builder",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Convert web applications to Android APK files",
        "endpoints": {
            "build": "POST /api/build",
            "status": "GET /api/status/:jobId",
            "cleanup": "DELETE /api/cleanup/:jobId",
            "download": "GET /downloads/:jobId/:filename",
            "health": "GET /health"
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        environment: state.config.environment.clone(),
    })
}

async fn not_found(uri: Uri) -> (StatusCode, Json<ErrorBody>) {
    let body = ErrorBody {
        error: "Not Found".to_string(),
        path: Some(uri.path().to_string()),
    };
    (StatusCode::NOT_FOUND, Json(body))
}

// Recibe la subida, crea el job y devuelve el id sin esperar el build
async fn create_build(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<BuildAccepted>), ApiError> {
    let job_id = state.manager.allocate_id();
    let upload_dir = state.manager.upload_dir(&job_id);

    let created = match receive_upload(&state, &upload_dir, multipart).await {
        Ok(upload) => upload.into_job(job_id).and_then(|req| {
            state.manager.create(req).map_err(ApiError::from)
        }),
        Err(e) => Err(e),
    };

    match created {
        Ok(job_id) => {
            info!("build aceptado: job {}", job_id);
            Ok((
                StatusCode::ACCEPTED,
                Json(BuildAccepted {
                    job_id,
                    status: JobStatus::Queued,
                    message: "Build started successfully".to_string(),
                }),
            ))
        }
        Err(e) => {
            // el pedido no creó job: sus archivos no tienen dueño
            if let Err(cleanup) = remove_dir_if_exists(&upload_dir).await {
                warn!("no se pudo borrar la subida rechazada: {}", cleanup);
            }
            if matches!(e, ApiError::Internal(_)) {
                error!("error en /api/build: {}", e);
            } else {
                info!("build rechazado: {}", e);
            }
            Err(e)
        }
    }
}

// Devuelve el estado de un job
async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    state.manager.get(&job_id).map(Json).ok_or(ApiError::NotFound)
}

// Borra directorios y registro de un job
async fn cleanup_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CleanupResponse>, ApiError> {
    state.manager.delete(&job_id).await.map_err(|e| {
        warn!("cleanup de job {} falló: {}", job_id, e);
        ApiError::from(e)
    })?;

    Ok(Json(CleanupResponse {
        message: "Job cleaned up successfully".to_string(),
    }))
}

/* ---------------- subida multipart ---------------- */

#[derive(Debug, Default)]
struct Upload {
    files: Vec<PathBuf>,
    icon: Option<PathBuf>,
    config_raw: Option<String>,
}

impl Upload {
    fn into_job(self, id: String) -> Result<NewJob, ApiError> {
        if self.files.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }
        let config = match self.config_raw.as_deref() {
            Some(raw) => validation::parse_config(raw)?,
            None => AppConfig::default(),
        };
        Ok(NewJob {
            id,
            config,
            input_files: self.files,
            icon_file: self.icon,
        })
    }
}

async fn receive_upload(
    state: &AppState,
    upload_dir: &FsPath,
    mut multipart: Multipart,
) -> Result<Upload, ApiError> {
    let max_files = state.config.max_files;
    let max_bytes = state.config.max_file_bytes;
    let request_limit = state.config.max_request_bytes();
    let mut upload = Upload::default();

    fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("creating upload dir: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, request_limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                if upload.files.len() >= max_files {
                    return Err(ValidationError::TooManyFiles(max_files).into());
                }
                let file_name = upload_name(&field)?;
                // se aplanan por nombre base: un repetido pisaría al anterior
                let repeated = upload.files.iter().any(|p| {
                    validation::base_name(p).is_some_and(|n| n.eq_ignore_ascii_case(&file_name))
                });
                if repeated {
                    return Err(ValidationError::DuplicateFile(file_name).into());
                }
                let path = save_field(field, upload_dir, &file_name, max_bytes).await?;
                upload.files.push(path);
            }
            "icon" => {
                if upload.icon.is_some() {
                    return Err(ValidationError::TooManyIcons.into());
                }
                let file_name = upload_name(&field)?;
                let icon_dir = upload_dir.join(ICON_UPLOAD_DIR);
                let path = save_field(field, &icon_dir, &file_name, max_bytes).await?;
                upload.icon = Some(path);
            }
            "config" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, request_limit))?;
                upload.config_raw = Some(raw);
            }
            // campos desconocidos se ignoran
            _ => {}
        }
    }

    Ok(upload)
}

/// Nombre base de un archivo subido, ya con la extensión verificada.
fn upload_name(field: &Field<'_>) -> Result<String, ApiError> {
    let file_name = field
        .file_name()
        .and_then(safe_file_name)
        .ok_or_else(|| ApiError::BadRequest("Uploaded file without a valid name".to_string()))?;
    validation::check_extension(&file_name)?;
    Ok(file_name)
}

/// Guarda un archivo del multipart en `dir/<file_name>`, cortando si
/// pasa `max_bytes`.
async fn save_field(
    mut field: Field<'_>,
    dir: &FsPath,
    file_name: &str,
    max_bytes: usize,
) -> Result<PathBuf, ApiError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::Internal(format!("creating {}: {e}", dir.display())))?;
    let path = dir.join(file_name);
    let mut out = fs::File::create(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("creating {}: {e}", path.display())))?;

    let mut written = 0usize;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        written += chunk.len();
        if written > max_bytes {
            return Err(ApiError::PayloadTooLarge(max_bytes));
        }
        out.write_all(&chunk)
            .await
            .map_err(|e| ApiError::Internal(format!("writing {}: {e}", path.display())))?;
    }
    out.flush()
        .await
        .map_err(|e| ApiError::Internal(format!("writing {}: {e}", path.display())))?;

    Ok(path)
}

/// Sólo el nombre base; descarta rutas y nombres vacíos o especiales.
fn safe_file_name(raw: &str) -> Option<String> {
    // algunos navegadores mandan "carpeta/archivo.css" o rutas de Windows
    let normalized = raw.replace('\\', "/");
    let name = normalized.rsplit('/').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(limit)
    } else {
        ApiError::BadRequest(err.body_text())
    }
}
