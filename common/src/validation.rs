use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::job::AppConfig;

/// Extensiones que aceptamos en una subida (assets web).
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "html", "css", "js", "json", "png", "jpg", "jpeg", "svg", "gif", "ico", "woff", "woff2",
    "ttf", "otf", "eot",
];

pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No files uploaded")]
    NoFiles,

    #[error("App name and package name are required")]
    MissingConfig,

    #[error("Invalid config JSON: {0}")]
    MalformedConfig(String),

    #[error("Invalid package name format. Use reverse domain notation (e.g., com.example.app)")]
    InvalidPackageName,

    #[error("index.html is required")]
    MissingIndex,

    #[error("File type .{0} not allowed")]
    ExtensionNotAllowed(String),

    #[error("Too many files (max {0})")]
    TooManyFiles(usize),

    #[error("Only one icon file is allowed")]
    TooManyIcons,

    #[error("Duplicate file name: {0}")]
    DuplicateFile(String),
}

fn package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").expect("regex de package name")
    })
}

/// Notación de dominio inverso: `com.example.app`.
pub fn is_valid_package_name(name: &str) -> bool {
    package_regex().is_match(name)
}

/// Valida la config de la app (campos presentes + formato del package).
pub fn validate_config(config: &AppConfig) -> Result<(), ValidationError> {
    if config.app_name.trim().is_empty() || config.package_name.trim().is_empty() {
        return Err(ValidationError::MissingConfig);
    }
    if !is_valid_package_name(&config.package_name) {
        return Err(ValidationError::InvalidPackageName);
    }
    Ok(())
}

/// Parsea el campo `config` tal cual llega en el multipart.
pub fn parse_config(raw: &str) -> Result<AppConfig, ValidationError> {
    serde_json::from_str(raw).map_err(|e| ValidationError::MalformedConfig(e.to_string()))
}

/// Nombre base del archivo (sin directorios), si lo tiene.
pub fn base_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Exactamente una entrada cuyo nombre base sea `index.html` (sin distinguir
/// mayúsculas).
pub fn has_single_index(files: &[impl AsRef<Path>]) -> bool {
    files
        .iter()
        .filter(|f| {
            base_name(f.as_ref())
                .map(|n| n.eq_ignore_ascii_case(INDEX_FILE))
                .unwrap_or(false)
        })
        .count()
        == 1
}

/// Primer nombre base repetido (sin distinguir mayúsculas). Los archivos
/// se aplanan en el web root, así que dos con el mismo nombre se pisan.
pub fn find_duplicate(files: &[impl AsRef<Path>]) -> Option<String> {
    let mut seen = HashSet::new();
    files
        .iter()
        .filter_map(|f| base_name(f.as_ref()))
        .find(|name| !seen.insert(name.to_ascii_lowercase()))
        .map(str::to_string)
}

/// Verifica que la extensión (en minúscula) esté en la lista permitida.
pub fn check_extension(file_name: &str) -> Result<(), ValidationError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::ExtensionNotAllowed(ext))
    }
}

/// El toolchain sólo acepta letras, dígitos y espacios en el nombre.
pub fn sanitize_app_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}
