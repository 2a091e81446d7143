use std::{env, path::PathBuf, time::Duration};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_FILE_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 100;

/// Configuración del servidor, leída una sola vez de variables de entorno.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Raíz de datos: adentro van `uploads/`, `builds/` y `temp/`.
    pub data_dir: PathBuf,
    pub environment: String,
    /// Cuánto esperar tras un build exitoso para borrar `uploadDir`.
    pub cleanup_delay: Duration,
    /// Vida de un registro terminado. `None` = no expira nunca.
    pub record_ttl: Option<Duration>,
    pub toolchain: ToolchainConfig,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Binario del CLI de empaquetado (ej: "cordova").
    pub program: String,
    /// Plataforma destino (ej: "android").
    pub platform: String,
    /// Límite por comando externo. `None` = sin límite.
    pub timeout: Option<Duration>,
    /// Plantilla de branding alternativa a la embebida.
    pub branding_template: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: "cordova".to_string(),
            platform: "android".to_string(),
            timeout: None,
            branding_template: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let toolchain = ToolchainConfig {
            program: env::var("CORDOVA_BIN").unwrap_or_else(|_| "cordova".to_string()),
            platform: env::var("TARGET_PLATFORM").unwrap_or_else(|_| "android".to_string()),
            timeout: env_secs("BUILD_TIMEOUT_SECS"),
            branding_template: env::var("BRANDING_TEMPLATE").ok().map(PathBuf::from),
        };

        Self {
            port: env_parse("PORT").unwrap_or(DEFAULT_PORT),
            data_dir,
            environment: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            cleanup_delay: env_parse("CLEANUP_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CLEANUP_DELAY),
            record_ttl: match env_parse::<u64>("RECORD_TTL_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => Some(DEFAULT_RECORD_TTL),
            },
            toolchain,
            max_file_bytes: env_parse("MAX_FILE_BYTES").unwrap_or(DEFAULT_MAX_FILE_BYTES),
            max_files: env_parse("MAX_FILES").unwrap_or(DEFAULT_MAX_FILES),
        }
    }

    /// Config con valores por defecto apuntando a `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: data_dir.into(),
            environment: "development".to_string(),
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            record_ttl: Some(DEFAULT_RECORD_TTL),
            toolchain: ToolchainConfig::default(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.data_dir.join("builds")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    /// Tamaño máximo del cuerpo completo de `POST /api/build`.
    pub fn max_request_bytes(&self) -> usize {
        // archivos + icono + margen para config y cabeceras multipart
        self.max_file_bytes
            .saturating_mul(self.max_files + 1)
            .saturating_add(1024 * 1024)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

/// Segundos desde env; 0 o ausente = sin límite.
fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
