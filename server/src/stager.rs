use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::StagingError;

pub const WEB_ROOT_DIR: &str = "www";
pub const ICON_FILE: &str = "icon.png";
pub const ICON_RES_DIR: &str = "res/icon/android";

/// Lo que el stager necesita de un job.
#[derive(Debug, Clone)]
pub struct StageRequest<'a> {
    pub job_id: &'a str,
    pub input_files: &'a [PathBuf],
    pub icon_file: Option<&'a Path>,
    pub build_dir: &'a Path,
}

/// Layout que queda en `buildDir` después de acomodar los assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedLayout {
    pub web_root: PathBuf,
    pub icon: Option<PathBuf>,
}

/// Acomoda los archivos subidos en la forma que espera el toolchain:
///
/// ```text
/// buildDir/
///   www/            <- todos los inputFiles, aplanados por nombre base
///   icon.png        <- si vino icono
///   res/icon/android/
/// ```
#[derive(Debug, Clone, Default)]
pub struct AssetStager;

impl AssetStager {
    pub fn new() -> Self {
        Self
    }

    pub async fn stage(&self, req: &StageRequest<'_>) -> Result<StagedLayout, StagingError> {
        let web_root = req.build_dir.join(WEB_ROOT_DIR);
        fs::create_dir_all(&web_root)
            .await
            .map_err(|e| StagingError::new("creating", &web_root, e))?;

        // layout plano: sólo importa el nombre base, las subcarpetas se pierden
        for src in req.input_files {
            let name = src.file_name().ok_or_else(|| {
                StagingError::new(
                    "reading",
                    src,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path without file name"),
                )
            })?;
            let dst = web_root.join(name);
            fs::copy(src, &dst)
                .await
                .map_err(|e| StagingError::new("copying", src, e))?;
            debug!("job {}: {} -> {}", req.job_id, src.display(), dst.display());
        }

        let icon = match req.icon_file {
            Some(src) => {
                let res_dir = req.build_dir.join(ICON_RES_DIR);
                fs::create_dir_all(&res_dir)
                    .await
                    .map_err(|e| StagingError::new("creating", &res_dir, e))?;

                let dst = req.build_dir.join(ICON_FILE);
                fs::copy(src, &dst)
                    .await
                    .map_err(|e| StagingError::new("copying", src, e))?;
                Some(dst)
            }
            None => None,
        };

        info!(
            "job {}: {} archivos preparados en {}",
            req.job_id,
            req.input_files.len(),
            web_root.display()
        );

        Ok(StagedLayout { web_root, icon })
    }
}
