use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use common::{validation::sanitize_app_name, AppConfig};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::BuildError;
use crate::runner::{ProcessOutput, ProcessRunner};
use crate::stager::{StagedLayout, WEB_ROOT_DIR};

pub const PROJECT_DIR: &str = "cordova_project";
pub const DEFAULT_BRANDING: &str = include_str!("../templates/branding.html");

const BODY_CLOSE: &str = "</body>";
const NOT_FOUND_MARKER: &str = "command not found";
/// Cuánto del log del toolchain guardamos en el mensaje de error.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Lo que el builder necesita de un job.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub job_id: &'a str,
    pub config: &'a AppConfig,
    pub build_dir: &'a Path,
    /// Lo que dejó el stager: de acá salen el web root y el icono.
    pub staged: &'a StagedLayout,
}

/// Maneja el CLI de empaquetado (cordova) como caja negra:
/// create → platform add → branding → www → build → buscar el .apk.
pub struct PackageBuilder {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    platform: String,
    branding: String,
}

impl PackageBuilder {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        program: impl Into<String>,
        platform: impl Into<String>,
        branding: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            platform: platform.into(),
            branding: branding.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Corre el pipeline completo y devuelve la ruta del artefacto ya
    /// publicado en `buildDir/<nombre>`.
    pub async fn build(&self, req: &BuildRequest<'_>) -> Result<PathBuf, BuildError> {
        info!("job {}: iniciando build de {}", req.job_id, self.platform);

        let app_name = sanitize_app_name(&req.config.app_name);
        let project_dir = req.build_dir.join(PROJECT_DIR);
        let staged_www = &req.staged.web_root;

        info!("job {}: creando proyecto ({})", req.job_id, app_name);
        self.exec(
            &[
                "create".to_string(),
                project_dir.to_string_lossy().into_owned(),
                req.config.package_name.clone(),
                app_name,
            ],
            req.build_dir,
        )
        .await?;

        info!("job {}: agregando plataforma {}", req.job_id, self.platform);
        self.exec(
            &["platform".to_string(), "add".to_string(), self.platform.clone()],
            &project_dir,
        )
        .await?;

        // el branding es cosmético: si falla sólo queda en el log
        match inject_branding(&staged_www.join("index.html"), &self.branding).await {
            Ok(true) => debug!("job {}: branding inyectado", req.job_id),
            Ok(false) => debug!("job {}: sin index.html para branding", req.job_id),
            Err(e) => warn!("job {}: no se pudo inyectar branding: {}", req.job_id, e),
        }

        info!("job {}: copiando assets web", req.job_id);
        replace_web_root(staged_www, &project_dir.join(WEB_ROOT_DIR)).await?;

        if let Some(icon) = &req.staged.icon {
            // TODO: generar los tamaños de icono en res/icon/<platform> (cordova-res)
            info!(
                "job {}: generación de iconos pendiente ({}), se usa el icono por defecto",
                req.job_id,
                icon.display()
            );
        }

        info!("job {}: compilando", req.job_id);
        self.exec(
            &["build".to_string(), self.platform.clone(), "--debug".to_string()],
            &project_dir,
        )
        .await?;

        let artifact = locate_artifact(&project_dir, &self.platform).await?;
        let published = publish_artifact(&artifact, req.build_dir).await?;
        info!("job {}: artefacto listo en {}", req.job_id, published.display());
        Ok(published)
    }

    async fn exec(&self, args: &[String], cwd: &Path) -> Result<ProcessOutput, BuildError> {
        let output = self
            .runner
            .run(&self.program, args, cwd)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BuildError::ToolchainMissing {
                        program: self.program.clone(),
                    }
                } else {
                    BuildError::Exec(e)
                }
            })?;

        if output.success() {
            return Ok(output);
        }

        // con shell de por medio el "no existe" llega como texto en stderr
        if output.stderr.contains(NOT_FOUND_MARKER) {
            return Err(BuildError::ToolchainMissing {
                program: self.program.clone(),
            });
        }

        Err(BuildError::CommandFailed {
            step: format!("{} {}", self.program, args.join(" ")),
            code: output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            detail: tail_chars(&output.diagnostic(), MAX_DIAGNOSTIC_CHARS),
        })
    }
}

/// Carga la plantilla de branding; si no hay ruta o no se puede leer,
/// usa la embebida.
pub async fn load_branding(path: Option<&Path>) -> String {
    match path {
        Some(p) => match fs::read_to_string(p).await {
            Ok(content) => content,
            Err(e) => {
                warn!("no se pudo leer branding {}: {}, usando el embebido", p.display(), e);
                DEFAULT_BRANDING.to_string()
            }
        },
        None => DEFAULT_BRANDING.to_string(),
    }
}

/// Inserta `fragment` justo antes del primer `</body>` de `index`, o lo
/// agrega al final si no hay. Devuelve `false` si el archivo no existe.
pub async fn inject_branding(index: &Path, fragment: &str) -> io::Result<bool> {
    if !fs::try_exists(index).await? {
        return Ok(false);
    }

    let content = fs::read_to_string(index).await?;
    let updated = splice_before_body_close(&content, fragment);
    fs::write(index, updated).await?;
    Ok(true)
}

fn splice_before_body_close(content: &str, fragment: &str) -> String {
    // to_ascii_lowercase no cambia offsets en bytes
    match content.to_ascii_lowercase().find(BODY_CLOSE) {
        Some(pos) => {
            let mut out = String::with_capacity(content.len() + fragment.len() + 1);
            out.push_str(&content[..pos]);
            out.push_str(fragment);
            out.push('\n');
            out.push_str(&content[pos..]);
            out
        }
        None => format!("{content}{fragment}"),
    }
}

/// Vacía `dst` y copia `src` entero adentro (sin merge).
pub async fn replace_web_root(src: &Path, dst: &Path) -> Result<(), BuildError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();

    tokio::task::spawn_blocking(move || copy_tree_fresh(&src, &dst))
        .await
        .map_err(|e| BuildError::io("copying web root", "<join>", io::Error::other(e)))?
}

fn copy_tree_fresh(src: &Path, dst: &Path) -> Result<(), BuildError> {
    if dst.exists() {
        std::fs::remove_dir_all(dst).map_err(|e| BuildError::io("emptying", dst, e))?;
    }
    std::fs::create_dir_all(dst).map_err(|e| BuildError::io("creating", dst, e))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            BuildError::io("walking", path, io::Error::other(e))
        })?;

        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BuildError::io("walking", entry.path(), io::Error::other(e)))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| BuildError::io("creating", &target, e))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| BuildError::io("copying", entry.path(), e))?;
        }
    }
    Ok(())
}

/// Rutas posibles del .apk según la versión del toolchain: primero la
/// actual, después la legacy.
pub fn artifact_candidates(project_dir: &Path, platform: &str) -> [PathBuf; 2] {
    let platform_dir = project_dir.join("platforms").join(platform);
    [
        platform_dir.join("app/build/outputs/apk/debug/app-debug.apk"),
        platform_dir.join("build/outputs/apk/debug/app-debug.apk"),
    ]
}

pub async fn locate_artifact(project_dir: &Path, platform: &str) -> Result<PathBuf, BuildError> {
    let candidates = artifact_candidates(project_dir, platform);
    for candidate in &candidates {
        if fs::try_exists(candidate).await.unwrap_or(false) {
            return Ok(candidate.clone());
        }
    }
    Err(BuildError::ArtifactNotFound {
        searched: candidates.to_vec(),
    })
}

/// Copia el artefacto a `buildDir/<nombre>`, que es lo que sirve
/// `/downloads/:jobId/:filename`.
async fn publish_artifact(artifact: &Path, build_dir: &Path) -> Result<PathBuf, BuildError> {
    let name = artifact.file_name().ok_or_else(|| {
        BuildError::io(
            "publishing",
            artifact,
            io::Error::new(io::ErrorKind::InvalidInput, "artifact without file name"),
        )
    })?;
    let target = build_dir.join(name);
    fs::copy(artifact, &target)
        .await
        .map_err(|e| BuildError::io("publishing", artifact, e))?;
    Ok(target)
}

fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - max).collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBehavior, FakeToolchain};

    fn config(app: &str) -> AppConfig {
        AppConfig {
            app_name: app.to_string(),
            package_name: "com.example.app".to_string(),
        }
    }

    fn staged(build_dir: &Path, index: &str) -> StagedLayout {
        let www = build_dir.join(WEB_ROOT_DIR);
        std::fs::create_dir_all(&www).unwrap();
        std::fs::write(www.join("index.html"), index).unwrap();
        std::fs::write(www.join("style.css"), "body{}").unwrap();
        StagedLayout {
            web_root: www,
            icon: None,
        }
    }

    fn builder(fake: Arc<FakeToolchain>) -> PackageBuilder {
        PackageBuilder::new(fake, "cordova", "android", "<p>branding</p>")
    }

    /* =========================
       BRANDING
       ========================= */

    #[test]
    fn branding_antes_de_body() {
        let out = splice_before_body_close("<html><body><h1>x</h1></body></html>", "<b/>");
        assert_eq!(out, "<html><body><h1>x</h1><b/>\n</body></html>");
    }

    #[test]
    fn branding_reconoce_body_en_mayusculas() {
        let out = splice_before_body_close("<BODY>x</BODY>", "<b/>");
        assert_eq!(out, "<BODY>x<b/>\n</BODY>");
    }

    #[test]
    fn branding_sin_body_va_al_final() {
        let out = splice_before_body_close("<h1>hola</h1>", "<b/>");
        assert_eq!(out, "<h1>hola</h1><b/>");
    }

    #[tokio::test]
    async fn branding_sin_index_no_hace_nada() {
        let tmp = tempfile::tempdir().unwrap();
        let injected = inject_branding(&tmp.path().join("index.html"), "<b/>").await.unwrap();
        assert!(!injected);
        assert!(!tmp.path().join("index.html").exists());
    }

    #[tokio::test]
    async fn branding_embebido_si_la_plantilla_no_existe() {
        let tmp = tempfile::tempdir().unwrap();
        let text = load_branding(Some(tmp.path().join("nope.html").as_path())).await;
        assert_eq!(text, DEFAULT_BRANDING);
    }

    /* =========================
       PIPELINE DEL TOOLCHAIN
       ========================= */

    #[tokio::test]
    async fn build_completo_con_nombre_saneado() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("builds/j1");
        let mut layout = staged(&build_dir, "<html><body>hola</body></html>");
        layout.icon = Some(build_dir.join("icon.png"));

        let fake = Arc::new(FakeToolchain::new(FakeBehavior::Succeed));
        let cfg = config("My App!");
        let artifact = builder(fake.clone())
            .build(&BuildRequest {
                job_id: "j1",
                config: &cfg,
                build_dir: &build_dir,
                staged: &layout,
            })
            .await
            .unwrap();

        assert_eq!(artifact, build_dir.join("app-debug.apk"));
        assert!(artifact.is_file());

        let calls = fake.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].args[0], "create");
        assert_eq!(calls[0].args[2], "com.example.app");
        assert_eq!(calls[0].args[3], "My App");
        assert_eq!(calls[1].args, vec!["platform", "add", "android"]);
        assert_eq!(calls[2].args, vec!["build", "android", "--debug"]);
        assert_eq!(calls[2].cwd, build_dir.join(PROJECT_DIR));

        // www del proyecto reemplazado por el staged, con branding
        let project_www = build_dir.join(PROJECT_DIR).join("www");
        assert!(!project_www.join("cordova-default.js").exists());
        assert!(project_www.join("style.css").is_file());
        let index = std::fs::read_to_string(project_www.join("index.html")).unwrap();
        assert!(index.contains("<p>branding</p>\n</body>"));
    }

    #[tokio::test]
    async fn usa_ruta_legacy_si_no_esta_la_actual() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("b");
        let layout = staged(&build_dir, "<html></html>");

        let fake = Arc::new(FakeToolchain::new(FakeBehavior::LegacyArtifact));
        let cfg = config("Legacy");
        let artifact = builder(fake)
            .build(&BuildRequest {
                job_id: "j2",
                config: &cfg,
                build_dir: &build_dir,
                staged: &layout,
            })
            .await
            .unwrap();
        assert!(artifact.is_file());
    }

    #[tokio::test]
    async fn sin_artefacto_es_artifact_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("b");
        let layout = staged(&build_dir, "<html></html>");

        let fake = Arc::new(FakeToolchain::new(FakeBehavior::NoArtifact));
        let cfg = config("X");
        let err = builder(fake)
            .build(&BuildRequest {
                job_id: "j3",
                config: &cfg,
                build_dir: &build_dir,
                staged: &layout,
            })
            .await
            .unwrap_err();

        match err {
            BuildError::ArtifactNotFound { searched } => assert_eq!(searched.len(), 2),
            other => panic!("esperaba ArtifactNotFound, vino {other:?}"),
        }
    }

    #[tokio::test]
    async fn binario_ausente_es_toolchain_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("b");
        let layout = staged(&build_dir, "<html></html>");

        for behavior in [FakeBehavior::BinaryMissing, FakeBehavior::CommandNotFound] {
            let fake = Arc::new(FakeToolchain::new(behavior));
            let cfg = config("X");
            let err = builder(fake)
                .build(&BuildRequest {
                    job_id: "j4",
                    config: &cfg,
                    build_dir: &build_dir,
                    staged: &layout,
                })
                .await
                .unwrap_err();
            assert!(
                matches!(err, BuildError::ToolchainMissing { .. }),
                "{behavior:?} -> {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn fallo_de_compilacion_guarda_el_diagnostico() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("b");
        let layout = staged(&build_dir, "<html></html>");

        let fake = Arc::new(FakeToolchain::new(FakeBehavior::BuildFails));
        let cfg = config("X");
        let err = builder(fake)
            .build(&BuildRequest {
                job_id: "j5",
                config: &cfg,
                build_dir: &build_dir,
                staged: &layout,
            })
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("Build failed"), "{msg}");
        assert!(msg.contains("gradle exploded"), "{msg}");
    }

    #[test]
    fn tail_chars_recorta_desde_el_final() {
        assert_eq!(tail_chars("abcdef", 10), "abcdef");
        assert_eq!(tail_chars("abcdef", 3), "...def");
    }
}
