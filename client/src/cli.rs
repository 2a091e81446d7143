use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    validation, AppConfig, BuildAccepted, CleanupResponse, ErrorBody, JobStatus, JobView,
};
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};

/// - En Docker: BUILDER_URL=http://builder:3000
/// - Local: default http://localhost:3000
fn builder_base_url() -> String {
    env::var("BUILDER_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para mandar sitios web al builder de APKs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sube los archivos del sitio y arranca un build
    Submit {
        /// Archivos del sitio (tiene que haber un index.html)
        #[arg(value_name = "ARCHIVOS", required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        icon: Option<PathBuf>,

        #[arg(long)]
        app_name: String,

        /// Ej: com.example.app
        #[arg(long)]
        package_name: String,

        /// Espera a que termine y muestra el resultado
        #[arg(long)]
        wait: bool,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Espera hasta que el job termine
    Wait {
        #[arg(value_name = "JOB_ID")]
        id: String,

        /// Segundos entre consultas
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Descarga el APK de un job terminado
    Download {
        #[arg(value_name = "JOB_ID")]
        id: String,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Borra los archivos y el registro de un job
    Cleanup {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = builder_base_url();

    match cli.command {
        Commands::Submit {
            files,
            icon,
            app_name,
            package_name,
            wait,
        } => {
            let config = AppConfig {
                app_name,
                package_name,
            };
            check_before_upload(&files, &config)?;

            let form = build_form(&files, icon.as_deref(), &config).await?;
            let url = format!("{}/api/build", base_url);
            let resp = client.post(&url).multipart(form).send().await?;
            let accepted: BuildAccepted = parse_ok(resp).await?;

            println!("Build aceptado:");
            println!("  id: {}", accepted.job_id);
            println!("  estado: {}", accepted.status);

            if wait {
                let job = wait_for(&client, &base_url, &accepted.job_id, Duration::from_secs(2)).await?;
                print_job(&job);
            }
        }

        Commands::Status { id } => {
            let job = fetch_status(&client, &base_url, &id).await?;
            print_job(&job);
        }

        Commands::Wait { id, interval } => {
            let job = wait_for(&client, &base_url, &id, Duration::from_secs(interval.max(1))).await?;
            print_job(&job);
        }

        Commands::Download { id, output } => {
            let job = fetch_status(&client, &base_url, &id).await?;
            let artifact_url = match (job.status, job.artifact_url) {
                (JobStatus::Completed, Some(url)) => url,
                (status, _) => bail!("el job {id} no tiene APK (estado: {status})"),
            };

            let resp = client.get(format!("{}{}", base_url, artifact_url)).send().await?;
            if !resp.status().is_success() {
                bail!("descarga falló (status {})", resp.status());
            }
            let bytes = resp.bytes().await?;

            let target = output.unwrap_or_else(|| default_output(&artifact_url));
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("escribiendo {}", target.display()))?;
            println!("APK guardado en {} ({} bytes)", target.display(), bytes.len());
        }

        Commands::Cleanup { id } => {
            let url = format!("{}/api/cleanup/{}", base_url, id);
            let resp = client.delete(&url).send().await?;
            let done: CleanupResponse = parse_ok(resp).await?;
            println!("{}", done.message);
        }
    }

    Ok(())
}

/// Las mismas reglas que aplica el servidor, para fallar antes de subir nada.
fn check_before_upload(files: &[PathBuf], config: &AppConfig) -> Result<()> {
    validation::validate_config(config)?;
    if let Some(name) = validation::find_duplicate(files) {
        bail!("{}", validation::ValidationError::DuplicateFile(name));
    }
    if !validation::has_single_index(files) {
        bail!("{}", validation::ValidationError::MissingIndex);
    }
    for f in files {
        let name = validation::base_name(f)
            .ok_or_else(|| anyhow!("nombre de archivo inválido: {}", f.display()))?;
        validation::check_extension(name)?;
    }
    Ok(())
}

async fn build_form(files: &[PathBuf], icon: Option<&Path>, config: &AppConfig) -> Result<Form> {
    let mut form = Form::new().text("config", serde_json::to_string(config)?);
    for f in files {
        form = form.part("files", file_part(f).await?);
    }
    if let Some(icon) = icon {
        form = form.part("icon", file_part(icon).await?);
    }
    Ok(form)
}

async fn file_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("leyendo {}", path.display()))?;
    let name = validation::base_name(path).unwrap_or("file").to_string();
    Ok(Part::bytes(bytes).file_name(name))
}

async fn fetch_status(client: &Client, base_url: &str, id: &str) -> Result<JobView> {
    let url = format!("{}/api/status/{}", base_url, id);
    let resp = client.get(&url).send().await?;
    parse_ok(resp).await
}

async fn wait_for(client: &Client, base_url: &str, id: &str, interval: Duration) -> Result<JobView> {
    let mut last: Option<(JobStatus, u8)> = None;
    loop {
        let job = fetch_status(client, base_url, id).await?;
        if last != Some((job.status, job.progress)) {
            println!("  {} ({}%)", job.status, job.progress);
            last = Some((job.status, job.progress));
        }
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Decodifica el cuerpo si el status es 2xx; si no, arma el error con el
/// mensaje del servidor.
async fn parse_ok<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    bail!("el servidor respondió {}: {}", status, message)
}

fn default_output(artifact_url: &str) -> PathBuf {
    let name = artifact_url.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        PathBuf::from("app.apk")
    } else {
        PathBuf::from(name)
    }
}

fn print_job(job: &JobView) {
    println!("Job:");
    println!("  id: {}", job.job_id);
    println!("  estado: {}", job.status);
    println!("  progreso: {}%", job.progress);
    println!("  creado: {}", job.created_at);
    if let Some(ref done) = job.completed_at {
        println!("  terminado: {}", done);
    }
    if let Some(ref url) = job.artifact_url {
        println!("  descarga: {}", url);
    }
    if let Some(ref detail) = job.error_detail {
        println!("  error: {}", detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, pkg: &str) -> AppConfig {
        AppConfig {
            app_name: name.to_string(),
            package_name: pkg.to_string(),
        }
    }

    #[test]
    fn check_before_upload_acepta_sitio_valido() {
        let files = vec![PathBuf::from("site/index.html"), PathBuf::from("site/app.js")];
        assert!(check_before_upload(&files, &config("App", "com.example.app")).is_ok());
    }

    #[test]
    fn check_before_upload_rechaza_lo_que_el_servidor_rechazaria() {
        let sin_index = vec![PathBuf::from("main.html")];
        let err = check_before_upload(&sin_index, &config("App", "com.example.app")).unwrap_err();
        assert_eq!(err.to_string(), "index.html is required");

        let ok = vec![PathBuf::from("index.html")];
        assert!(check_before_upload(&ok, &config("App", "Com.Example")).is_err());

        let repetidos = vec![PathBuf::from("index.html"), PathBuf::from("site/index.html")];
        let err = check_before_upload(&repetidos, &config("App", "com.example.app")).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate file name: index.html");

        let exe = vec![PathBuf::from("index.html"), PathBuf::from("x.exe")];
        let err = check_before_upload(&exe, &config("App", "com.example.app")).unwrap_err();
        assert_eq!(err.to_string(), "File type .exe not allowed");
    }

    #[test]
    fn default_output_usa_el_nombre_del_artefacto() {
        assert_eq!(default_output("/downloads/abc/app-debug.apk"), PathBuf::from("app-debug.apk"));
        assert_eq!(default_output("/downloads/abc/"), PathBuf::from("app.apk"));
    }
}
