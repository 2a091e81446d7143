use std::{
    io,
    path::Path,
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Resultado de un comando externo que llegó a terminar.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` si el proceso murió por señal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout + stderr, recortado, para mensajes de error.
    pub fn diagnostic(&self) -> String {
        let combined = format!("{}\n{}", self.stdout.trim(), self.stderr.trim());
        combined.trim().to_string()
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("error waiting for `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// El binario no existe en el PATH.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Interfaz mínima para correr comandos externos: programa + args + cwd.
/// En tests se reemplaza por un toolchain falso.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<ProcessOutput, ExecError>;
}

/// Implementación real sobre `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner {
    timeout: Option<Duration>,
}

impl TokioProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<ProcessOutput, ExecError> {
        debug!("ejecutando `{} {}` en {}", program, args.join(" "), cwd.display());

        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // si vence el timeout el future se descarta y el hijo muere con él
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ExecError::TimedOut {
                    program: program.to_string(),
                    timeout: limit,
                })?,
            None => wait.await,
        }
        .map_err(|source| ExecError::Io {
            program: program.to_string(),
            source,
        })?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captura_stdout_y_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::default();
        let out = runner
            .run("sh", &["-c".into(), "echo hola; echo mal >&2; exit 3".into()], tmp.path())
            .await
            .unwrap();

        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hola");
        assert_eq!(out.stderr.trim(), "mal");
        assert_eq!(out.diagnostic(), "hola\nmal");
    }

    #[tokio::test]
    async fn binario_inexistente_es_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::default();
        let err = runner
            .run("definitivamente-no-existe-xyz", &[], tmp.path())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn timeout_corta_el_comando() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::new(Some(Duration::from_millis(100)));
        let err = runner
            .run("sleep", &["5".into()], tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }
}
