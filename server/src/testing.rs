//! Toolchain falso para tests: imita lo que deja `cordova` en disco sin
//! correr nada de verdad.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::runner::{ExecError, ProcessOutput, ProcessRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Todo sale bien y el .apk queda en la ruta actual.
    Succeed,
    /// El .apk queda en la ruta de versiones viejas.
    LegacyArtifact,
    /// `build` termina bien pero no deja .apk.
    NoArtifact,
    /// `build` falla con exit code 1.
    BuildFails,
    /// El binario no está en el PATH (falla el spawn).
    BinaryMissing,
    /// Un shell responde "command not found" (exit 127).
    CommandNotFound,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

pub struct FakeToolchain {
    behavior: FakeBehavior,
    calls: Mutex<Vec<Call>>,
    /// Si está, `build` espera un permiso antes de terminar.
    gate: Option<Arc<Semaphore>>,
}

impl FakeToolchain {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// `build` queda bloqueado hasta que se agregue un permiso al semáforo.
    pub fn gated(behavior: FakeBehavior, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(behavior)
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn ok() -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

fn write_apk(path: &Path, content: &str) -> io::Result<()> {
    std::fs::create_dir_all(path.parent().unwrap())?;
    std::fs::write(path, content)
}

#[async_trait]
impl ProcessRunner for FakeToolchain {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<ProcessOutput, ExecError> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        });

        match self.behavior {
            FakeBehavior::BinaryMissing => {
                return Err(ExecError::Spawn {
                    program: program.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
                })
            }
            FakeBehavior::CommandNotFound => {
                return Ok(ProcessOutput {
                    exit_code: Some(127),
                    stdout: String::new(),
                    stderr: format!("sh: 1: {program}: command not found"),
                })
            }
            _ => {}
        }

        let io_err = |source| ExecError::Io {
            program: program.to_string(),
            source,
        };

        match args.first().map(String::as_str) {
            Some("create") => {
                let www = PathBuf::from(&args[1]).join("www");
                std::fs::create_dir_all(&www).map_err(io_err)?;
                std::fs::write(www.join("index.html"), "<html>cordova</html>").map_err(io_err)?;
                std::fs::write(www.join("cordova-default.js"), "// default").map_err(io_err)?;
            }
            Some("build") => {
                if let Some(gate) = &self.gate {
                    let permit = gate.acquire().await.expect("gate cerrado");
                    permit.forget();
                }

                let platform = args.get(1).cloned().unwrap_or_default();
                let base = cwd.join("platforms").join(&platform);
                match self.behavior {
                    FakeBehavior::Succeed => {
                        write_apk(&base.join("app/build/outputs/apk/debug/app-debug.apk"), "APK")
                            .map_err(io_err)?
                    }
                    FakeBehavior::LegacyArtifact => {
                        write_apk(&base.join("build/outputs/apk/debug/app-debug.apk"), "OLD APK")
                            .map_err(io_err)?
                    }
                    FakeBehavior::BuildFails => {
                        return Ok(ProcessOutput {
                            exit_code: Some(1),
                            stdout: "BUILD FAILED".into(),
                            stderr: "gradle exploded".into(),
                        })
                    }
                    _ => {}
                }
            }
            _ => {}
        }

        Ok(Self::ok())
    }
}
