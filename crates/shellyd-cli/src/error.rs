use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced at the CLI boundary; `main` maps these to exit codes
/// 1 (general error) or 2 (invalid arguments) per spec.md 6.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shellyd_core::ShellydError),
    #[error(transparent)]
    Listener(#[from] shellyd_listener::ListenerError),
    #[error("no running daemon found (missing or stale {0})")]
    NotRunning(PathBuf),
    #[error("a daemon is already running with pid {0}")]
    AlreadyRunning(u32),
    #[error("pid file `{path}` could not be accessed: {source}")]
    PidFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pid file `{path}` does not contain a valid process id")]
    PidFileCorrupt { path: PathBuf },
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },
    #[error("invalid key blob: {0}")]
    InvalidKeyBlob(String),
}

impl CliError {
    /// Maps this error to the process exit code it should produce
    /// (spec.md 6: 0 success, 1 general error, 2 invalid arguments).
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidKeyBlob(_) => 2,
            _ => 1,
        }
    }
}
