use std::fs;
use std::path::Path;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::CliError;

/// Writes the current process id to `path`, overwriting any stale file
/// (spec.md 4.7: `stop`/`status` key off this file).
pub fn write(path: &Path) -> Result<(), CliError> {
    let pid = std::process::id();
    fs::write(path, pid.to_string()).map_err(|source| CliError::PidFileIo {
        path: path.to_path_buf(),
        source,
    })
}

pub fn remove(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Reads the pid recorded at `path`. Returns `NotRunning` if the file is
/// absent or the recorded process is no longer alive.
pub fn read_running(path: &Path) -> Result<i32, CliError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(CliError::NotRunning(path.to_path_buf()))
        }
        Err(source) => {
            return Err(CliError::PidFileIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let pid: i32 = raw
        .trim()
        .parse()
        .map_err(|_| CliError::PidFileCorrupt { path: path.to_path_buf() })?;

    if is_alive(pid) {
        Ok(pid)
    } else {
        Err(CliError::NotRunning(path.to_path_buf()))
    }
}

pub fn is_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

pub fn send(pid: i32, sig: Signal) -> Result<(), CliError> {
    signal::kill(Pid::from_raw(pid), sig).map_err(|source| CliError::Signal { pid, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_running_recovers_the_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellyd.pid");

        write(&path).unwrap();
        let pid = read_running(&path).unwrap();
        assert_eq!(pid as u32, std::process::id());

        remove(&path);
        assert!(matches!(read_running(&path), Err(CliError::NotRunning(_))));
    }

    #[test]
    fn corrupt_pid_file_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellyd.pid");
        fs::write(&path, b"not-a-pid").unwrap();

        assert!(matches!(
            read_running(&path),
            Err(CliError::PidFileCorrupt { .. })
        ));
    }

    #[test]
    fn stale_pid_is_reported_as_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellyd.pid");
        // PID 1 is reserved for init and is never the process running this
        // test, but a more reliable guarantee of "not alive" is a pid far
        // outside any live range on a standard system: 2^30 is never
        // recycled into use by the kernel's pid allocator in practice.
        fs::write(&path, (1 << 30).to_string()).unwrap();

        assert!(matches!(read_running(&path), Err(CliError::NotRunning(_))));
    }

    #[test]
    fn is_alive_reflects_the_current_process() {
        assert!(is_alive(std::process::id() as i32));
    }
}
