use shellyd_core::Paths;

use crate::error::CliError;
use crate::pidfile;

pub async fn run() -> Result<(), CliError> {
    let paths = Paths::resolve()?;
    match pidfile::read_running(&paths.pid_file()) {
        Ok(pid) => {
            println!("shellyd is running (pid {pid})");
            Ok(())
        }
        Err(CliError::NotRunning(_)) => {
            println!("shellyd is not running");
            Err(CliError::NotRunning(paths.pid_file()))
        }
        Err(err) => Err(err),
    }
}
