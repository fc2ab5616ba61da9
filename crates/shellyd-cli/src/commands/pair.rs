use std::sync::Arc;

use shellyd_core::{LoggingPairingDisplay, PairingController, Paths};

use crate::error::CliError;

/// Arms the pairing controller standalone, without a listener attached
/// (spec.md 4.7). The code is written to the `pairing_code` sidecar so an
/// operator can read it out of band; the next `pairRequest`/`pairVerify`
/// exchange against a running daemon consumes it.
pub async fn run() -> Result<(), CliError> {
    let paths = Paths::resolve()?;
    paths.ensure_root()?;

    let controller = PairingController::new(Arc::new(LoggingPairingDisplay), Some(paths.pairing_code()));
    let code = controller
        .generate(
            "ssh-ed25519".to_string(),
            Vec::new(),
            "cli-pair".to_string(),
        )
        .await;

    println!("pairing code: {code}");
    println!("valid for 10 minutes; run `shellyd add-key` once the device reports its key");
    Ok(())
}
