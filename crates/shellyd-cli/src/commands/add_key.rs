use clap::Parser;
use shellyd_core::{KeyStore, Paths};

use crate::error::CliError;

#[derive(Debug, Parser)]
pub struct AddKeyArgs {
    /// `<algorithm> <base64>` (algorithm defaults to `ssh-ed25519` when a
    /// bare base64 blob is given).
    pub blob: String,

    /// Advisory label stored alongside the key.
    #[arg(long)]
    pub name: Option<String>,
}

pub async fn run(args: AddKeyArgs) -> Result<(), CliError> {
    let (algorithm_tag, base64_blob) = split_blob(&args.blob)?;

    let paths = Paths::resolve()?;
    paths.ensure_root()?;
    let keystore = KeyStore::new(paths.authorized_keys());
    keystore.ensure_exists()?;

    let added = keystore.add_from_wire(algorithm_tag, base64_blob, args.name.unwrap_or_default())?;

    println!("added key {} ({})", added.fingerprint, added.algorithm.as_str());
    Ok(())
}

fn split_blob(blob: &str) -> Result<(&str, &str), CliError> {
    let mut parts = blob.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(algorithm), Some(key)) => Ok((algorithm, key)),
        (Some(key), None) if !key.is_empty() => Ok(("ssh-ed25519", key)),
        _ => Err(CliError::InvalidKeyBlob(
            "expected `<algorithm> <base64>` or a bare base64 blob".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_blob_defaults_to_ed25519() {
        let (algorithm, key) = split_blob("AAAAC3NzaC1lZDI1NTE5AAAA").unwrap();
        assert_eq!(algorithm, "ssh-ed25519");
        assert_eq!(key, "AAAAC3NzaC1lZDI1NTE5AAAA");
    }

    #[test]
    fn algorithm_and_key_pair_is_split_on_whitespace() {
        let (algorithm, key) = split_blob("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA").unwrap();
        assert_eq!(algorithm, "ssh-ed25519");
        assert_eq!(key, "AAAAC3NzaC1lZDI1NTE5AAAA");
    }

    #[test]
    fn empty_blob_is_rejected() {
        assert!(matches!(split_blob(""), Err(CliError::InvalidKeyBlob(_))));
        assert!(matches!(split_blob("   "), Err(CliError::InvalidKeyBlob(_))));
    }
}
