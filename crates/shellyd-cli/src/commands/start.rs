use std::sync::Arc;

use clap::Parser;
use shellyd_core::{
    AuditSink, ConfigStore, ConnectionHandles, KeyStore, LoggingDiscoveryAdvertiser,
    LoggingPairingDisplay, PairingController, Paths, ServiceRecord, TrustMaterial,
};
use shellyd_core::DiscoveryAdvertiser as _;
use shellyd_listener::{build_server_config, serve, EndpointConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::CliError;
use crate::pidfile;

#[derive(Debug, Parser)]
pub struct StartArgs {
    /// Overrides the configured host.
    #[arg(long)]
    pub host: Option<String>,
    /// Overrides the configured plain port; the TLS port is this value + 1.
    #[arg(long)]
    pub port: Option<u16>,
    /// Stay attached to the controlling terminal instead of detaching.
    #[arg(long)]
    pub foreground: bool,
    /// Raise log verbosity to debug.
    #[arg(long)]
    pub verbose: bool,
    /// Force pairing mode on, even if keys are already authorized.
    #[arg(long)]
    pub pairing: bool,
}

pub async fn run(args: StartArgs) -> Result<(), CliError> {
    init_tracing(args.verbose);

    if !args.foreground {
        info!("no self-daemonizing fork is implemented; run under a supervisor (systemd, launchd) to background this process");
    }

    let paths = Paths::resolve()?;
    paths.ensure_root()?;

    if let Ok(existing) = pidfile::read_running(&paths.pid_file()) {
        return Err(CliError::AlreadyRunning(existing as u32));
    }

    let keystore = Arc::new(KeyStore::new(paths.authorized_keys()));
    keystore.ensure_exists()?;

    let config_store = ConfigStore::new(paths.config());
    let mut config = config_store.load_or_default()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config_store.save(&config)?;

    let needs_pairing = args.pairing || keystore.list()?.is_empty();

    let audit = Arc::new(AuditSink::start(paths.audit_log(), config.audit_log_retention_days));
    let pairing = Arc::new(PairingController::new(
        Arc::new(LoggingPairingDisplay),
        Some(paths.pairing_code()),
    ));

    if needs_pairing {
        info!("no authorized keys on file; pairing mode is active on connect");
    }

    // Trust material is generated/loaded once at startup regardless of the
    // transport-security toggle (spec.md 4.6 binds the secured endpoint
    // "when trust material is available", not only when `tlsEnabled` is
    // set); the toggle instead governs what `settingsSync` advertises.
    let tls_material = if config.tls_enabled {
        match TrustMaterial::ensure(&paths.certificate(), &paths.private_key()) {
            Ok(material) => Some(material),
            Err(err) => {
                warn!("TLS material unavailable, serving plain endpoint only: {err}");
                None
            }
        }
    } else {
        None
    };

    let tls_server_config = tls_material
        .as_ref()
        .map(build_server_config)
        .transpose()?;

    let trust = Arc::new(tls_material.unwrap_or_else(|| TrustMaterial {
        certificate_der: Vec::new(),
        private_key_der: Vec::new(),
        fingerprint: String::new(),
    }));

    let handles = Arc::new(ConnectionHandles {
        keystore,
        pairing,
        audit,
        trust,
        config: Arc::new(Mutex::new(config_store)),
        shell_path: config.shell.clone(),
        host_label: "shellyd".to_string(),
    });

    let advertiser = LoggingDiscoveryAdvertiser;
    advertiser.advertise(&ServiceRecord {
        service_type: "_shelly._tcp.".to_string(),
        port: config.port,
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
    });

    pidfile::write(&paths.pid_file())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let plain = EndpointConfig {
        host: config.host.clone(),
        port: config.port,
    };
    let tls_endpoint = tls_server_config.map(|cfg| {
        (
            EndpointConfig {
                host: config.host.clone(),
                port: config.port + 1,
            },
            cfg,
        )
    });

    let result = serve(plain, tls_endpoint, handles, config.max_connections as usize, shutdown_rx).await;

    advertiser.withdraw();
    pidfile::remove(&paths.pid_file());

    result.map_err(CliError::from)
}

async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("failed to install SIGINT handler: {err}");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("failed to install SIGTERM handler: {err}");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(true);
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .try_init();
}
