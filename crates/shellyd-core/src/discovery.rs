use tracing::info;

/// The record the daemon asks the discovery advertiser to publish
/// (spec.md 6): `_shelly._tcp.` on the local link, plain port, with
/// `{version, platform}` TXT fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub service_type: String,
    pub port: u16,
    pub version: String,
    pub platform: String,
}

/// Minimal contract for the out-of-scope discovery advertiser (mDNS/Bonjour
/// or equivalent); spec.md 1 names it as an external collaborator.
pub trait DiscoveryAdvertiser: Send + Sync {
    fn advertise(&self, service: &ServiceRecord);
    fn withdraw(&self);
}

/// Minimal contract for the out-of-scope pairing-code display helper.
pub trait PairingDisplay: Send + Sync {
    fn show(&self, code: &str, device_label: &str);
    fn dismiss(&self);
}

/// Logging-only advertiser wired by the shipped binary; real discovery is
/// out of scope (spec.md 1, 6).
pub struct LoggingDiscoveryAdvertiser;

impl DiscoveryAdvertiser for LoggingDiscoveryAdvertiser {
    fn advertise(&self, service: &ServiceRecord) {
        info!(
            service = %service.service_type,
            port = service.port,
            version = %service.version,
            platform = %service.platform,
            "advertising shelly daemon on the local link"
        );
    }

    fn withdraw(&self) {
        info!("withdrawing shelly daemon service advertisement");
    }
}

/// Logging-only pairing display wired by the shipped binary; a real
/// on-device UI is out of scope (spec.md 1, 6).
pub struct LoggingPairingDisplay;

impl PairingDisplay for LoggingPairingDisplay {
    fn show(&self, code: &str, device_label: &str) {
        info!(code, device_label, "pairing code ready for operator review");
    }

    fn dismiss(&self) {
        info!("pairing code dismissed");
    }
}
