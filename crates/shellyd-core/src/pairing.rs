use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::discovery::PairingDisplay;

/// A single in-flight pairing request (spec.md 3). At most one is active
/// process-wide.
#[derive(Debug, Clone)]
pub struct PairingAttempt {
    pub code: String,
    pub expires_at: OffsetDateTime,
    pub proposed_key_algorithm_tag: String,
    pub proposed_key_bytes: Vec<u8>,
    pub proposed_label: String,
}

impl PairingAttempt {
    fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }
}

/// Generates, validates, and expires pairing codes; drives the external
/// display helper (spec.md 4.3).
pub struct PairingController {
    attempt: Mutex<Option<PairingAttempt>>,
    display: Arc<dyn PairingDisplay>,
    sidecar_path: Option<PathBuf>,
}

const PAIRING_WINDOW_MINUTES: i64 = 10;

impl PairingController {
    pub fn new(display: Arc<dyn PairingDisplay>, sidecar_path: Option<PathBuf>) -> Self {
        Self {
            attempt: Mutex::new(None),
            display,
            sidecar_path,
        }
    }

    /// Draws a uniform 6-digit code, replaces any prior attempt, and shows
    /// it via the display helper.
    pub async fn generate(
        &self,
        proposed_key_algorithm_tag: String,
        proposed_key_bytes: Vec<u8>,
        proposed_label: String,
    ) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..=999_999u32));
        let attempt = PairingAttempt {
            code: code.clone(),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(PAIRING_WINDOW_MINUTES),
            proposed_key_algorithm_tag,
            proposed_key_bytes,
            proposed_label: proposed_label.clone(),
        };

        *self.attempt.lock().await = Some(attempt);

        if let Some(path) = &self.sidecar_path {
            let _ = fs::write(path, &code);
        }

        self.display.show(&code, &proposed_label);
        code
    }

    /// Consumes the active attempt (success or failure) and returns it iff
    /// it matched and had not expired.
    pub async fn verify(&self, code: &str) -> Option<PairingAttempt> {
        let attempt = self.attempt.lock().await.take()?;
        if attempt.is_expired() || attempt.code != code {
            None
        } else {
            Some(attempt)
        }
    }

    pub async fn is_active(&self) -> bool {
        match &*self.attempt.lock().await {
            Some(attempt) => !attempt.is_expired(),
            None => false,
        }
    }

    pub fn dismiss(&self) {
        self.display.dismiss();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::LoggingPairingDisplay;

    fn controller() -> PairingController {
        PairingController::new(Arc::new(LoggingPairingDisplay), None)
    }

    #[tokio::test]
    async fn verify_succeeds_for_matching_code() {
        let controller = controller();
        let code = controller
            .generate("ssh-ed25519".into(), vec![1u8; 32], "Phone A".into())
            .await;
        let attempt = controller.verify(&code).await;
        assert!(attempt.is_some());
        assert_eq!(attempt.unwrap().proposed_label, "Phone A");
    }

    #[tokio::test]
    async fn wrong_code_consumes_the_attempt() {
        let controller = controller();
        let code = controller
            .generate("ssh-ed25519".into(), vec![1u8; 32], "Phone A".into())
            .await;
        assert!(controller.verify("000000").await.is_none() || code == "000000");
        assert!(controller.verify(&code).await.is_none());
    }

    #[tokio::test]
    async fn generate_invalidates_any_prior_attempt() {
        let controller = controller();
        let first = controller
            .generate("ssh-ed25519".into(), vec![1u8; 32], "Phone A".into())
            .await;
        let _second = controller
            .generate("ssh-ed25519".into(), vec![2u8; 32], "Phone B".into())
            .await;
        assert!(controller.verify(&first).await.is_none());
    }

    #[tokio::test]
    async fn is_active_reflects_presence_of_an_attempt() {
        let controller = controller();
        assert!(!controller.is_active().await);
        controller
            .generate("ssh-ed25519".into(), vec![1u8; 32], "Phone A".into())
            .await;
        assert!(controller.is_active().await);
    }
}
