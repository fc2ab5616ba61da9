use serde::{Deserialize, Serialize};

/// One entry of the security profile, keyed by the wire name the mobile
/// client sends in `settingsUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKey {
    TlsEnabled,
    CertificatePinningEnabled,
    SessionTimeoutEnabled,
    SessionTimeoutSeconds,
    AuditLoggingEnabled,
    AuditLogRetentionDays,
    MaxConnections,
    PushNotificationsEnabled,
    EnableSudoInterception,
}

impl SettingKey {
    /// Settings that change the transport surface and therefore require
    /// the client to reconnect after the update is applied (spec.md 3, 6).
    pub fn requires_reconnect(self) -> bool {
        matches!(
            self,
            SettingKey::TlsEnabled | SettingKey::CertificatePinningEnabled
        )
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            SettingKey::TlsEnabled => "tlsEnabled",
            SettingKey::CertificatePinningEnabled => "certificatePinningEnabled",
            SettingKey::SessionTimeoutEnabled => "sessionTimeoutEnabled",
            SettingKey::SessionTimeoutSeconds => "sessionTimeoutSeconds",
            SettingKey::AuditLoggingEnabled => "auditLoggingEnabled",
            SettingKey::AuditLogRetentionDays => "auditLogRetentionDays",
            SettingKey::MaxConnections => "maxConnections",
            SettingKey::PushNotificationsEnabled => "pushNotificationsEnabled",
            SettingKey::EnableSudoInterception => "enableSudoInterception",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "tlsEnabled" => SettingKey::TlsEnabled,
            "certificatePinningEnabled" => SettingKey::CertificatePinningEnabled,
            "sessionTimeoutEnabled" => SettingKey::SessionTimeoutEnabled,
            "sessionTimeoutSeconds" => SettingKey::SessionTimeoutSeconds,
            "auditLoggingEnabled" => SettingKey::AuditLoggingEnabled,
            "auditLogRetentionDays" => SettingKey::AuditLogRetentionDays,
            "maxConnections" => SettingKey::MaxConnections,
            "pushNotificationsEnabled" => SettingKey::PushNotificationsEnabled,
            "enableSudoInterception" => SettingKey::EnableSudoInterception,
            _ => return None,
        })
    }
}

/// Tagged union over the settings value space (spec.md 9: "tagged variants
/// over inheritance"). `#[serde(untagged)]` lets a raw JSON bool/number/
/// string round-trip without an explicit discriminant, matching how the
/// wire client sends `{"setting": "tlsEnabled", "value": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingsValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl SettingsValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingsValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingsValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_value_round_trips() {
        for value in [
            SettingsValue::Bool(true),
            SettingsValue::Int(42),
            SettingsValue::Str("x".into()),
        ] {
            let json = serde_json::to_string(&value).unwrap();
            let back: SettingsValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn wire_name_round_trips_for_every_key() {
        for key in [
            SettingKey::TlsEnabled,
            SettingKey::CertificatePinningEnabled,
            SettingKey::SessionTimeoutEnabled,
            SettingKey::SessionTimeoutSeconds,
            SettingKey::AuditLoggingEnabled,
            SettingKey::AuditLogRetentionDays,
            SettingKey::MaxConnections,
            SettingKey::PushNotificationsEnabled,
            SettingKey::EnableSudoInterception,
        ] {
            assert_eq!(SettingKey::from_wire_name(key.wire_name()), Some(key));
        }
    }

    #[test]
    fn transport_settings_require_reconnect() {
        assert!(SettingKey::TlsEnabled.requires_reconnect());
        assert!(SettingKey::CertificatePinningEnabled.requires_reconnect());
        assert!(!SettingKey::AuditLoggingEnabled.requires_reconnect());
    }
}
