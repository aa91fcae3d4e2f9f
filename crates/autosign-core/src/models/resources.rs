//! Developer Portal resources managed by the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DevicePlatform, ProfileType};

// ============================================================================
// Bundle ID
// ============================================================================

/// An App ID registered on the Developer Portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleId {
    pub id: String,
    pub identifier: String,
    pub name: String,
}

/// Capability types the Developer Portal can enable on an App ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityType {
    AccessWifiInformation,
    AppGroups,
    ApplePay,
    AppleIdAuth,
    AssociatedDomains,
    AutofillCredentialProvider,
    Classkit,
    DataProtection,
    GameCenter,
    Healthkit,
    Homekit,
    HotSpot,
    Icloud,
    InAppPurchase,
    InterAppAudio,
    Multipath,
    NetworkExtensions,
    NfcTagReading,
    PersonalVpn,
    PushNotifications,
    Sirikit,
    Wallet,
    WirelessAccessoryConfiguration,
    #[serde(other)]
    Other,
}

/// A capability enabled (or to be enabled) on an App ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub capability_type: CapabilityType,
    pub settings: Vec<CapabilitySetting>,
}

impl Capability {
    pub fn new(capability_type: CapabilityType) -> Self {
        Self {
            capability_type,
            settings: Vec::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, option: &str) -> Self {
        self.settings.push(CapabilitySetting {
            key: key.to_string(),
            options: vec![CapabilityOption {
                key: option.to_string(),
            }],
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySetting {
    pub key: String,
    pub options: Vec<CapabilityOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityOption {
    pub key: String,
}

// ============================================================================
// Provisioning Profile
// ============================================================================

/// Profile state as reported by the Developer Portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileState {
    Active,
    /// The profile's App ID was modified after the profile was generated.
    Invalid,
    #[serde(other)]
    Unknown,
}

/// A provisioning profile on the Developer Portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub profile_type: ProfileType,
    pub state: ProfileState,
    pub expiration_date: DateTime<Utc>,
    /// Signed PKCS#7 profile content.
    pub content: Vec<u8>,
}

// ============================================================================
// Devices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceClass {
    AppleWatch,
    Ipad,
    Iphone,
    Ipod,
    AppleTv,
    Mac,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Enabled,
    Disabled,
}

/// A device registered on the Developer Portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub udid: String,
    pub name: String,
    pub device_class: DeviceClass,
    pub platform: DevicePlatform,
    pub status: DeviceStatus,
}

/// A test device known to the caller that should be registered on the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDevice {
    pub udid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub device_type: String,
}
