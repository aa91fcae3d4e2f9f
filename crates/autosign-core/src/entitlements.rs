//! Entitlement classification.
//!
//! Maps project entitlement keys onto Developer Portal capabilities and
//! decides which entitlements need portal action at all.

use std::collections::BTreeMap;

use crate::error::{AutosignError, Result};
use crate::models::{Capability, CapabilityType};

pub const ICLOUD_SERVICES_KEY: &str = "com.apple.developer.icloud-services";
pub const ICLOUD_CONTAINERS_KEY: &str = "com.apple.developer.icloud-container-identifiers";
pub const DATA_PROTECTION_KEY: &str = "com.apple.developer.default-data-protection";
pub const SIGN_IN_WITH_APPLE_KEY: &str = "com.apple.developer.applesignin";

const ICLOUD_VERSION_SETTING: &str = "ICLOUD_VERSION";
const ICLOUD_VERSION_XCODE_6: &str = "XCODE_6";
const DATA_PROTECTION_SETTING: &str = "DATA_PROTECTION_PERMISSION_LEVEL";
const APPLE_ID_AUTH_SETTING: &str = "APPLE_ID_AUTH_APP_CONSENT";
const APPLE_ID_AUTH_PRIMARY_CONSENT: &str = "PRIMARY_APP_CONSENT";

/// How an entitlement key relates to the Developer Portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementKind {
    /// Backed by an App ID capability.
    Capability(CapabilityType),
    /// Implicit; never needs portal action.
    Ignored,
    /// Only available through manually generated profiles.
    ProfileAttached,
    /// Not known to this classifier.
    Unknown,
}

/// Classifies an entitlement key.
pub fn classify(key: &str) -> EntitlementKind {
    use CapabilityType::*;
    use EntitlementKind::{Ignored, ProfileAttached, Unknown};

    match key {
        "com.apple.security.application-groups" => EntitlementKind::Capability(AppGroups),
        "com.apple.developer.in-app-payments" => EntitlementKind::Capability(ApplePay),
        "com.apple.developer.associated-domains" => EntitlementKind::Capability(AssociatedDomains),
        "com.apple.developer.healthkit" => EntitlementKind::Capability(Healthkit),
        "com.apple.developer.homekit" => EntitlementKind::Capability(Homekit),
        "com.apple.developer.networking.HotspotConfiguration" => EntitlementKind::Capability(HotSpot),
        "com.apple.InAppPurchase" => EntitlementKind::Capability(InAppPurchase),
        "inter-app-audio" => EntitlementKind::Capability(InterAppAudio),
        "com.apple.developer.networking.multipath" => EntitlementKind::Capability(Multipath),
        "com.apple.developer.networking.networkextension" => EntitlementKind::Capability(NetworkExtensions),
        "com.apple.developer.nfc.readersession.formats" => EntitlementKind::Capability(NfcTagReading),
        "com.apple.developer.networking.vpn.api" => EntitlementKind::Capability(PersonalVpn),
        "aps-environment" => EntitlementKind::Capability(PushNotifications),
        "com.apple.developer.siri" => EntitlementKind::Capability(Sirikit),
        "com.apple.developer.pass-type-identifiers" => EntitlementKind::Capability(Wallet),
        "com.apple.external-accessory.wireless-configuration" => {
            EntitlementKind::Capability(WirelessAccessoryConfiguration)
        }
        DATA_PROTECTION_KEY => EntitlementKind::Capability(DataProtection),
        ICLOUD_SERVICES_KEY => EntitlementKind::Capability(Icloud),
        "com.apple.developer.authentication-services.autofill-credential-provider" => {
            EntitlementKind::Capability(AutofillCredentialProvider)
        }
        "com.apple.developer.networking.wifi-info" => EntitlementKind::Capability(AccessWifiInformation),
        "com.apple.developer.ClassKit-environment" => EntitlementKind::Capability(Classkit),
        SIGN_IN_WITH_APPLE_KEY => EntitlementKind::Capability(AppleIdAuth),
        "com.apple.developer.game-center" => EntitlementKind::Capability(GameCenter),

        ICLOUD_CONTAINERS_KEY
        | "com.apple.developer.icloud-container-environment"
        | "com.apple.developer.ubiquity-container-identifiers"
        | "com.apple.developer.ubiquity-kvstore-identifier"
        | "com.apple.developer.icloud-container-development-container-identifiers"
        | "keychain-access-groups"
        | "application-identifier"
        | "com.apple.developer.team-identifier"
        | "get-task-allow"
        | "beta-reports-active"
        | "com.apple.developer.healthkit.access" => Ignored,

        "com.apple.developer.contacts.notes"
        | "com.apple.developer.carplay-audio"
        | "com.apple.developer.carplay-charging"
        | "com.apple.developer.carplay-maps"
        | "com.apple.developer.carplay-messaging"
        | "com.apple.developer.carplay-parking"
        | "com.apple.developer.carplay-quick-ordering"
        | "com.apple.developer.exposure-notification"
        | "com.apple.developer.playable-content"
        | "com.apple.developer.usernotifications.filtering"
        | "com.apple.developer.networking.multicast" => ProfileAttached,

        _ => Unknown,
    }
}

/// Entitlements of one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entitlements(pub BTreeMap<String, plist::Value>);

impl Entitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dictionary(dict: plist::Dictionary) -> Self {
        Self(dict.into_iter().collect())
    }

    /// Parses an `.entitlements` property list (XML or binary).
    pub fn from_plist_bytes(data: &[u8]) -> Result<Self> {
        let value: plist::Value = plist::from_bytes(data)?;
        let dict = value.into_dictionary().ok_or_else(|| AutosignError::InvalidEntitlement {
            key: "<root>".to_string(),
            message: "entitlements property list is not a dictionary".to_string(),
        })?;
        Ok(Self::from_dictionary(dict))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: plist::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&plist::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys that need a matching capability on the App ID.
    pub fn portal_keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .keys()
            .map(String::as_str)
            .filter(|key| matches!(classify(key), EntitlementKind::Capability(_)))
    }

    /// First key that can only be satisfied by a manually generated profile.
    pub fn profile_attached_key(&self) -> Option<&str> {
        self.0
            .keys()
            .map(String::as_str)
            .find(|key| classify(key) == EntitlementKind::ProfileAttached)
    }

    /// iCloud containers the project requests.
    ///
    /// Containers only count when iCloud Documents or CloudKit is enabled.
    pub fn icloud_containers(&self) -> Result<Vec<String>> {
        if !self.uses_cloud_documents_or_kit()? {
            return Ok(Vec::new());
        }
        self.container_identifiers()
    }

    /// Raw value of the iCloud container identifiers entitlement.
    pub fn container_identifiers(&self) -> Result<Vec<String>> {
        match self.get(ICLOUD_CONTAINERS_KEY) {
            Some(value) => string_array(ICLOUD_CONTAINERS_KEY, value),
            None => Ok(Vec::new()),
        }
    }

    /// Capability (with settings) an entitlement key requires on the App ID.
    ///
    /// Returns `None` for keys that need no portal action.
    pub fn capability_for(&self, key: &str) -> Result<Option<Capability>> {
        let EntitlementKind::Capability(capability_type) = classify(key) else {
            return Ok(None);
        };

        let capability = match capability_type {
            CapabilityType::Icloud => {
                let capability = Capability::new(CapabilityType::Icloud);
                if self.uses_cloud_documents_or_kit()? {
                    capability.with_setting(ICLOUD_VERSION_SETTING, ICLOUD_VERSION_XCODE_6)
                } else {
                    capability
                }
            }
            CapabilityType::DataProtection => {
                let value = self
                    .get(key)
                    .and_then(|v| v.as_string())
                    .ok_or_else(|| AutosignError::InvalidEntitlement {
                        key: key.to_string(),
                        message: "expected a string value".to_string(),
                    })?;
                let level = data_protection_level(value).ok_or_else(|| {
                    AutosignError::InvalidEntitlement {
                        key: key.to_string(),
                        message: format!("unknown data protection level: {}", value),
                    }
                })?;
                Capability::new(CapabilityType::DataProtection)
                    .with_setting(DATA_PROTECTION_SETTING, level)
            }
            CapabilityType::AppleIdAuth => Capability::new(CapabilityType::AppleIdAuth)
                .with_setting(APPLE_ID_AUTH_SETTING, APPLE_ID_AUTH_PRIMARY_CONSENT),
            other => Capability::new(other),
        };

        Ok(Some(capability))
    }

    /// Whether an enabled capability satisfies the given entitlement key.
    ///
    /// Types must be equal; iCloud and data protection also compare settings.
    pub fn capability_matches(&self, key: &str, enabled: &Capability) -> Result<bool> {
        let Some(wanted) = self.capability_for(key)? else {
            return Ok(true);
        };
        if wanted.capability_type != enabled.capability_type {
            return Ok(false);
        }

        match wanted.capability_type {
            CapabilityType::Icloud | CapabilityType::DataProtection => {
                Ok(wanted.settings.iter().all(|setting| {
                    enabled.settings.iter().any(|present| {
                        present.key == setting.key
                            && setting
                                .options
                                .iter()
                                .all(|option| present.options.contains(option))
                    })
                }))
            }
            _ => Ok(true),
        }
    }

    fn uses_cloud_documents_or_kit(&self) -> Result<bool> {
        match self.get(ICLOUD_SERVICES_KEY) {
            Some(services) => Ok(string_array(ICLOUD_SERVICES_KEY, services)?
                .iter()
                .any(|service| service == "CloudDocuments" || service == "CloudKit")),
            None => Ok(false),
        }
    }
}

fn data_protection_level(value: &str) -> Option<&'static str> {
    match value {
        "NSFileProtectionComplete" => Some("COMPLETE_PROTECTION"),
        "NSFileProtectionCompleteUnlessOpen" => Some("PROTECTED_UNLESS_OPEN"),
        "NSFileProtectionCompleteUntilFirstUserAuthentication" => {
            Some("PROTECTED_UNTIL_FIRST_USER_AUTH")
        }
        _ => None,
    }
}

fn string_array(key: &str, value: &plist::Value) -> Result<Vec<String>> {
    let invalid = || AutosignError::InvalidEntitlement {
        key: key.to_string(),
        message: "expected an array of strings".to_string(),
    };
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|item| item.as_string().map(str::to_string).ok_or_else(invalid))
        .collect()
}

/// Pre-flight check that every entitlement of every target can be handled
/// through the Developer Portal API.
///
/// Runs before any portal mutation so that an unsupported entitlement aborts
/// the whole run.
pub fn can_generate_profile_with_entitlements(
    entitlements_by_bundle_id: &BTreeMap<String, Entitlements>,
) -> Result<()> {
    for (bundle_id, entitlements) in entitlements_by_bundle_id {
        if let Some(key) = entitlements.profile_attached_key() {
            return Err(AutosignError::UnsupportedEntitlement {
                entitlement: key.to_string(),
                bundle_id: bundle_id.clone(),
            });
        }
    }
    Ok(())
}
