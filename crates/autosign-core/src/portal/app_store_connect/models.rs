//! JSON:API wire types for the App Store Connect API.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::Result;
use crate::models::{
    BundleId, Capability, CapabilityOption, CapabilitySetting, CapabilityType, CertificateType,
    Device, DeviceClass, DevicePlatform, DeviceStatus, PortalCertificate, Profile, ProfileState,
    ProfileType, normalize_serial,
};

/// Single-resource response document.
#[derive(Debug, Deserialize)]
pub struct Document<T> {
    pub data: T,
}

/// Paged collection response document.
#[derive(Debug, Deserialize)]
pub struct PagedDocument<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PagedLinks,
}

#[derive(Debug, Default, Deserialize)]
pub struct PagedLinks {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    pub attributes: A,
}

/// Resource reduced to its identifier, used for relationship listings.
#[derive(Debug, Deserialize)]
pub struct ResourceId {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorItem {
    pub code: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// Joins all error entries into one message.
    pub fn message(&self) -> Option<String> {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| {
                let mut part = String::new();
                if let Some(code) = &e.code {
                    part.push_str(code);
                    part.push_str(": ");
                }
                part.push_str(e.title.as_deref().unwrap_or_default());
                if let Some(detail) = &e.detail {
                    part.push_str(" - ");
                    part.push_str(detail);
                }
                part
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAttributes {
    #[serde(default)]
    pub name: String,
    pub certificate_type: String,
    pub serial_number: String,
    #[serde(default, deserialize_with = "optional_date")]
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Certificate bucket for a portal certificate type, if it is an iOS one.
pub fn certificate_bucket(certificate_type: &str) -> Option<CertificateType> {
    match certificate_type {
        "IOS_DEVELOPMENT" | "DEVELOPMENT" => Some(CertificateType::Development),
        "IOS_DISTRIBUTION" | "DISTRIBUTION" => Some(CertificateType::Distribution),
        _ => None,
    }
}

impl Resource<CertificateAttributes> {
    pub fn into_certificate(self) -> Option<PortalCertificate> {
        let certificate_type = certificate_bucket(&self.attributes.certificate_type)?;
        Some(PortalCertificate {
            id: self.id,
            name: self.attributes.name,
            serial_number: normalize_serial(&self.attributes.serial_number),
            certificate_type,
            expiration_date: self.attributes.expiration_date,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BundleIdAttributes {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
}

impl From<Resource<BundleIdAttributes>> for BundleId {
    fn from(resource: Resource<BundleIdAttributes>) -> Self {
        BundleId {
            id: resource.id,
            identifier: resource.attributes.identifier,
            name: resource.attributes.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityAttributes {
    pub capability_type: CapabilityType,
    #[serde(default)]
    pub settings: Option<Vec<WireSetting>>,
}

#[derive(Debug, Deserialize)]
pub struct WireSetting {
    pub key: String,
    #[serde(default)]
    pub options: Option<Vec<WireOption>>,
}

#[derive(Debug, Deserialize)]
pub struct WireOption {
    pub key: String,
}

impl From<Resource<CapabilityAttributes>> for Capability {
    fn from(resource: Resource<CapabilityAttributes>) -> Self {
        Capability {
            capability_type: resource.attributes.capability_type,
            settings: resource
                .attributes
                .settings
                .unwrap_or_default()
                .into_iter()
                .map(|setting| CapabilitySetting {
                    key: setting.key,
                    options: setting
                        .options
                        .unwrap_or_default()
                        .into_iter()
                        .map(|option| CapabilityOption { key: option.key })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Request body fragment for a capability's settings.
pub fn capability_settings_json(capability: &Capability) -> serde_json::Value {
    serde_json::Value::Array(
        capability
            .settings
            .iter()
            .map(|setting| {
                serde_json::json!({
                    "key": setting.key,
                    "options": setting
                        .options
                        .iter()
                        .map(|option| serde_json::json!({ "key": option.key }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAttributes {
    pub name: String,
    pub uuid: String,
    pub profile_type: ProfileType,
    pub profile_state: ProfileState,
    #[serde(deserialize_with = "date")]
    pub expiration_date: DateTime<Utc>,
    #[serde(default)]
    pub profile_content: Option<String>,
}

impl Resource<ProfileAttributes> {
    pub fn into_profile(self) -> Result<Profile> {
        let content = match self.attributes.profile_content {
            Some(encoded) => STANDARD.decode(encoded.trim())?,
            None => Vec::new(),
        };
        Ok(Profile {
            id: self.id,
            name: self.attributes.name,
            uuid: self.attributes.uuid,
            profile_type: self.attributes.profile_type,
            state: self.attributes.profile_state,
            expiration_date: self.attributes.expiration_date,
            content,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub udid: String,
    #[serde(default)]
    pub name: String,
    pub device_class: DeviceClass,
    pub platform: DevicePlatform,
    pub status: DeviceStatus,
}

impl From<Resource<DeviceAttributes>> for Device {
    fn from(resource: Resource<DeviceAttributes>) -> Self {
        Device {
            id: resource.id,
            udid: resource.attributes.udid,
            name: resource.attributes.name,
            device_class: resource.attributes.device_class,
            platform: resource.attributes.platform,
            status: resource.attributes.status,
        }
    }
}

// ============================================================================
// Dates
// ============================================================================

/// Parses portal timestamps, which come both as RFC 3339 and with a
/// colon-less offset (`2025-01-31T10:00:00.000+0000`).
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

fn date<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    let value = String::deserialize(deserializer)?;
    parse_date(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", value)))
}

fn optional_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(value) => parse_date(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", value))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let a = parse_date("2025-01-31T10:00:00.000+0000").unwrap();
        let b = parse_date("2025-01-31T10:00:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_date("31/01/2025").is_none());
    }

    #[test]
    fn test_profile_document() {
        let body = r#"{
            "data": {
                "type": "profiles",
                "id": "PRF1",
                "attributes": {
                    "name": "Bitrise iOS development - (com.acme.app)",
                    "uuid": "3F2504E0-4F89-11D3-9A0C-0305E82C3301",
                    "profileType": "IOS_APP_DEVELOPMENT",
                    "profileState": "ACTIVE",
                    "expirationDate": "2026-01-31T10:00:00.000+0000",
                    "profileContent": "aGVsbG8="
                }
            }
        }"#;
        let document: Document<Resource<ProfileAttributes>> = serde_json::from_str(body).unwrap();
        let profile = document.data.into_profile().unwrap();
        assert_eq!(profile.id, "PRF1");
        assert_eq!(profile.profile_type, ProfileType::IosAppDevelopment);
        assert_eq!(profile.state, ProfileState::Active);
        assert_eq!(profile.content, b"hello");
    }

    #[test]
    fn test_paged_document_next_link() {
        let body = r#"{
            "data": [{"type": "devices", "id": "D1"}],
            "links": {"self": "https://x/v1/devices", "next": "https://x/v1/devices?cursor=abc"}
        }"#;
        let page: PagedDocument<ResourceId> = serde_json::from_str(body).unwrap();
        assert_eq!(page.data[0].id, "D1");
        assert_eq!(page.links.next.as_deref(), Some("https://x/v1/devices?cursor=abc"));
    }

    #[test]
    fn test_capability_with_null_settings() {
        let body = r#"{"id": "C1", "attributes": {"capabilityType": "PUSH_NOTIFICATIONS", "settings": null}}"#;
        let resource: Resource<CapabilityAttributes> = serde_json::from_str(body).unwrap();
        let capability = Capability::from(resource);
        assert_eq!(capability.capability_type, CapabilityType::PushNotifications);
        assert!(capability.settings.is_empty());
    }

    #[test]
    fn test_error_response_message() {
        let body = r#"{"errors": [{"status": "409", "code": "ENTITY_ERROR", "title": "There is a problem with the request entity", "detail": "Multiple profiles found with the name 'x'"}]}"#;
        let response: ErrorResponse = serde_json::from_str(body).unwrap();
        let message = response.message().unwrap();
        assert!(message.starts_with("ENTITY_ERROR: "));
        assert!(message.contains("Multiple profiles found with the name"));
    }

    #[test]
    fn test_certificate_bucket() {
        assert_eq!(certificate_bucket("IOS_DISTRIBUTION"), Some(CertificateType::Distribution));
        assert_eq!(certificate_bucket("DEVELOPMENT"), Some(CertificateType::Development));
        assert_eq!(certificate_bucket("MAC_INSTALLER_DISTRIBUTION"), None);
    }
}
