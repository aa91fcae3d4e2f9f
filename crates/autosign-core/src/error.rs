//! Error types for the autosign core library.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::CertificateType;

const DUPLICATE_PROFILE_NAME: &str = "multiple profiles found with the name";

/// Core error type for code-signing reconciliation.
#[derive(Error, Debug)]
pub enum AutosignError {
    #[error(
        "no valid {certificate_type} type certificate uploaded with Team ID ({team_id}); \
         upload a {certificate_type} type certificate (.p12) to continue"
    )]
    MissingCertificate {
        certificate_type: CertificateType,
        team_id: String,
    },

    /// An existing profile does not satisfy the run's requirements.
    ///
    /// Handled inside the profile reconciler by regenerating the profile.
    #[error("profile does not match requirements: {0}")]
    NonMatchingProfile(String),

    #[error(
        "can't manage code signing assets automatically: entitlement {entitlement} of {bundle_id} \
         can only be added to a manually generated provisioning profile"
    )]
    UnsupportedEntitlement {
        entitlement: String,
        bundle_id: String,
    },

    #[error("failed to create profile {name} after removing the expired duplicate: {reason}")]
    ProfileRetryExhausted { name: String, reason: String },

    #[error("{}", format_missing_containers(.0))]
    MissingICloudContainers(BTreeMap<String, Vec<String>>),

    #[error("failed to register device {udid}: {reason}")]
    DeviceRegistrationConflict { udid: String, reason: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid bundle ID: {0}")]
    InvalidBundleId(String),

    #[error("Invalid entitlement {key}: {message}")]
    InvalidEntitlement { key: String, message: String },

    #[error("Invalid profile content: {0}")]
    ProfileContent(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl AutosignError {
    /// Whether the portal rejected a profile creation because a profile with
    /// the same name already exists, usually an expired one that the name
    /// search does not return.
    pub fn is_duplicate_profile_name(&self) -> bool {
        match self {
            AutosignError::Api { message, .. } => {
                message.to_lowercase().contains(DUPLICATE_PROFILE_NAME)
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AutosignError::Api { status: 404, .. })
    }
}

fn format_missing_containers(containers: &BTreeMap<String, Vec<String>>) -> String {
    let mut message = String::from(
        "the following iCloud containers must be added manually to their App IDs at \
         https://developer.apple.com/account/resources/identifiers/list:",
    );
    for (bundle_id, ids) in containers {
        message.push_str(&format!("\n  {}: {}", bundle_id, ids.join(", ")));
    }
    message
}

/// Result type alias for autosign operations.
pub type Result<T> = std::result::Result<T, AutosignError>;
