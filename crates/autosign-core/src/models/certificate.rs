//! Local and Developer Portal signing certificates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use super::CertificateType;

/// Common-name prefixes that mark a distribution certificate.
const DISTRIBUTION_PREFIXES: [&str; 2] = ["iphone distribution", "apple distribution"];

/// Whether a certificate common name belongs to a distribution certificate.
///
/// Matches on the common-name prefix rather than certificate extensions, since
/// profile naming and selection depend on this exact rule.
pub fn is_distribution_certificate(common_name: &str) -> bool {
    let name = common_name.to_lowercase();
    DISTRIBUTION_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Normalizes a certificate serial number for comparison.
///
/// Serials are compared as uppercase hex without separators or leading zeros.
pub fn normalize_serial(serial: &str) -> String {
    let serial = serial.trim();
    let serial = serial
        .strip_prefix("0x")
        .or_else(|| serial.strip_prefix("0X"))
        .unwrap_or(serial);
    let hex: String = serial
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() && !hex.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// PKCS#12 bundle backing a local certificate.
pub struct Pkcs12Identity {
    pub data: Vec<u8>,
    pub passphrase: SecretString,
}

impl std::fmt::Debug for Pkcs12Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs12Identity")
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .field("passphrase", &self.passphrase)
            .finish()
    }
}

/// A signing certificate available on this machine.
#[derive(Debug, Clone)]
pub struct LocalCertificate {
    pub common_name: String,
    pub team_id: String,
    pub team_name: String,
    /// Normalized serial number, see [`normalize_serial`].
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Private key material; absent for certificates known only by metadata.
    pub identity: Option<Arc<Pkcs12Identity>>,
}

impl LocalCertificate {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    pub fn certificate_type(&self) -> CertificateType {
        if is_distribution_certificate(&self.common_name) {
            CertificateType::Distribution
        } else {
            CertificateType::Development
        }
    }
}

impl std::fmt::Display for LocalCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] (serial {}, expires {})",
            self.common_name,
            self.team_id,
            self.serial_number,
            self.not_after.format("%Y-%m-%d")
        )
    }
}

/// A certificate record on the Developer Portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalCertificate {
    pub id: String,
    pub name: String,
    pub serial_number: String,
    pub certificate_type: CertificateType,
    pub expiration_date: Option<DateTime<Utc>>,
}

/// A local certificate paired with its Developer Portal record.
#[derive(Debug, Clone)]
pub struct MatchedCertificate {
    pub certificate: LocalCertificate,
    /// Developer Portal certificate ID.
    pub id: String,
}
