//! Distribution channels, platforms, and the fixed tables relating them.

use serde::{Deserialize, Serialize};

// ============================================================================
// Platform
// ============================================================================

/// Target platform of the project being signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "iOS", alias = "ios")]
    Ios,
    #[serde(rename = "tvOS", alias = "tvos")]
    TvOs,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::TvOs => "tvOS",
        }
    }

    /// Developer Portal device platform used when listing and registering devices.
    ///
    /// Apple TVs are registered under the IOS device platform.
    pub fn device_platform(&self) -> DevicePlatform {
        DevicePlatform::Ios
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "tvos" => Ok(Platform::TvOs),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device platform filter understood by the Developer Portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevicePlatform {
    Ios,
    MacOs,
}

impl DevicePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevicePlatform::Ios => "IOS",
            DevicePlatform::MacOs => "MAC_OS",
        }
    }
}

impl std::str::FromStr for DevicePlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ios" | "tvos" => Ok(DevicePlatform::Ios),
            "macos" | "mac_os" => Ok(DevicePlatform::MacOs),
            _ => Err(format!("Unknown device platform: {}", s)),
        }
    }
}

impl std::fmt::Display for DevicePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Certificate Type
// ============================================================================

/// Signing certificate bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Development,
    Distribution,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::Development => "development",
            CertificateType::Distribution => "distribution",
        }
    }
}

impl std::str::FromStr for CertificateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(CertificateType::Development),
            "distribution" => Ok(CertificateType::Distribution),
            _ => Err(format!("Unknown certificate type: {}", s)),
        }
    }
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Distribution Type
// ============================================================================

/// Deployment channel a build is signed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionType {
    Development,
    AppStore,
    AdHoc,
    Enterprise,
}

impl DistributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionType::Development => "development",
            DistributionType::AppStore => "app-store",
            DistributionType::AdHoc => "ad-hoc",
            DistributionType::Enterprise => "enterprise",
        }
    }

    /// Certificate bucket a profile of this distribution type is signed with.
    pub fn certificate_type(&self) -> CertificateType {
        match self {
            DistributionType::Development => CertificateType::Development,
            DistributionType::AppStore | DistributionType::AdHoc | DistributionType::Enterprise => {
                CertificateType::Distribution
            }
        }
    }

    /// Whether profiles of this type embed an explicit device list.
    pub fn requires_device_list(&self) -> bool {
        matches!(self, DistributionType::Development | DistributionType::AdHoc)
    }
}

impl std::str::FromStr for DistributionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(DistributionType::Development),
            "app-store" => Ok(DistributionType::AppStore),
            "ad-hoc" => Ok(DistributionType::AdHoc),
            "enterprise" => Ok(DistributionType::Enterprise),
            _ => Err(format!("Unknown distribution type: {}", s)),
        }
    }
}

impl std::fmt::Display for DistributionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Profile Type
// ============================================================================

/// Developer Portal provisioning profile type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileType {
    IosAppDevelopment,
    IosAppStore,
    IosAppAdhoc,
    IosAppInhouse,
    TvosAppDevelopment,
    TvosAppStore,
    TvosAppAdhoc,
    TvosAppInhouse,
}

impl ProfileType {
    /// Profile type for a platform and distribution channel.
    pub fn for_distribution(platform: Platform, distribution: DistributionType) -> Self {
        match (platform, distribution) {
            (Platform::Ios, DistributionType::Development) => ProfileType::IosAppDevelopment,
            (Platform::Ios, DistributionType::AppStore) => ProfileType::IosAppStore,
            (Platform::Ios, DistributionType::AdHoc) => ProfileType::IosAppAdhoc,
            (Platform::Ios, DistributionType::Enterprise) => ProfileType::IosAppInhouse,
            (Platform::TvOs, DistributionType::Development) => ProfileType::TvosAppDevelopment,
            (Platform::TvOs, DistributionType::AppStore) => ProfileType::TvosAppStore,
            (Platform::TvOs, DistributionType::AdHoc) => ProfileType::TvosAppAdhoc,
            (Platform::TvOs, DistributionType::Enterprise) => ProfileType::TvosAppInhouse,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            ProfileType::IosAppDevelopment
            | ProfileType::IosAppStore
            | ProfileType::IosAppAdhoc
            | ProfileType::IosAppInhouse => Platform::Ios,
            ProfileType::TvosAppDevelopment
            | ProfileType::TvosAppStore
            | ProfileType::TvosAppAdhoc
            | ProfileType::TvosAppInhouse => Platform::TvOs,
        }
    }

    pub fn distribution_type(&self) -> DistributionType {
        match self {
            ProfileType::IosAppDevelopment | ProfileType::TvosAppDevelopment => {
                DistributionType::Development
            }
            ProfileType::IosAppStore | ProfileType::TvosAppStore => DistributionType::AppStore,
            ProfileType::IosAppAdhoc | ProfileType::TvosAppAdhoc => DistributionType::AdHoc,
            ProfileType::IosAppInhouse | ProfileType::TvosAppInhouse => DistributionType::Enterprise,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::IosAppDevelopment => "IOS_APP_DEVELOPMENT",
            ProfileType::IosAppStore => "IOS_APP_STORE",
            ProfileType::IosAppAdhoc => "IOS_APP_ADHOC",
            ProfileType::IosAppInhouse => "IOS_APP_INHOUSE",
            ProfileType::TvosAppDevelopment => "TVOS_APP_DEVELOPMENT",
            ProfileType::TvosAppStore => "TVOS_APP_STORE",
            ProfileType::TvosAppAdhoc => "TVOS_APP_ADHOC",
            ProfileType::TvosAppInhouse => "TVOS_APP_INHOUSE",
        }
    }
}

impl std::fmt::Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_certificate_type() {
        assert_eq!(
            DistributionType::Development.certificate_type(),
            CertificateType::Development
        );
        for distribution in [
            DistributionType::AppStore,
            DistributionType::AdHoc,
            DistributionType::Enterprise,
        ] {
            assert_eq!(distribution.certificate_type(), CertificateType::Distribution);
        }
    }

    #[test]
    fn test_requires_device_list() {
        assert!(DistributionType::Development.requires_device_list());
        assert!(DistributionType::AdHoc.requires_device_list());
        assert!(!DistributionType::AppStore.requires_device_list());
        assert!(!DistributionType::Enterprise.requires_device_list());
    }

    #[test]
    fn test_profile_type_table_is_consistent() {
        for platform in [Platform::Ios, Platform::TvOs] {
            for distribution in [
                DistributionType::Development,
                DistributionType::AppStore,
                DistributionType::AdHoc,
                DistributionType::Enterprise,
            ] {
                let profile_type = ProfileType::for_distribution(platform, distribution);
                assert_eq!(profile_type.platform(), platform);
                assert_eq!(profile_type.distribution_type(), distribution);
            }
        }
        assert_eq!(
            ProfileType::for_distribution(Platform::Ios, DistributionType::AppStore).as_str(),
            "IOS_APP_STORE"
        );
    }

    #[test]
    fn test_profile_type_serde_matches_portal_names() {
        let json = serde_json::to_string(&ProfileType::TvosAppInhouse).unwrap();
        assert_eq!(json, "\"TVOS_APP_INHOUSE\"");
        let parsed: ProfileType = serde_json::from_str("\"IOS_APP_ADHOC\"").unwrap();
        assert_eq!(parsed, ProfileType::IosAppAdhoc);
    }

    #[test]
    fn test_distribution_type_from_str() {
        assert_eq!("app-store".parse::<DistributionType>().unwrap(), DistributionType::AppStore);
        assert_eq!("Ad-Hoc".parse::<DistributionType>().unwrap(), DistributionType::AdHoc);
        assert!("store".parse::<DistributionType>().is_err());
    }
}
