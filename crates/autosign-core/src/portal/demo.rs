//! Demo mode support.
//!
//! When `AUTOSIGN_DEMO_MODE=true` (or `--demo` is passed to the CLI), runs
//! use an in-memory portal seeded with a fake team instead of App Store
//! Connect, and fake local certificates instead of downloaded ones.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::{CertificateType, DeviceClass, LocalCertificate};

use super::InMemoryPortal;

pub const DEMO_TEAM_ID: &str = "DEMO123456";
pub const DEMO_TEAM_NAME: &str = "Demo Team";

const DEMO_CERTIFICATES: &[(&str, &str, CertificateType)] = &[
    (
        "Apple Development: Demo Developer (DEMO123456)",
        "1A2B3C4D5E6F",
        CertificateType::Development,
    ),
    (
        "Apple Distribution: Demo Team (DEMO123456)",
        "6F5E4D3C2B1A",
        CertificateType::Distribution,
    ),
];

const DEMO_DEVICES: &[(&str, &str, DeviceClass)] = &[
    ("00008030-001A2B3C4D5E6F70", "Demo iPhone", DeviceClass::Iphone),
    ("00008027-000D1E2F3A4B5C6D", "Demo iPad", DeviceClass::Ipad),
    ("6f1c2a9b8e7d6c5b4a3f2e1d0c9b8a7f6e5d4c3b", "Demo Apple TV", DeviceClass::AppleTv),
];

/// Checks if demo mode is enabled via environment variable.
pub fn is_enabled() -> bool {
    std::env::var("AUTOSIGN_DEMO_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// A seeded portal and the local certificates that match it.
pub struct DemoEnvironment {
    pub portal: Arc<InMemoryPortal>,
    pub certificates: Vec<LocalCertificate>,
}

/// Seeds an in-memory portal with demo certificates and devices.
pub fn demo_environment(now: DateTime<Utc>) -> DemoEnvironment {
    let portal = InMemoryPortal::new(DEMO_TEAM_ID);
    let mut certificates = Vec::with_capacity(DEMO_CERTIFICATES.len());

    for (name, serial, certificate_type) in DEMO_CERTIFICATES {
        let portal_certificate = portal.add_certificate(name, serial, *certificate_type);
        certificates.push(LocalCertificate {
            common_name: name.to_string(),
            team_id: DEMO_TEAM_ID.to_string(),
            team_name: DEMO_TEAM_NAME.to_string(),
            serial_number: portal_certificate.serial_number,
            not_before: now - Duration::days(30),
            not_after: now + Duration::days(335),
            identity: None,
        });
    }

    for (udid, name, class) in DEMO_DEVICES {
        portal.add_device(udid, name, *class);
    }

    DemoEnvironment {
        portal: Arc::new(portal),
        certificates,
    }
}
