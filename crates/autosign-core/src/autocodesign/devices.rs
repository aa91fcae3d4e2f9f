//! Test device registration.

use crate::error::{AutosignError, Result};
use crate::models::{Device, DeviceClass, Platform, TestDevice};
use crate::portal::DeviceClient;

const DEFAULT_DEVICE_NAME: &str = "Bitrise test device";

/// Compares UDIDs ignoring case and dash separators.
pub fn udid_eq(a: &str, b: &str) -> bool {
    let normalize = |udid: &str| -> String {
        udid.chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect()
    };
    normalize(a) == normalize(b)
}

/// Whether a device can run builds of `platform`.
pub fn device_matches_platform(device: &Device, platform: Platform) -> bool {
    match platform {
        Platform::Ios => matches!(
            device.device_class,
            DeviceClass::AppleWatch | DeviceClass::Ipad | DeviceClass::Iphone | DeviceClass::Ipod
        ),
        Platform::TvOs => device.device_class == DeviceClass::AppleTv,
    }
}

fn dedup_roster(roster: &[TestDevice]) -> Vec<&TestDevice> {
    let mut unique: Vec<&TestDevice> = Vec::new();
    for device in roster {
        if unique.iter().any(|seen| udid_eq(&seen.udid, &device.udid)) {
            tracing::debug!("Ignoring duplicated test device: {}", device.udid);
        } else {
            unique.push(device);
        }
    }
    unique
}

/// Registers missing test devices and returns the IDs of every portal
/// device usable for `platform`.
///
/// A device the portal refuses to register is skipped with a warning.
pub async fn ensure_test_devices(
    client: &dyn DeviceClient,
    roster: &[TestDevice],
    platform: Platform,
) -> Result<Vec<String>> {
    let device_platform = platform.device_platform();
    let mut devices = client.list_devices(None, device_platform).await?;
    tracing::info!("{} device(s) registered on the Developer Portal", devices.len());

    for test_device in dedup_roster(roster) {
        if devices.iter().any(|d| udid_eq(&d.udid, &test_device.udid)) {
            tracing::debug!("Device already registered: {}", test_device.udid);
            continue;
        }

        let name = if test_device.title.is_empty() {
            DEFAULT_DEVICE_NAME
        } else {
            test_device.title.as_str()
        };
        tracing::info!("Registering device: {} ({})", test_device.udid, name);

        match client
            .register_device(&test_device.udid, name, device_platform)
            .await
        {
            Ok(device) => devices.push(device),
            Err(AutosignError::DeviceRegistrationConflict { udid, reason }) => {
                tracing::warn!(
                    "Failed to register device {} (can be caused by invalid UDID or trying to register a Mac device): {}",
                    udid,
                    reason
                );
            }
            Err(e) => return Err(e),
        }
    }

    let ids: Vec<String> = devices
        .into_iter()
        .filter(|device| device_matches_platform(device, platform))
        .map(|device| device.id)
        .collect();
    tracing::info!("{} device(s) included in {} profiles", ids.len(), platform);

    Ok(ids)
}
