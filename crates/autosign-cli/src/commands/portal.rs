//! Read-only portal listings.

use anyhow::{Context, Result};
use autosign_core::models::DevicePlatform;
use console::style;

use super::{Session, select_backend};

pub async fn list_devices(session: &Session, platform: DevicePlatform) -> Result<()> {
    let backend = select_backend(session)?;
    let devices = backend
        .client
        .device_client
        .list_devices(None, platform)
        .await
        .context("Failed to list devices")?;

    if devices.is_empty() {
        println!("No enabled {} devices registered.", platform);
        return Ok(());
    }

    println!("{:<12} {:<42} {:<14} {}", "ID", "UDID", "CLASS", "NAME");
    println!("{}", "-".repeat(90));
    for device in devices {
        println!(
            "{:<12} {:<42} {:<14} {}",
            device.id,
            device.udid,
            format!("{:?}", device.device_class),
            device.name
        );
    }

    Ok(())
}

pub async fn list_certificates(session: &Session) -> Result<()> {
    let backend = select_backend(session)?;
    let by_type = backend
        .client
        .certificate_source
        .query_all_certificates()
        .await
        .context("Failed to list certificates")?;

    let mut types: Vec<_> = by_type.keys().copied().collect();
    types.sort();

    if types.iter().all(|t| by_type[t].is_empty()) {
        println!("No certificates found.");
        return Ok(());
    }

    for certificate_type in types {
        println!("{}", style(certificate_type).bold());
        for certificate in &by_type[&certificate_type] {
            let expiry = certificate
                .expiration_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} {}",
                certificate.name,
                style(format!("serial {}", certificate.serial_number)).dim(),
                style(format!("expires {}", expiry)).dim()
            );
        }
        println!();
    }

    Ok(())
}
