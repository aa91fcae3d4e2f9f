//! `autosign codesign`: reconciles and installs signing assets.

use anyhow::{Context, Result, bail};
use autosign_core::models::{CodesignAssets, DistributionType, LocalCertificate, TestDevice};
use autosign_core::outputs::CodesignOutputs;
use autosign_core::portal::demo::DEMO_TEAM_ID;
use autosign_core::signing::{
    Keychain, install_codesign_assets, load_local_certificates, parse_certificate_specs,
    profiles_dir,
};
use autosign_core::{CodesignManager, CodesignRequest};
use clap::Args;
use console::style;
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::config::load_test_devices;
use crate::layout::load_layout;

use super::{Session, select_backend};

#[derive(Args, Debug)]
pub struct CodesignArgs {
    /// Project layout file (JSON)
    #[arg(long)]
    layout: PathBuf,

    /// Distribution type: development, app-store, ad-hoc or enterprise
    #[arg(long, default_value = "development")]
    distribution: DistributionType,

    /// `|`-separated .p12 URLs (https://, file:// or a path)
    #[arg(long, env = "AUTOSIGN_CERTIFICATE_URLS", hide_env_values = true)]
    certificate_urls: Option<String>,

    /// `|`-separated passphrases, one per certificate
    #[arg(long, env = "AUTOSIGN_CERTIFICATE_PASSPHRASES", hide_env_values = true)]
    passphrases: Option<String>,

    /// Regenerate profiles expiring within this many days
    #[arg(long, default_value_t = 0)]
    min_profile_days_valid: u32,

    /// Also sign UI-test targets with wildcard development profiles
    #[arg(long)]
    sign_ui_test_targets: bool,

    /// Register the known test devices on the portal
    #[arg(long)]
    register_test_devices: bool,

    /// JSON file listing known test devices (overrides the profile)
    #[arg(long)]
    test_devices: Option<PathBuf>,

    /// Keychain to import certificates into
    #[arg(long, env = "AUTOSIGN_KEYCHAIN_PATH")]
    keychain_path: Option<PathBuf>,

    #[arg(long, env = "AUTOSIGN_KEYCHAIN_PASSWORD", hide_env_values = true)]
    keychain_password: Option<String>,

    /// Directory to install profiles into
    #[arg(long)]
    profiles_dir: Option<PathBuf>,

    /// Write the output variables to this file as KEY=VALUE lines
    #[arg(long)]
    output_env: Option<PathBuf>,

    /// Only reconcile, install nothing locally
    #[arg(long)]
    skip_install: bool,
}

pub async fn handle_codesign_command(session: &Session, args: CodesignArgs) -> Result<()> {
    let keychain_settings = match (args.keychain_path.clone(), args.keychain_password.clone()) {
        (Some(path), Some(password)) => Some((path, SecretString::from(password))),
        (None, None) => None,
        _ => bail!("--keychain-path and --keychain-password must be given together"),
    };

    let mut project = load_layout(&args.layout, session.config.team_id.as_deref())?;
    let backend = select_backend(session)?;

    let certificates = match &backend.demo_certificates {
        Some(certificates) => {
            if project.app.team_id != DEMO_TEAM_ID {
                tracing::warn!(
                    "Demo mode: using team {} instead of {}",
                    DEMO_TEAM_ID,
                    project.app.team_id
                );
                project.app.team_id = DEMO_TEAM_ID.to_string();
            }
            if args.certificate_urls.is_some() {
                tracing::warn!("Demo mode: ignoring --certificate-urls");
            }
            certificates.clone()
        }
        None => download_certificates(&args).await?,
    };

    let test_devices = test_devices(session, &args)?;
    let manager = CodesignManager::new(backend.client.clone()).with_test_devices(test_devices);
    let request = CodesignRequest {
        distribution: args.distribution,
        certificates,
        min_profile_days_valid: args.min_profile_days_valid,
        sign_ui_test_targets: args.sign_ui_test_targets,
        register_test_devices: args.register_test_devices,
        verbose: session.verbose,
    };

    let assets = manager
        .ensure_codesign_assets(&project.app, &request)
        .await
        .context("Failed to ensure code signing assets")?;

    print_assets(&assets);

    if args.skip_install {
        tracing::info!("Skipping local installation");
    } else if backend.is_demo() && args.profiles_dir.is_none() {
        tracing::info!("Demo mode: pass --profiles-dir to install the demo profiles");
    } else {
        let keychain = match keychain_settings {
            Some((path, password)) => Some(
                Keychain::open_or_create(path, password)
                    .await
                    .context("Failed to open keychain")?,
            ),
            None => None,
        };
        let dir = match args.profiles_dir.clone() {
            Some(dir) => dir,
            None => profiles_dir()?,
        };
        let report = install_codesign_assets(&assets, keychain.as_ref(), &dir)
            .await
            .context("Failed to install code signing assets")?;
        println!(
            "Installed {} certificate(s) and {} profile(s) into {}",
            report.certificates.len(),
            report.profiles.len(),
            dir.display()
        );
    }

    let outputs = CodesignOutputs::from_assets(
        args.distribution,
        &project.app.team_id,
        &project.main_bundle_id,
        &assets,
    )?;

    println!();
    for (key, value) in outputs.to_env_pairs() {
        println!("{}={}", style(key).bold(), value);
    }

    if let Some(path) = &args.output_env {
        outputs
            .write_env_file(path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!();
        println!("Wrote outputs to {}", path.display());
    }

    Ok(())
}

async fn download_certificates(args: &CodesignArgs) -> Result<Vec<LocalCertificate>> {
    let urls = args
        .certificate_urls
        .as_deref()
        .context("--certificate-urls (AUTOSIGN_CERTIFICATE_URLS) is required")?;
    let passphrases = args.passphrases.as_deref().unwrap_or("");

    let specs = parse_certificate_specs(urls, passphrases)?;
    let http = reqwest::Client::new();
    let certificates = load_local_certificates(&http, &specs)
        .await
        .context("Failed to load signing certificates")?;

    tracing::info!("Loaded {} certificate(s)", certificates.len());
    Ok(certificates)
}

fn test_devices(session: &Session, args: &CodesignArgs) -> Result<Vec<TestDevice>> {
    if !args.register_test_devices {
        return Ok(Vec::new());
    }
    let path = args
        .test_devices
        .clone()
        .or_else(|| session.config.test_devices_path.clone());
    match path {
        Some(path) => load_test_devices(&path),
        None => {
            tracing::warn!("--register-test-devices given but no test device list is configured");
            Ok(Vec::new())
        }
    }
}

fn print_assets(assets: &HashMap<DistributionType, CodesignAssets>) {
    let ordered: BTreeMap<_, _> = assets.iter().collect();
    for (distribution, assets) in ordered {
        println!(
            "{} {} ({})",
            style("✓").green().bold(),
            style(distribution).bold(),
            assets.certificate.certificate.common_name
        );
        for (bundle_id, profile) in &assets.archivable_target_profiles_by_bundle_id {
            println!("  {} {}", bundle_id, style(&profile.uuid).dim());
        }
        for (bundle_id, profile) in &assets.ui_test_target_profiles_by_bundle_id {
            println!(
                "  {} {} {}",
                bundle_id,
                style(&profile.uuid).dim(),
                style("(UI test)").dim()
            );
        }
    }
}
