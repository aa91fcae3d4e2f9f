//! CLI command implementations.

pub mod codesign;
pub mod config;
pub mod portal;
pub mod preflight;

use anyhow::{Result, bail};
use autosign_core::DevPortalClient;
use autosign_core::config::{API_ISSUER_ID_ENV, API_KEY_ID_ENV, API_KEY_PATH_ENV};
use autosign_core::models::LocalCertificate;
use autosign_core::portal::demo;
use chrono::Utc;

use crate::config::ResolvedConfig;

/// Settings shared by every portal command.
#[derive(Debug, Clone)]
pub struct Session {
    pub config: ResolvedConfig,
    pub demo: bool,
    pub verbose: bool,
}

/// The Developer Portal backend chosen for this invocation.
pub struct Backend {
    pub client: DevPortalClient,
    /// Local certificates matching the demo team, set in demo mode only.
    pub demo_certificates: Option<Vec<LocalCertificate>>,
}

impl Backend {
    pub fn is_demo(&self) -> bool {
        self.demo_certificates.is_some()
    }
}

/// Picks the backend once: demo mode, then an App Store Connect API key.
pub fn select_backend(session: &Session) -> Result<Backend> {
    if session.demo {
        tracing::warn!("Demo mode: using an in-memory Developer Portal");
        let env = demo::demo_environment(Utc::now());
        return Ok(Backend {
            client: DevPortalClient::in_memory(env.portal),
            demo_certificates: Some(env.certificates),
        });
    }

    match &session.config.api_key {
        Some(api_key) => Ok(Backend {
            client: api_key.portal_client()?,
            demo_certificates: None,
        }),
        None => bail!(
            "No Developer Portal credentials. Set {}, {} and {} (or configure a profile with 'autosign config set'), or pass --demo",
            API_KEY_ID_ENV,
            API_ISSUER_ID_ENV,
            API_KEY_PATH_ENV
        ),
    }
}
