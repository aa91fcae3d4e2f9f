//! Matches local signing certificates against the Developer Portal.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::error::{AutosignError, Result};
use crate::models::{CertificateType, DistributionType, LocalCertificate, MatchedCertificate};
use crate::portal::CertificateSource;

/// Drops certificates that are not valid at `now` and collapses duplicates.
///
/// Duplicates share a common name and team; the one expiring last is kept.
pub fn filter_valid_certificates(
    certificates: Vec<LocalCertificate>,
    now: DateTime<Utc>,
) -> Vec<LocalCertificate> {
    let mut kept: Vec<LocalCertificate> = Vec::new();

    for certificate in certificates {
        if !certificate.is_valid_at(now) {
            tracing::debug!("Ignoring certificate not valid now: {}", certificate);
            continue;
        }

        let duplicate = kept.iter_mut().find(|existing| {
            existing.common_name == certificate.common_name
                && existing.team_id == certificate.team_id
        });
        match duplicate {
            Some(existing) => {
                tracing::debug!("Ignoring duplicated certificate: {}", certificate.common_name);
                if certificate.not_after > existing.not_after {
                    *existing = certificate;
                }
            }
            None => kept.push(certificate),
        }
    }

    kept
}

/// Splits certificates into development and distribution buckets.
pub fn certificates_by_type(
    certificates: Vec<LocalCertificate>,
) -> HashMap<CertificateType, Vec<LocalCertificate>> {
    let mut by_type: HashMap<CertificateType, Vec<LocalCertificate>> = HashMap::new();
    for certificate in certificates {
        by_type
            .entry(certificate.certificate_type())
            .or_default()
            .push(certificate);
    }
    by_type
}

fn filter_by_team(certificates: Vec<LocalCertificate>, team_id: &str) -> Vec<LocalCertificate> {
    if team_id.is_empty() {
        return certificates;
    }
    certificates
        .into_iter()
        .filter(|certificate| {
            let same_team = certificate.team_id == team_id;
            if !same_team {
                tracing::debug!(
                    "Ignoring certificate of team {}: {}",
                    certificate.team_id,
                    certificate.common_name
                );
            }
            same_team
        })
        .collect()
}

/// Pairs each local certificate with its portal record by serial number.
///
/// Certificates unknown to the portal are dropped with a warning.
pub async fn match_certificates(
    source: &dyn CertificateSource,
    certificates: Vec<LocalCertificate>,
) -> Result<Vec<MatchedCertificate>> {
    let mut matched = Vec::new();

    for certificate in certificates {
        match source
            .query_certificate_by_serial(&certificate.serial_number)
            .await?
        {
            Some(portal) => {
                tracing::debug!("Certificate {} matches portal ID {}", certificate.common_name, portal.id);
                matched.push(MatchedCertificate {
                    certificate,
                    id: portal.id,
                });
            }
            None => {
                tracing::warn!(
                    "Certificate is not present on the Developer Portal, skipping: {}",
                    certificate
                );
            }
        }
    }

    Ok(matched)
}

async fn log_all_portal_certificates(source: &dyn CertificateSource) {
    match source.query_all_certificates().await {
        Ok(by_type) => {
            let ordered: BTreeMap<_, _> = by_type.iter().collect();
            for (certificate_type, certificates) in ordered {
                tracing::debug!("{} certificates on the Developer Portal:", certificate_type);
                for certificate in certificates {
                    tracing::debug!(
                        "- {} (serial {}, ID {})",
                        certificate.name,
                        certificate.serial_number,
                        certificate.id
                    );
                }
            }
        }
        Err(e) => tracing::debug!("Failed to list Developer Portal certificates: {}", e),
    }
}

/// Resolves the usable certificates for each requested certificate type.
///
/// `required` maps each type the run asks for to whether it is mandatory.
/// Only types with at least one match appear in the result; a mandatory type
/// with no match fails with `MissingCertificate`.
pub async fn get_valid_certificates(
    local: Vec<LocalCertificate>,
    source: &dyn CertificateSource,
    required: &BTreeMap<CertificateType, bool>,
    team_id: &str,
    verbose: bool,
    now: DateTime<Utc>,
) -> Result<HashMap<CertificateType, Vec<MatchedCertificate>>> {
    let mut local_by_type = certificates_by_type(filter_valid_certificates(local, now));

    if verbose {
        log_all_portal_certificates(source).await;
    }

    let mut valid = HashMap::new();
    for (&certificate_type, &is_required) in required {
        let candidates = filter_by_team(
            local_by_type.remove(&certificate_type).unwrap_or_default(),
            team_id,
        );
        let matched = match_certificates(source, candidates).await?;

        if matched.is_empty() {
            if is_required {
                return Err(AutosignError::MissingCertificate {
                    certificate_type,
                    team_id: team_id.to_string(),
                });
            }
            tracing::debug!("No {} certificate available, continuing without it", certificate_type);
            continue;
        }

        tracing::info!("{} {} certificate(s) usable:", matched.len(), certificate_type);
        for certificate in &matched {
            tracing::info!("- {}", certificate.certificate.common_name);
        }
        valid.insert(certificate_type, matched);
    }

    Ok(valid)
}

/// Matches certificates for a run and decides which distribution types to
/// reconcile.
///
/// Non-development runs also pick up development certificates, which are
/// mandatory only when UI-test targets are signed. Development is dropped
/// from the distribution list when no development certificate matched.
pub async fn select_certificates_and_distribution_types(
    source: &dyn CertificateSource,
    local: Vec<LocalCertificate>,
    distribution: DistributionType,
    team_id: &str,
    sign_ui_test_targets: bool,
    verbose: bool,
    now: DateTime<Utc>,
) -> Result<(
    HashMap<CertificateType, Vec<MatchedCertificate>>,
    Vec<DistributionType>,
)> {
    let mut distribution_types = vec![distribution];
    let mut required = BTreeMap::from([(distribution.certificate_type(), true)]);

    if distribution != DistributionType::Development {
        distribution_types.push(DistributionType::Development);
        required.insert(CertificateType::Development, sign_ui_test_targets);
    }

    let by_type = match get_valid_certificates(local, source, &required, team_id, verbose, now).await
    {
        Ok(by_type) => by_type,
        Err(AutosignError::MissingCertificate {
            certificate_type,
            team_id,
        }) => {
            tracing::warn!("Maybe you forgot to provide a(n) {} type certificate.", certificate_type);
            tracing::warn!("Upload a {} type certificate (.p12) to continue.", certificate_type);
            return Err(AutosignError::MissingCertificate {
                certificate_type,
                team_id,
            });
        }
        Err(e) => return Err(e),
    };

    if by_type.len() == 1 && distribution != DistributionType::Development {
        distribution_types = vec![distribution];
    }

    Ok((by_type, distribution_types))
}
