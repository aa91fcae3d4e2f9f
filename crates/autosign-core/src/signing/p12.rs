//! PKCS#12 signing certificates.
//!
//! Certificates are fetched from `file://`, `http(s)://` URLs or plain paths
//! and inspected with the `openssl` CLI, since the OpenSSL/native-tls crates
//! have complex APIs for p12 handling.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use url::Url;

use crate::error::{AutosignError, Result};
use crate::models::{LocalCertificate, Pkcs12Identity, normalize_serial};

/// Environment variable used to hand the passphrase to `openssl`.
const PASSPHRASE_ENV: &str = "AUTOSIGN_P12_PASSPHRASE";
const DOWNLOAD_ATTEMPTS: u32 = 2;
const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Where to fetch one certificate from, and how to open it.
#[derive(Debug, Clone)]
pub struct CertificateSpec {
    pub url: String,
    pub passphrase: SecretString,
}

/// Pairs `|`-separated certificate URLs with `|`-separated passphrases.
pub fn parse_certificate_specs(urls: &str, passphrases: &str) -> Result<Vec<CertificateSpec>> {
    let urls: Vec<&str> = urls.split('|').map(str::trim).collect();
    let passphrases: Vec<&str> = passphrases.split('|').collect();

    if urls.iter().any(|url| url.is_empty()) {
        return Err(AutosignError::Configuration(
            "certificate URL list contains an empty entry".to_string(),
        ));
    }
    if urls.len() != passphrases.len() {
        return Err(AutosignError::Configuration(format!(
            "certificate count ({}) and passphrase count ({}) should match",
            urls.len(),
            passphrases.len()
        )));
    }

    Ok(urls
        .into_iter()
        .zip(passphrases)
        .map(|(url, passphrase)| CertificateSpec {
            url: url.to_string(),
            passphrase: SecretString::from(passphrase.to_string()),
        })
        .collect())
}

/// Downloads certificate bytes.
pub async fn download_certificate(http: &reqwest::Client, location: &str) -> Result<Vec<u8>> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => {
            let path = url.to_file_path().map_err(|_| {
                AutosignError::Configuration(format!("invalid file URL: {}", location))
            })?;
            Ok(tokio::fs::read(path).await?)
        }
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            let mut attempt = 1;
            loop {
                let result = async {
                    let response = http.get(url.clone()).send().await?.error_for_status()?;
                    Ok::<_, reqwest::Error>(response.bytes().await?.to_vec())
                }
                .await;
                match result {
                    Ok(bytes) => return Ok(bytes),
                    Err(e) if attempt < DOWNLOAD_ATTEMPTS => {
                        tracing::warn!("Download of {} failed: {}, retrying", url.path(), e);
                        tokio::time::sleep(DOWNLOAD_RETRY_DELAY).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(url) => Err(AutosignError::Configuration(format!(
            "unsupported certificate URL scheme: {}",
            url.scheme()
        ))),
        Err(_) => Ok(tokio::fs::read(location).await?),
    }
}

/// Downloads and parses every configured certificate.
pub async fn load_local_certificates(
    http: &reqwest::Client,
    specs: &[CertificateSpec],
) -> Result<Vec<LocalCertificate>> {
    let mut certificates = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let data = download_certificate(http, &spec.url).await?;
        let certificate = parse_p12_certificate(data, spec.passphrase.clone()).await?;
        tracing::debug!("Certificate {}: {}", index + 1, certificate);
        certificates.push(certificate);
    }
    Ok(certificates)
}

/// Parses a p12 bundle into a local certificate carrying its identity.
pub async fn parse_p12_certificate(data: Vec<u8>, passphrase: SecretString) -> Result<LocalCertificate> {
    let pem = extract_certificate_pem(&data, &passphrase).await?;

    let mut child = Command::new("openssl")
        .args([
            "x509",
            "-noout",
            "-nameopt",
            "RFC2253",
            "-subject",
            "-serial",
            "-startdate",
            "-enddate",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AutosignError::Signing(format!("Failed to spawn openssl: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&pem)
            .await
            .map_err(|e| AutosignError::Signing(format!("Failed to write to openssl stdin: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| AutosignError::Signing(format!("Failed to wait for openssl: {}", e)))?;
    if !output.status.success() {
        return Err(AutosignError::Signing(format!(
            "Failed to read certificate: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let info = parse_certificate_info(&String::from_utf8_lossy(&output.stdout))?;
    Ok(LocalCertificate {
        common_name: info.common_name,
        team_id: info.team_id,
        team_name: info.team_name,
        serial_number: info.serial_number,
        not_before: info.not_before,
        not_after: info.not_after,
        identity: Some(Arc::new(Pkcs12Identity { data, passphrase })),
    })
}

/// Extracts the PEM certificate from a p12 bundle, retrying with the legacy
/// provider for bundles using algorithms OpenSSL 3 disables by default.
async fn extract_certificate_pem(data: &[u8], passphrase: &SecretString) -> Result<Vec<u8>> {
    let temp_dir = tempfile::tempdir()
        .map_err(|e| AutosignError::Signing(format!("Failed to create temp directory: {}", e)))?;
    let p12_path = temp_dir.path().join("cert.p12");
    tokio::fs::write(&p12_path, data)
        .await
        .map_err(|e| AutosignError::Signing(format!("Failed to write temp p12 file: {}", e)))?;

    let mut last_error = String::new();
    for legacy in [false, true] {
        let mut command = Command::new("openssl");
        command
            .arg("pkcs12")
            .arg("-in")
            .arg(&p12_path)
            .args(["-passin", &format!("env:{}", PASSPHRASE_ENV), "-nokeys", "-nodes"])
            .env(PASSPHRASE_ENV, passphrase.expose_secret())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if legacy {
            command.arg("-legacy");
        }

        let output = command
            .output()
            .await
            .map_err(|e| AutosignError::Signing(format!("Failed to run openssl: {}", e)))?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        last_error = String::from_utf8_lossy(&output.stderr).to_string();
    }

    Err(AutosignError::Signing(format!(
        "Failed to parse p12 certificate (wrong passphrase?): {}",
        last_error.trim()
    )))
}

#[derive(Debug)]
struct CertificateInfo {
    common_name: String,
    team_id: String,
    team_name: String,
    serial_number: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

/// Parses `openssl x509 -nameopt RFC2253 -subject -serial -startdate -enddate` output.
fn parse_certificate_info(output: &str) -> Result<CertificateInfo> {
    let mut common_name = None;
    let mut team_id = None;
    let mut team_name = None;
    let mut serial_number = None;
    let mut not_before = None;
    let mut not_after = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(subject) = line.strip_prefix("subject=") {
            for (key, value) in parse_subject(subject) {
                match key.as_str() {
                    "CN" => common_name = Some(value),
                    "OU" => team_id = Some(value),
                    "O" => team_name = Some(value),
                    _ => {}
                }
            }
        } else if let Some(serial) = line.strip_prefix("serial=") {
            serial_number = Some(normalize_serial(serial));
        } else if let Some(date) = line.strip_prefix("notBefore=") {
            not_before = parse_openssl_date(date);
        } else if let Some(date) = line.strip_prefix("notAfter=") {
            not_after = parse_openssl_date(date);
        }
    }

    let missing = |field: &str| AutosignError::Signing(format!("certificate has no {}", field));
    Ok(CertificateInfo {
        common_name: common_name.ok_or_else(|| missing("common name"))?,
        team_id: team_id.ok_or_else(|| missing("team ID (OU)"))?,
        team_name: team_name.unwrap_or_default(),
        serial_number: serial_number.ok_or_else(|| missing("serial number"))?,
        not_before: not_before.ok_or_else(|| missing("valid start date"))?,
        not_after: not_after.ok_or_else(|| missing("expiry date"))?,
    })
}

/// Splits an RFC 2253 distinguished name into attribute pairs, honouring
/// backslash escapes.
fn parse_subject(subject: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = subject.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' | '+' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses dates like `Jan  1 00:00:00 2025 GMT`.
fn parse_openssl_date(value: &str) -> Option<DateTime<Utc>> {
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|date| DateTime::from_naive_utc_and_offset(date, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_parse_certificate_specs() {
        let specs = parse_certificate_specs("file:///a.p12|https://x/b.p12", "one|").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].url, "file:///a.p12");
        assert_eq!(specs[0].passphrase.expose_secret(), "one");
        assert_eq!(specs[1].passphrase.expose_secret(), "");
    }

    #[test]
    fn test_parse_certificate_specs_count_mismatch() {
        let result = parse_certificate_specs("file:///a.p12|file:///b.p12", "only-one");
        assert!(matches!(result, Err(AutosignError::Configuration(_))));
    }

    #[test]
    fn test_parse_subject_with_escapes() {
        let pairs = parse_subject(
            r"UID=X1,CN=Apple Distribution: Acme\, Inc. (ABCDE12345),OU=ABCDE12345,O=Acme\, Inc.,C=US",
        );
        assert!(pairs.contains(&("CN".to_string(), "Apple Distribution: Acme, Inc. (ABCDE12345)".to_string())));
        assert!(pairs.contains(&("OU".to_string(), "ABCDE12345".to_string())));
        assert!(pairs.contains(&("O".to_string(), "Acme, Inc.".to_string())));
    }

    #[test]
    fn test_parse_openssl_date() {
        let date = parse_openssl_date("Jan  1 00:00:00 2025 GMT").unwrap();
        assert_eq!(date, DateTime::from_timestamp(1_735_689_600, 0).unwrap());
        assert!(parse_openssl_date("2025-01-01").is_none());
    }

    #[test]
    fn test_parse_certificate_info() {
        let output = "subject=CN=Apple Development: Jane Doe (XYZ9876543),OU=ABCDE12345,O=Acme Inc,C=US\n\
                      serial=0A1B2C3D\n\
                      notBefore=Mar 10 12:00:00 2024 GMT\n\
                      notAfter=Mar 10 12:00:00 2025 GMT\n";
        let info = parse_certificate_info(output).unwrap();
        assert_eq!(info.common_name, "Apple Development: Jane Doe (XYZ9876543)");
        assert_eq!(info.team_id, "ABCDE12345");
        assert_eq!(info.team_name, "Acme Inc");
        assert_eq!(info.serial_number, "A1B2C3D");
        assert!(info.not_before < info.not_after);
    }

    #[test]
    fn test_parse_certificate_info_requires_common_name() {
        let output = "subject=OU=ABCDE12345\nserial=01\nnotBefore=Mar 10 12:00:00 2024 GMT\nnotAfter=Mar 10 12:00:00 2025 GMT\n";
        assert!(parse_certificate_info(output).is_err());
    }

    #[tokio::test]
    async fn test_download_certificate_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.p12");
        std::fs::write(&path, b"p12-bytes").unwrap();

        let http = reqwest::Client::new();
        let url = Url::from_file_path(&path).unwrap();
        let data = download_certificate(&http, url.as_str()).await.unwrap();
        assert_eq!(data, b"p12-bytes");

        let data = download_certificate(&http, path.to_str().unwrap()).await.unwrap();
        assert_eq!(data, b"p12-bytes");
    }
}
