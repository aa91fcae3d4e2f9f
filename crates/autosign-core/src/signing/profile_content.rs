//! Provisioning profile content parsing.
//!
//! Profile content is a CMS-signed property list. The embedded XML plist is
//! located directly in the envelope bytes, so no CMS decoding is needed to
//! read it.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::entitlements::Entitlements;
use crate::error::{AutosignError, Result};

const PLIST_START: &[u8] = b"<?xml ";
const PLIST_END: &[u8] = b"</plist>";

/// Metadata embedded in a provisioning profile.
#[derive(Debug, Clone)]
pub struct ProfileContent {
    pub name: String,
    pub uuid: String,
    pub team_id: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub entitlements: Entitlements,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Returns the XML property list embedded in signed profile content.
pub fn extract_plist(data: &[u8]) -> Result<&[u8]> {
    let start = find(data, PLIST_START)
        .ok_or_else(|| AutosignError::ProfileContent("no embedded property list".to_string()))?;
    let end = find(&data[start..], PLIST_END)
        .map(|offset| start + offset + PLIST_END.len())
        .ok_or_else(|| AutosignError::ProfileContent("unterminated property list".to_string()))?;
    Ok(&data[start..end])
}

/// Parses signed profile content.
pub fn parse_profile_content(data: &[u8]) -> Result<ProfileContent> {
    let plist: plist::Value = plist::from_bytes(extract_plist(data)?)?;
    let dict = plist
        .as_dictionary()
        .ok_or_else(|| AutosignError::ProfileContent("property list is not a dictionary".to_string()))?;

    let uuid = dict
        .get("UUID")
        .and_then(|v| v.as_string())
        .ok_or_else(|| AutosignError::ProfileContent("profile missing UUID".to_string()))?
        .to_string();

    let name = dict
        .get("Name")
        .and_then(|v| v.as_string())
        .unwrap_or_default()
        .to_string();

    let team_id = dict
        .get("TeamIdentifier")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());

    let expiration_date = dict
        .get("ExpirationDate")
        .and_then(|v| v.as_date())
        .and_then(|d| {
            let system_time: SystemTime = d.clone().into();
            system_time
                .duration_since(SystemTime::UNIX_EPOCH)
                .ok()
                .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, 0))
        });

    let entitlements = dict
        .get("Entitlements")
        .and_then(|v| v.as_dictionary())
        .cloned()
        .map(Entitlements::from_dictionary)
        .unwrap_or_default();

    Ok(ProfileContent {
        name,
        uuid,
        team_id,
        expiration_date,
        entitlements,
    })
}

/// Entitlements granted by a profile.
pub fn parse_profile_entitlements(data: &[u8]) -> Result<Entitlements> {
    Ok(parse_profile_content(data)?.entitlements)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Name</key>
    <string>Bitrise iOS development - (com.acme.app)</string>
    <key>UUID</key>
    <string>3F2504E0-4F89-11D3-9A0C-0305E82C3301</string>
    <key>TeamIdentifier</key>
    <array>
        <string>ABCDE12345</string>
    </array>
    <key>ExpirationDate</key>
    <date>2030-01-01T00:00:00Z</date>
    <key>Entitlements</key>
    <dict>
        <key>application-identifier</key>
        <string>ABCDE12345.com.acme.app</string>
        <key>com.apple.developer.icloud-container-identifiers</key>
        <array>
            <string>iCloud.com.acme.app</string>
        </array>
    </dict>
</dict>
</plist>"#;

    fn signed(plist: &str) -> Vec<u8> {
        let mut data = vec![0x30, 0x82, 0x0f, 0x1a, 0x06, 0x09];
        data.extend_from_slice(plist.as_bytes());
        data.extend_from_slice(&[0xa0, 0x82, 0x03, 0x00, 0x00]);
        data
    }

    #[test]
    fn test_extract_plist_strips_envelope() {
        let data = signed(PROFILE_PLIST);
        let plist = extract_plist(&data).unwrap();
        assert!(plist.starts_with(b"<?xml "));
        assert!(plist.ends_with(b"</plist>"));
    }

    #[test]
    fn test_parse_profile_content() {
        let content = parse_profile_content(&signed(PROFILE_PLIST)).unwrap();
        assert_eq!(content.uuid, "3F2504E0-4F89-11D3-9A0C-0305E82C3301");
        assert_eq!(content.team_id.as_deref(), Some("ABCDE12345"));
        assert_eq!(
            content.expiration_date,
            DateTime::from_timestamp(1_893_456_000, 0)
        );
        assert_eq!(
            content.entitlements.container_identifiers().unwrap(),
            vec!["iCloud.com.acme.app".to_string()]
        );
    }

    #[test]
    fn test_missing_plist_is_an_error() {
        assert!(matches!(
            parse_profile_content(b"garbage"),
            Err(AutosignError::ProfileContent(_))
        ));
    }
}
