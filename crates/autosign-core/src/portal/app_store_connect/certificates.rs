use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CertificateType, PortalCertificate, normalize_serial};
use crate::portal::CertificateSource;

use super::client::{AppStoreConnectClient, PAGE_LIMIT};
use super::models::{CertificateAttributes, Resource};

const IOS_CERTIFICATE_TYPES: &str = "IOS_DEVELOPMENT,DEVELOPMENT,IOS_DISTRIBUTION,DISTRIBUTION";

#[async_trait]
impl CertificateSource for AppStoreConnectClient {
    async fn query_certificate_by_serial(&self, serial: &str) -> Result<Option<PortalCertificate>> {
        let url = self.url(
            "certificates",
            &[("filter[serialNumber]", serial), ("limit", PAGE_LIMIT)],
        )?;
        let resources: Vec<Resource<CertificateAttributes>> = self.get_all(url).await?;

        let serial = normalize_serial(serial);
        Ok(resources
            .into_iter()
            .filter_map(Resource::into_certificate)
            .find(|certificate| certificate.serial_number == serial))
    }

    async fn query_all_certificates(
        &self,
    ) -> Result<HashMap<CertificateType, Vec<PortalCertificate>>> {
        let url = self.url(
            "certificates",
            &[
                ("filter[certificateType]", IOS_CERTIFICATE_TYPES),
                ("limit", PAGE_LIMIT),
            ],
        )?;
        let resources: Vec<Resource<CertificateAttributes>> = self.get_all(url).await?;

        let mut by_type: HashMap<CertificateType, Vec<PortalCertificate>> = HashMap::new();
        for certificate in resources.into_iter().filter_map(Resource::into_certificate) {
            by_type
                .entry(certificate.certificate_type)
                .or_default()
                .push(certificate);
        }
        Ok(by_type)
    }
}
