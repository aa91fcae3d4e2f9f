use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crate::error::{AutosignError, Result};
use crate::models::{Device, DevicePlatform};
use crate::portal::DeviceClient;

use super::client::{AppStoreConnectClient, PAGE_LIMIT};
use super::models::{DeviceAttributes, Document, Resource};

#[async_trait]
impl DeviceClient for AppStoreConnectClient {
    async fn list_devices(
        &self,
        udid: Option<&str>,
        platform: DevicePlatform,
    ) -> Result<Vec<Device>> {
        let mut query = vec![
            ("filter[platform]", platform.as_str()),
            ("filter[status]", "ENABLED"),
            ("limit", PAGE_LIMIT),
        ];
        if let Some(udid) = udid {
            query.push(("filter[udid]", udid));
        }

        let url = self.url("devices", &query)?;
        let resources: Vec<Resource<DeviceAttributes>> = self.get_all(url).await?;
        Ok(resources.into_iter().map(Device::from).collect())
    }

    async fn register_device(
        &self,
        udid: &str,
        name: &str,
        platform: DevicePlatform,
    ) -> Result<Device> {
        let body = json!({
            "data": {
                "type": "devices",
                "attributes": {
                    "name": name,
                    "udid": udid,
                    "platform": platform.as_str(),
                }
            }
        });

        let url = self.url("devices", &[])?;
        match self.post::<Document<Resource<DeviceAttributes>>>(url, &body).await {
            Ok(document) => Ok(Device::from(document.data)),
            Err(AutosignError::Api { status, message }) if status == StatusCode::CONFLICT.as_u16() => {
                Err(AutosignError::DeviceRegistrationConflict {
                    udid: udid.to_string(),
                    reason: message,
                })
            }
            Err(e) => Err(e),
        }
    }
}
