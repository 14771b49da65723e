use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ComputeConfig;

use super::ProvisioningError;

/// Instance creation request body, GCE wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub name: String,
    pub machine_type: String,
    pub disks: Vec<AttachedDisk>,
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
    pub metadata: Metadata,
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    pub boot: bool,
    pub auto_delete: bool,
    pub initialize_params: DiskInitializeParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInitializeParams {
    pub source_image: String,
    pub disk_size_gb: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    pub network: String,
    pub subnetwork: String,
    pub access_configs: Vec<AccessConfigSpec>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfigSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tags {
    pub items: Vec<String>,
}

/// Handle returned by an instance insert; names the zone operation to poll.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationHandle {
    pub name: String,
}

/// Zone operation status snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<OperationErrorBody>,
}

impl OperationStatus {
    pub fn is_done(&self) -> bool {
        self.status == "DONE"
    }

    /// Flattened error messages, empty when the operation succeeded.
    pub fn error_summary(&self) -> Option<String> {
        let body = self.error.as_ref()?;
        if body.errors.is_empty() {
            return Some("operation reported an error with no detail".to_string());
        }
        Some(
            body.errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationErrorBody {
    #[serde(default)]
    pub errors: Vec<OperationErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Instance description, reduced to what the workflow needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub name: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceInfo {
    #[serde(default)]
    pub network_i_p: Option<String>,
    #[serde(default)]
    pub access_configs: Vec<AccessConfigInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfigInfo {
    #[serde(default)]
    pub nat_i_p: Option<String>,
}

impl InstanceInfo {
    /// External NAT address when present, internal address otherwise.
    pub fn address(&self) -> Option<&str> {
        let nic = self.network_interfaces.first()?;
        nic.access_configs
            .iter()
            .find_map(|ac| ac.nat_i_p.as_deref())
            .or(nic.network_i_p.as_deref())
    }
}

/// Compute REST boundary used by the provisioner.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Latest image self-link for a family.
    async fn image_from_family(
        &self,
        project: &str,
        family: &str,
    ) -> Result<String, ProvisioningError>;

    /// Issue the instance insert; returns the zone operation handle.
    async fn insert_instance(&self, spec: &InstanceSpec)
        -> Result<OperationHandle, ProvisioningError>;

    /// One status check of a zone operation.
    async fn get_operation(&self, operation: &str) -> Result<OperationStatus, ProvisioningError>;

    /// Describe an instance by name.
    async fn get_instance(&self, name: &str) -> Result<InstanceInfo, ProvisioningError>;
}

/// reqwest-backed compute client. Constructed once per run and shared across
/// records; never cached process-wide.
pub struct HttpComputeClient {
    http: reqwest::Client,
    api_base: String,
    project: String,
    zone: String,
}

impl HttpComputeClient {
    pub fn new(config: &ComputeConfig) -> Result<Self, ProvisioningError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            zone: config.zone.clone(),
        })
    }

    fn zone_url(&self, suffix: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            self.api_base, self.project, self.zone, suffix
        )
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, ProvisioningError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProvisioningError::Api {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ProvisioningError::Decode {
            operation,
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl ComputeApi for HttpComputeClient {
    async fn image_from_family(
        &self,
        project: &str,
        family: &str,
    ) -> Result<String, ProvisioningError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ImageRef {
            self_link: String,
        }

        let url = format!(
            "{}/projects/{}/global/images/family/{}",
            self.api_base, project, family
        );
        let response = self.http.get(url).send().await?;
        let image: ImageRef = Self::decode(response, "image lookup").await?;
        Ok(image.self_link)
    }

    async fn insert_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<OperationHandle, ProvisioningError> {
        let response = self
            .http
            .post(self.zone_url("instances"))
            .json(spec)
            .send()
            .await?;
        Self::decode(response, "instance insert").await
    }

    async fn get_operation(&self, operation: &str) -> Result<OperationStatus, ProvisioningError> {
        let response = self
            .http
            .get(self.zone_url(&format!("operations/{operation}")))
            .send()
            .await?;
        Self::decode(response, "operation poll").await
    }

    async fn get_instance(&self, name: &str) -> Result<InstanceInfo, ProvisioningError> {
        let response = self
            .http
            .get(self.zone_url(&format!("instances/{name}")))
            .send()
            .await?;
        Self::decode(response, "instance describe").await
    }
}
