use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ComputeConfig;

use async_trait::async_trait;

use super::client::{
    AccessConfigSpec, AttachedDisk, ComputeApi, DiskInitializeParams, InstanceSpec, Metadata,
    MetadataItem, NetworkInterfaceSpec, Tags,
};
use super::{Provisioner, ProvisioningError};

/// Phases a single provisioning operation moves through.
///
/// `Requested -> Creating -> Polling -> Ready | Failed`, no other edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    Requested,
    Creating,
    Polling,
    Ready,
    Failed,
}

/// What the onboarding workflow asks for.
#[derive(Debug, Clone)]
pub struct WorkstationRequest<'a> {
    pub employee_id: i64,
    pub department: &'a str,
    pub username: &'a str,
    pub temp_password: &'a str,
}

/// A ready workstation: the resource handle the rest of the workflow needs.
#[derive(Debug, Clone)]
pub struct Workstation {
    pub instance_name: String,
    pub address: String,
}

/// Applications preinstalled per department. Unknown departments get no
/// bundle; the workstation still provisions.
pub fn application_bundle(department: &str) -> &'static [&'static str] {
    match department.trim().to_ascii_lowercase().as_str() {
        "engineering" => &["vscode", "git", "docker-desktop"],
        "finance" => &["excel-addins", "sap-gui"],
        "hr" => &["workday-client"],
        _ => &[],
    }
}

/// Instance names must be DNS-compatible. Underscores still get mapped to
/// dashes; early portal versions used text ids.
pub fn instance_name_for(employee_id: i64) -> String {
    format!("hr-ws-{employee_id}").replace('_', "-")
}

fn startup_script(username: &str, temp_password: &str) -> String {
    format!(
        r#"<powershell>
$u = "{username}"
$p = "{temp_password}"
net user $u $p /add
net localgroup "Remote Desktop Users" $u /add
</powershell>
"#
    )
}

/// Drives one workstation from request to a resolved network address.
///
/// Borrows the per-run compute client; nothing here outlives the run.
pub struct WorkstationProvisioner<'a, C: ComputeApi> {
    api: &'a C,
    config: &'a ComputeConfig,
}

impl<'a, C: ComputeApi> WorkstationProvisioner<'a, C> {
    pub fn new(api: &'a C, config: &'a ComputeConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl<C: ComputeApi> Provisioner for WorkstationProvisioner<'_, C> {
    /// Full creation sequence: resolve image, insert, poll to DONE, resolve
    /// the address. Every terminal failure maps to `ProvisioningError` and
    /// leaves the employee record untouched for a later retry.
    async fn provision(
        &self,
        request: &WorkstationRequest<'_>,
    ) -> Result<Workstation, ProvisioningError> {
        let mut phase = ProvisionPhase::Requested;
        let instance_name = instance_name_for(request.employee_id);

        let spec = self.build_spec(&instance_name, request).await?;
        phase = self.advance(phase, ProvisionPhase::Creating, &instance_name);

        info!(
            instance = %instance_name,
            zone = %self.config.zone,
            "Creating workstation instance"
        );
        let handle = self.api.insert_instance(&spec).await?;

        phase = self.advance(phase, ProvisionPhase::Polling, &instance_name);
        if let Err(e) = self.poll_operation(&handle.name).await {
            self.advance(phase, ProvisionPhase::Failed, &instance_name);
            return Err(e);
        }

        let described = self.api.get_instance(&instance_name).await?;
        let Some(address) = described.address() else {
            self.advance(phase, ProvisionPhase::Failed, &instance_name);
            return Err(ProvisioningError::NoAddress {
                name: instance_name,
            });
        };
        let address = address.to_string();

        self.advance(phase, ProvisionPhase::Ready, &instance_name);
        info!(instance = %instance_name, address = %address, "Workstation ready");

        Ok(Workstation {
            instance_name,
            address,
        })
    }
}

impl<C: ComputeApi> WorkstationProvisioner<'_, C> {
    async fn build_spec(
        &self,
        instance_name: &str,
        request: &WorkstationRequest<'_>,
    ) -> Result<InstanceSpec, ProvisioningError> {
        let source_image = self
            .api
            .image_from_family(&self.config.image_project, &self.config.image_family)
            .await?;

        let mut metadata_items = vec![MetadataItem {
            key: "windows-startup-script-ps1".to_string(),
            value: startup_script(request.username, request.temp_password),
        }];
        let bundle = application_bundle(request.department);
        if !bundle.is_empty() {
            metadata_items.push(MetadataItem {
                key: "application-bundle".to_string(),
                value: bundle.join(","),
            });
        }

        let region = region_of(&self.config.zone);
        Ok(InstanceSpec {
            name: instance_name.to_string(),
            machine_type: format!(
                "zones/{}/machineTypes/{}",
                self.config.zone, self.config.machine_type
            ),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                initialize_params: DiskInitializeParams {
                    source_image,
                    disk_size_gb: self.config.disk_size_gb.to_string(),
                },
            }],
            network_interfaces: vec![NetworkInterfaceSpec {
                network: format!(
                    "projects/{}/global/networks/{}",
                    self.config.project, self.config.network
                ),
                subnetwork: format!(
                    "projects/{}/regions/{}/subnetworks/{}",
                    self.config.project, region, self.config.subnetwork
                ),
                access_configs: vec![AccessConfigSpec {
                    kind: "ONE_TO_ONE_NAT".to_string(),
                    name: "External NAT".to_string(),
                }],
            }],
            metadata: Metadata {
                items: metadata_items,
            },
            tags: Tags {
                items: vec!["allow-rdp".to_string()],
            },
        })
    }

    /// Bounded status loop. The budget is the hard stop: exhausting it is a
    /// `PollTimeout`, never another lap.
    async fn poll_operation(&self, operation: &str) -> Result<(), ProvisioningError> {
        let interval = Duration::from_secs(self.config.poll_interval_seconds);

        for attempt in 1..=self.config.max_poll_attempts {
            let status = self.api.get_operation(operation).await?;
            if status.is_done() {
                if let Some(summary) = status.error_summary() {
                    warn!(operation, %summary, "Create operation finished with error");
                    return Err(ProvisioningError::OperationFailed(summary));
                }
                debug!(operation, attempt, "Create operation done");
                return Ok(());
            }

            debug!(operation, attempt, status = %status.status, "Operation still pending");
            tokio::time::sleep(interval).await;
        }

        Err(ProvisioningError::PollTimeout {
            operation: operation.to_string(),
            attempts: self.config.max_poll_attempts,
        })
    }

    fn advance(
        &self,
        from: ProvisionPhase,
        to: ProvisionPhase,
        instance: &str,
    ) -> ProvisionPhase {
        debug!(instance, ?from, ?to, "Provisioning phase transition");
        to
    }
}

/// "europe-west1-b" -> "europe-west1".
fn region_of(zone: &str) -> &str {
    zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone)
}

#[cfg(test)]
mod tests {
    use super::super::client::{InstanceInfo, OperationHandle, OperationStatus};
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn bundle_lookup_is_case_insensitive_with_default() {
        assert_eq!(
            application_bundle("Engineering"),
            &["vscode", "git", "docker-desktop"]
        );
        assert_eq!(application_bundle(" finance "), &["excel-addins", "sap-gui"]);
        assert!(application_bundle("warehouse").is_empty());
    }

    #[test]
    fn instance_names_use_dashes() {
        assert_eq!(instance_name_for(42), "hr-ws-42");
    }

    #[test]
    fn region_derived_from_zone() {
        assert_eq!(region_of("europe-west1-b"), "europe-west1");
        assert_eq!(region_of("weird"), "weird");
    }

    #[test]
    fn startup_script_embeds_credentials() {
        let script = startup_script("jan.devries", "Hunter2Hunter2");
        assert!(script.contains(r#"$u = "jan.devries""#));
        assert!(script.contains(r#"$p = "Hunter2Hunter2""#));
        assert!(script.contains("Remote Desktop Users"));
    }

    /// Fake API whose operation never reaches DONE.
    struct NeverDone {
        polls: AtomicU32,
    }

    #[async_trait]
    impl ComputeApi for NeverDone {
        async fn image_from_family(
            &self,
            _project: &str,
            _family: &str,
        ) -> Result<String, ProvisioningError> {
            Ok("projects/windows-cloud/global/images/windows-2019-v1".to_string())
        }

        async fn insert_instance(
            &self,
            _spec: &InstanceSpec,
        ) -> Result<OperationHandle, ProvisioningError> {
            Ok(OperationHandle {
                name: "operation-123".to_string(),
            })
        }

        async fn get_operation(
            &self,
            _operation: &str,
        ) -> Result<OperationStatus, ProvisioningError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(OperationStatus {
                status: "RUNNING".to_string(),
                error: None,
            })
        }

        async fn get_instance(&self, _name: &str) -> Result<InstanceInfo, ProvisioningError> {
            unreachable!("describe must not run for an unfinished operation")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_at_the_attempt_budget() {
        let api = NeverDone {
            polls: AtomicU32::new(0),
        };
        let config = ComputeConfig {
            max_poll_attempts: 7,
            poll_interval_seconds: 5,
            ..ComputeConfig::default()
        };
        let provisioner = WorkstationProvisioner::new(&api, &config);

        let request = WorkstationRequest {
            employee_id: 9,
            department: "engineering",
            username: "test.user",
            temp_password: "TempPass1234",
        };

        let err = provisioner.provision(&request).await.unwrap_err();
        match err {
            ProvisioningError::PollTimeout {
                operation,
                attempts,
            } => {
                assert_eq!(operation, "operation-123");
                assert_eq!(attempts, 7);
            }
            other => panic!("expected PollTimeout, got {other:?}"),
        }
        assert_eq!(api.polls.load(Ordering::SeqCst), 7);
    }
}
