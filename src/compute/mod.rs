// Workstation provisioning adapter.
//
// Talks to a GCE-shaped compute REST API: insert an instance, poll the zone
// operation until DONE, then describe the instance for its address. The wire
// surface is the small slice the workflows need, behind the `ComputeApi`
// trait so tests substitute a fake.

pub mod client;
pub mod instances;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{
    ComputeApi, HttpComputeClient, InstanceInfo, InstanceSpec, OperationHandle, OperationStatus,
};
pub use instances::{ProvisionPhase, Workstation, WorkstationProvisioner, WorkstationRequest};

/// Provisioning boundary consumed by the job runner.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a workstation and block until it is ready or failed.
    async fn provision(
        &self,
        request: &WorkstationRequest<'_>,
    ) -> Result<Workstation, ProvisioningError>;
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Request never completed (connect failure, request timeout).
    #[error("compute API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP response from the compute API.
    #[error("compute API returned HTTP {status} during {operation}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not match the expected shape.
    #[error("could not decode compute API response during {operation}: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },

    /// The create operation finished with an error payload.
    #[error("instance creation failed: {0}")]
    OperationFailed(String),

    /// Poll budget exhausted before the operation reached DONE.
    #[error("operation {operation} still pending after {attempts} status checks")]
    PollTimeout { operation: String, attempts: u32 },

    /// Instance exists but exposes no usable network address.
    #[error("instance {name} has no reachable network address")]
    NoAddress { name: String },
}
