//! EC2 inventory through the AWS SDK.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{Filter, Instance, Volume};
use aws_sdk_ec2::Client;
use fleet_interfaces::{
    CollaboratorError, CollaboratorResult, InventoryQuery, ResourceRecord, ResourceState,
    VolumeAttachment, VolumeRecord,
};
use tracing::debug;

/// Queries EC2 with `DescribeInstances` and `DescribeVolumes`.
///
/// Instances are selected with an `instance-id` filter rather than by id,
/// so unknown ids are absent from the answer instead of failing the call.
#[derive(Debug, Clone)]
pub struct Ec2Inventory {
    client: Client,
    timeout: Duration,
}

impl Ec2Inventory {
    /// Load credentials and settings from the default provider chain.
    /// `region` overrides the environment's region when set.
    pub async fn load(region: Option<String>, timeout: Duration) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let shared_config = loader.load().await;
        Self::from_client(Client::new(&shared_config), timeout)
    }

    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn error<E>(&self, operation: &str, err: SdkError<E>) -> CollaboratorError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let program = format!("ec2 {operation}");
        match &err {
            SdkError::TimeoutError(_) => CollaboratorError::Timeout {
                program,
                limit_secs: self.timeout.as_secs(),
            },
            SdkError::DispatchFailure(_) => {
                CollaboratorError::Unavailable(format!("{program}: {}", DisplayErrorContext(&err)))
            }
            SdkError::ServiceError(_) => CollaboratorError::Rejected {
                operation: program,
                code: err.code().unwrap_or("Unknown").to_string(),
                message: err.message().unwrap_or_default().to_string(),
            },
            _ => CollaboratorError::Unavailable(format!("{program}: {}", DisplayErrorContext(&err))),
        }
    }
}

#[async_trait]
impl InventoryQuery for Ec2Inventory {
    async fn describe_resources(&self, ids: &[String]) -> CollaboratorResult<Vec<ResourceRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::builder()
            .name("instance-id")
            .set_values(Some(ids.to_vec()))
            .build();

        let mut records = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .client
                .describe_instances()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| self.error("DescribeInstances", e))?;
            records.extend(
                page.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .filter_map(resource_record),
            );
            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        debug!(requested = ids.len(), found = records.len(), "described instances");
        Ok(records)
    }

    async fn describe_volumes_by_attachment(
        &self,
        resource_id: &str,
    ) -> CollaboratorResult<Vec<VolumeRecord>> {
        let filter = Filter::builder()
            .name("attachment.instance-id")
            .values(resource_id)
            .build();

        let mut volumes = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .client
                .describe_volumes()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| self.error("DescribeVolumes", e))?;
            volumes.extend(page.volumes().iter().filter_map(volume_record));
            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        debug!(resource = %resource_id, volumes = volumes.len(), "described volumes");
        Ok(volumes)
    }
}

/// Map an SDK instance onto a [`ResourceRecord`]; `None` without an id.
pub fn resource_record(instance: &Instance) -> Option<ResourceRecord> {
    let id = instance.instance_id()?;
    let state = instance
        .state()
        .and_then(|s| s.name())
        .map_or(ResourceState::Other("unknown".to_string()), |name| {
            ResourceState::from_name(name.as_str())
        });
    let tags = instance
        .tags()
        .iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
        .collect::<BTreeMap<_, _>>();

    Some(ResourceRecord {
        id: id.to_string(),
        state,
        root_device: instance.root_device_name().map(str::to_string),
        compute_class: instance.instance_type().map(|t| t.as_str().to_string()),
        public_address: instance.public_ip_address().map(str::to_string),
        private_address: instance.private_ip_address().map(str::to_string),
        tags,
    })
}

/// Map an SDK volume onto a [`VolumeRecord`]; `None` without an id.
pub fn volume_record(volume: &Volume) -> Option<VolumeRecord> {
    let attachments = volume
        .attachments()
        .iter()
        .filter_map(|a| {
            Some(VolumeAttachment {
                resource_id: a.instance_id()?.to_string(),
                device: a.device()?.to_string(),
            })
        })
        .collect();

    Some(VolumeRecord {
        id: volume.volume_id()?.to_string(),
        volume_class: volume
            .volume_type()
            .map_or_else(|| "unknown".to_string(), |t| t.as_str().to_string()),
        attachments,
    })
}
