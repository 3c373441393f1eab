//! HTTP workload store
//!
//! Talks to a Kubernetes-compatible API server. Pods are listed across all
//! namespaces and decision annotations are written with a strategic merge
//! patch that touches only `metadata.annotations`.

use async_trait::async_trait;
use gpuadm_core::{
    AdmissionSettings, AnnotationDelta, ContainerRequest, GpuadmError, GpuadmResult, StoreConfig,
    StoreError, StoreResult, Workload, WorkloadPhase,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::traits::WorkloadStore;

const MERGE_PATCH_CONTENT_TYPE: &str = "application/strategic-merge-patch+json";

/// Resource names used to read device requests from container specs
#[derive(Debug, Clone)]
pub struct ResourceNames {
    pub cores: String,
    pub memory: String,
}

impl From<&AdmissionSettings> for ResourceNames {
    fn from(settings: &AdmissionSettings) -> Self {
        Self {
            cores: settings.core_resource.clone(),
            memory: settings.memory_resource.clone(),
        }
    }
}

/// Workload store backed by an API server
pub struct HttpWorkloadStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    resources: ResourceNames,
}

impl HttpWorkloadStore {
    /// Create a new HTTP store
    pub fn new(config: &StoreConfig, resources: ResourceNames) -> GpuadmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GpuadmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let token = match (&config.token, &config.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => Some(std::fs::read_to_string(path)?.trim().to_string()),
            (None, None) => None,
        };

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            resources,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

}

#[async_trait]
impl WorkloadStore for HttpWorkloadStore {
    async fn list_all(&self) -> StoreResult<Vec<Workload>> {
        let url = self.url("/api/v1/pods");
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let list: PodList = response.json().await.map_err(map_transport_error)?;
        debug!(count = list.items.len(), "Listed pods");

        list.items
            .into_iter()
            .map(|pod| pod.into_workload(&self.resources))
            .collect()
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        delta: &AnnotationDelta,
    ) -> StoreResult<Workload> {
        let url = self.url(&format!("/api/v1/namespaces/{}/pods/{}", namespace, name));
        let body = serde_json::to_vec(&delta.to_merge_patch())
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let response = self
            .authorize(self.client.patch(&url))
            .header(reqwest::header::CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // A 2xx means the annotations are stored; a body we cannot read
        // must not turn the write into a failure.
        let body = response.bytes().await.unwrap_or_default();
        let decoded = serde_json::from_slice::<Pod>(&body)
            .map_err(|e| StoreError::Decode(e.to_string()))
            .and_then(|pod| pod.into_workload(&self.resources));

        match decoded {
            Ok(workload) => Ok(workload),
            Err(e) => {
                warn!(
                    namespace = namespace,
                    name = name,
                    error = %e,
                    "Patch applied but the response could not be decoded"
                );
                Ok(acknowledged(namespace, name, delta))
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Map an unsuccessful HTTP status to a store error
pub fn classify_status(status: StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<ApiStatus>(body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| format!("{}: {}", status, body.trim()));

    match status {
        StatusCode::CONFLICT => StoreError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => StoreError::TooManyRequests(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => StoreError::Timeout(message),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => StoreError::ServiceUnavailable(message),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => StoreError::Invalid(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(message),
        _ => StoreError::Other(message),
    }
}

fn map_transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Transport(err.to_string())
    }
}

/// Parse a resource quantity into a whole count
///
/// The API server writes quantities back in canonical form, so `1000`
/// comes back as `1k`. Decimal (`k`, `M`, `G`, `T`) and binary (`Ki`, `Mi`,
/// `Gi`, `Ti`) suffixes are accepted, and milli-units (`m`) when they add
/// up to a whole number.
fn parse_quantity(value: &str) -> Option<u32> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let base: u64 = digits.parse().ok()?;

    let amount = match suffix {
        "" => base,
        "m" if base % 1000 == 0 => base / 1000,
        "k" => base.checked_mul(1_000)?,
        "M" => base.checked_mul(1_000_000)?,
        "G" => base.checked_mul(1_000_000_000)?,
        "T" => base.checked_mul(1_000_000_000_000)?,
        "Ki" => base.checked_mul(1 << 10)?,
        "Mi" => base.checked_mul(1 << 20)?,
        "Gi" => base.checked_mul(1 << 30)?,
        "Ti" => base.checked_mul(1 << 40)?,
        _ => return None,
    };
    u32::try_from(amount).ok()
}

/// Workload as stored after an acknowledged patch whose response was unreadable
fn acknowledged(namespace: &str, name: &str, delta: &AnnotationDelta) -> Workload {
    let mut workload = Workload::new(namespace, name);
    workload.uid = Uuid::nil();
    delta.apply_to(&mut workload.annotations);
    workload
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    name: String,
    #[serde(default)]
    resources: ContainerResources,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerResources {
    #[serde(default)]
    limits: Option<HashMap<String, String>>,
    #[serde(default)]
    requests: Option<HashMap<String, String>>,
}

impl ContainerResources {
    /// Limits win over requests, matching how device plugins read them
    fn quantity(&self, pod: &str, resource: &str) -> StoreResult<u32> {
        let raw = self
            .limits
            .as_ref()
            .and_then(|l| l.get(resource))
            .or_else(|| self.requests.as_ref().and_then(|r| r.get(resource)));

        match raw {
            Some(value) => parse_quantity(value).ok_or_else(|| {
                StoreError::Decode(format!(
                    "pod {}: {} quantity {:?} is not a whole number",
                    pod, resource, value
                ))
            }),
            None => Ok(0),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

impl Pod {
    fn into_workload(self, resources: &ResourceNames) -> StoreResult<Workload> {
        let pod = format!("{}/{}", self.metadata.namespace, self.metadata.name);

        let uid = match self.metadata.uid.as_deref().map(Uuid::parse_str) {
            Some(Ok(uid)) => uid,
            Some(Err(e)) => {
                warn!(pod = %self.metadata.name, error = %e, "Pod has a malformed uid");
                Uuid::nil()
            }
            None => Uuid::nil(),
        };

        let phase = self
            .status
            .phase
            .as_deref()
            .map(|p| p.parse().unwrap_or(WorkloadPhase::Unknown))
            .unwrap_or(WorkloadPhase::Pending);

        let containers = self
            .spec
            .containers
            .into_iter()
            .map(|c| -> StoreResult<ContainerRequest> {
                Ok(ContainerRequest {
                    device_cores: c.resources.quantity(&pod, &resources.cores)?,
                    device_memory: c.resources.quantity(&pod, &resources.memory)?,
                    name: c.name,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Workload {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            uid,
            annotations: self.metadata.annotations.unwrap_or_default(),
            phase,
            node_name: self.spec.node_name,
            containers,
        })
    }
}
