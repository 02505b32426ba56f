use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::{Container, Pod};
use kube::core::GroupVersionResource;
use tracing::{debug, info, warn};

use crate::{
    common::{
        ARGO_WORKFLOW_OUTPUTS, ARGO_WORKFLOW_TEMPLATE, CACHE_ID_LABEL_KEY,
        DEFAULT_PLACEHOLDER_IMAGE, EXECUTION_KEY, PLACEHOLDER_CONTAINER_NAME,
    },
    error::{Error, Result},
    filter,
    fingerprint::{derive_key, CacheFingerprint},
    patch::{build_patches, placeholder_container, PatchOperation},
    store::{ExecutionCacheRecord, ExecutionCacheStore},
};

/// Settings resolved once at startup and handed to the mutator.
#[derive(Debug, Clone)]
pub struct MutatorConfig {
    pub placeholder_image: String,
    /// Upper bound on a single cache lookup.
    pub lookup_timeout: Duration,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            lookup_timeout: Duration::from_secs(3),
        }
    }
}

pub struct Mutator {
    store: Arc<dyn ExecutionCacheStore>,
    placeholder: Container,
    lookup_timeout: Duration,
}

fn is_pod_resource(resource: &GroupVersionResource) -> bool {
    resource.group.is_empty() && resource.version == "v1" && resource.resource == "pods"
}

impl Mutator {
    pub fn new(store: Arc<dyn ExecutionCacheStore>, config: MutatorConfig) -> Self {
        Self {
            store,
            placeholder: placeholder_container(PLACEHOLDER_CONTAINER_NAME, &config.placeholder_image),
            lookup_timeout: config.lookup_timeout,
        }
    }

    /// Work out the patches for one admission request.
    ///
    /// `raw` is the serialized object under admission. `deadline` is what is left of the
    /// request's own time budget, if the caller knows it; the cache lookup never outlives it.
    ///
    /// Only a pod that can't be decoded is an error. Everything after that degrades to "no
    /// patches" or to a cache miss, so the cache can never stop a pipeline step from running.
    pub async fn mutate_pod_if_cached(
        &self,
        resource: &GroupVersionResource,
        raw: &[u8],
        deadline: Option<Duration>,
    ) -> Result<Vec<PatchOperation>> {
        if !is_pod_resource(resource) {
            info!(
                group = %resource.group,
                version = %resource.version,
                resource = %resource.resource,
                "expected a pod resource, letting the request through"
            );
            return Ok(Vec::new());
        }

        let pod: Pod = serde_json::from_slice(raw).map_err(Error::Deserialization)?;
        let name = pod.metadata.name.as_deref().unwrap_or_default();

        let eligibility = filter::check(&pod);
        if !eligibility.is_eligible() {
            debug!(pod = name, reason = ?eligibility, "pod is not cacheable");
            return Ok(Vec::new());
        }

        let template = match pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ARGO_WORKFLOW_TEMPLATE))
        {
            Some(template) => template,
            None => return Ok(Vec::new()),
        };

        let key = match derive_key(template) {
            Ok(key) => key,
            Err(e) => {
                warn!(pod = name, error = %e, "unable to generate cache key");
                return Ok(Vec::new());
            }
        };

        let mut annotations = pod.metadata.annotations.clone().unwrap_or_default();
        let mut labels = pod.metadata.labels.clone().unwrap_or_default();
        annotations.insert(EXECUTION_KEY.to_string(), key.to_hex());
        labels.insert(CACHE_ID_LABEL_KEY.to_string(), String::new());

        let timeout = deadline.map_or(self.lookup_timeout, |d| d.min(self.lookup_timeout));
        let hit = self.lookup(&key, timeout).await;
        if let Some(record) = &hit {
            info!(pod = name, key = %key, id = record.id, "found cached execution");
            annotations.insert(
                ARGO_WORKFLOW_OUTPUTS.to_string(),
                record.execution_output.clone(),
            );
            labels.insert(CACHE_ID_LABEL_KEY.to_string(), record.id.to_string());
        } else {
            debug!(pod = name, key = %key, "no cached execution");
        }

        Ok(build_patches(
            &pod,
            &annotations,
            &labels,
            hit.as_ref(),
            &self.placeholder,
        ))
    }

    /// One bounded attempt. Failures are logged and read as a miss.
    async fn lookup(
        &self,
        key: &CacheFingerprint,
        timeout: Duration,
    ) -> Option<ExecutionCacheRecord> {
        let result = tokio::time::timeout(timeout, self.store.get_execution_cache(key))
            .await
            .unwrap_or(Err(Error::LookupTimeout(timeout)));
        match result {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, treating as a miss");
                None
            }
        }
    }
}
