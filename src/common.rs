//! Annotation, label and path names shared by the filter, the patch builder and the mutator.

/// Any annotation key containing this marks a pod as launched by Kubeflow Pipelines.
pub const KFP_ANNOTATION: &str = "pipelines.kubeflow.org";
pub const ARGO_WORKFLOW_NODE_NAME: &str = "workflows.argoproj.io/node-name";
pub const ARGO_WORKFLOW_TEMPLATE: &str = "workflows.argoproj.io/template";
pub const ARGO_WORKFLOW_OUTPUTS: &str = "workflows.argoproj.io/outputs";
pub const EXECUTION_KEY: &str = "pipelines.kubeflow.org/execution_cache_key";
pub const CACHE_ID_LABEL_KEY: &str = "pipelines.kubeflow.org/cache_id";

/// TFX pods run their own caching, so we leave them alone.
pub const TFX_POD_SUFFIX: &str = "tfx/orchestration/kubeflow/container_entrypoint.py";

/// Per-run storage address inside an Argo template; never part of the cache key.
pub const ARCHIVE_LOCATION_KEY: &str = "archiveLocation";

pub const ANNOTATIONS_PATH: &str = "/metadata/annotations";
pub const LABELS_PATH: &str = "/metadata/labels";
pub const CONTAINERS_PATH: &str = "/spec/containers";
pub const INIT_CONTAINERS_PATH: &str = "/spec/initContainers";

pub const PLACEHOLDER_CONTAINER_NAME: &str = "dummy";
pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "alpine";
