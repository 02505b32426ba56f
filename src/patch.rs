use std::collections::BTreeMap;

use json_patch::{AddOperation, RemoveOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, Pod};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::{ANNOTATIONS_PATH, CONTAINERS_PATH, INIT_CONTAINERS_PATH, LABELS_PATH},
    store::ExecutionCacheRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Replace,
    Remove,
}

/// One RFC 6902 operation against the incoming pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: Op,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    fn add(path: &str, value: Value) -> Self {
        Self {
            op: Op::Add,
            path: path.to_string(),
            value: Some(value),
        }
    }

    fn replace(path: &str, value: Value) -> Self {
        Self {
            op: Op::Replace,
            path: path.to_string(),
            value: Some(value),
        }
    }

    fn remove(path: &str) -> Self {
        Self {
            op: Op::Remove,
            path: path.to_string(),
            value: None,
        }
    }
}

impl From<PatchOperation> for json_patch::PatchOperation {
    fn from(patch: PatchOperation) -> Self {
        // our paths name plain pod fields, so no token needs escaping
        let path = PointerBuf::from_tokens(patch.path.split('/').skip(1));
        let value = patch.value.unwrap_or_default();
        match patch.op {
            Op::Add => json_patch::PatchOperation::Add(AddOperation { path, value }),
            Op::Replace => json_patch::PatchOperation::Replace(ReplaceOperation { path, value }),
            Op::Remove => json_patch::PatchOperation::Remove(RemoveOperation { path }),
        }
    }
}

/// Collect operations into the patch type admission responses carry.
pub fn to_json_patch(patches: Vec<PatchOperation>) -> json_patch::Patch {
    json_patch::Patch(patches.into_iter().map(Into::into).collect())
}

/// The container a cached pod runs instead of its real work.
pub fn placeholder_container(name: &str, image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["true".to_string()]),
        ..Container::default()
    }
}

/// Build the patch list for an eligible pod.
///
/// On a hit the containers are swapped for `placeholder` and any init containers are removed.
/// The annotation and label maps are always written whole, after the container changes.
pub fn build_patches(
    pod: &Pod,
    annotations: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
    hit: Option<&ExecutionCacheRecord>,
    placeholder: &Container,
) -> Vec<PatchOperation> {
    let mut patches = Vec::new();

    if hit.is_some() {
        patches.push(PatchOperation::replace(
            CONTAINERS_PATH,
            serde_json::json!([placeholder]),
        ));
        // removing a path that doesn't exist fails the whole patch
        let has_init_containers = pod
            .spec
            .as_ref()
            .and_then(|s| s.init_containers.as_ref())
            .is_some_and(|c| !c.is_empty());
        if has_init_containers {
            patches.push(PatchOperation::remove(INIT_CONTAINERS_PATH));
        }
    }

    patches.push(PatchOperation::add(ANNOTATIONS_PATH, string_map(annotations)));
    patches.push(PatchOperation::add(LABELS_PATH, string_map(labels)));
    patches
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
