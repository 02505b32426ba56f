use k8s_openapi::api::core::v1::{Container, Pod};

use crate::common::{ARGO_WORKFLOW_NODE_NAME, KFP_ANNOTATION, TFX_POD_SUFFIX};

/// Why a pod was or wasn't picked for caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NoAnnotations,
    NotArgoPod,
    NotKfpPod,
    TfxPod,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Eligibility::Eligible
    }
}

/// Only Argo pods launched by Kubeflow Pipelines are cached, except the ones TFX runs.
pub fn check(pod: &Pod) -> Eligibility {
    let annotations = match &pod.metadata.annotations {
        Some(annotations) if !annotations.is_empty() => annotations,
        _ => return Eligibility::NoAnnotations,
    };
    if !annotations.contains_key(ARGO_WORKFLOW_NODE_NAME) {
        return Eligibility::NotArgoPod;
    }
    if !annotations.keys().any(|k| k.contains(KFP_ANNOTATION)) {
        return Eligibility::NotKfpPod;
    }

    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice());
    if is_tfx_pod(containers.unwrap_or_default()) {
        return Eligibility::TfxPod;
    }

    Eligibility::Eligible
}

pub fn is_eligible(pod: &Pod) -> bool {
    check(pod).is_eligible()
}

/// A TFX pod has exactly one container named "main" whose command ends in the TFX entrypoint.
fn is_tfx_pod(containers: &[Container]) -> bool {
    let mut mains = containers.iter().filter(|c| c.name == "main");
    let (Some(main), None) = (mains.next(), mains.next()) else {
        return false;
    };
    main.command
        .as_ref()
        .and_then(|command| command.last())
        .is_some_and(|last| last.ends_with(TFX_POD_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use kube::core::ObjectMeta;

    fn kfp_annotations() -> [(String, String); 2] {
        [
            (ARGO_WORKFLOW_NODE_NAME.to_string(), "n1".to_string()),
            ("pipelines.kubeflow.org/x".to_string(), "y".to_string()),
        ]
    }

    fn pod(annotations: &[(String, String)], containers: Vec<Container>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("step-1".to_string()),
                annotations: Some(annotations.iter().cloned().collect()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers,
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    fn container(name: &str, command: &[&str]) -> Container {
        Container {
            name: name.to_string(),
            image: Some("python:3.7".to_string()),
            command: Some(command.iter().map(|s| s.to_string()).collect()),
            ..Container::default()
        }
    }

    fn tfx_command() -> [&'static str; 3] {
        [
            "python",
            "-m",
            "/tfx-src/tfx/orchestration/kubeflow/container_entrypoint.py",
        ]
    }

    #[test]
    fn no_annotations() {
        assert_eq!(check(&Pod::default()), Eligibility::NoAnnotations);
        assert_eq!(check(&pod(&[], vec![])), Eligibility::NoAnnotations);
    }

    #[test]
    fn needs_argo_and_kfp_annotations() {
        let [node, kfp] = kfp_annotations();
        assert_eq!(check(&pod(&[kfp], vec![])), Eligibility::NotArgoPod);
        assert_eq!(check(&pod(&[node], vec![])), Eligibility::NotKfpPod);
        assert!(is_eligible(&pod(&kfp_annotations(), vec![])));
    }

    #[test]
    fn kfp_marker_matches_anywhere_in_key() {
        let [node, _] = kfp_annotations();
        let marker = (
            "sidecar.pipelines.kubeflow.org/enabled".to_string(),
            "true".to_string(),
        );
        assert!(is_eligible(&pod(&[node, marker], vec![])));
    }

    #[test]
    fn pod_without_spec_is_eligible() {
        let mut p = pod(&kfp_annotations(), vec![]);
        p.spec = None;
        assert!(is_eligible(&p));
    }

    #[test]
    fn non_tfx_main_container_is_eligible() {
        let p = pod(
            &kfp_annotations(),
            vec![
                container("main", &["python", "train.py"]),
                container("wait", &["argoexec", "wait"]),
            ],
        );
        assert!(is_eligible(&p));
    }

    #[test]
    fn tfx_pod_is_excluded() {
        let p = pod(
            &kfp_annotations(),
            vec![
                container("main", &tfx_command()),
                container("wait", &["argoexec"]),
            ],
        );
        assert_eq!(check(&p), Eligibility::TfxPod);
    }

    #[test]
    fn tfx_entrypoint_must_be_last_token() {
        let mut command = tfx_command().to_vec();
        command.push("--verbose");
        let p = pod(&kfp_annotations(), vec![container("main", &command)]);
        assert!(is_eligible(&p));
    }

    #[test]
    fn several_main_containers_are_not_tfx() {
        let p = pod(
            &kfp_annotations(),
            vec![container("main", &tfx_command()), container("main", &tfx_command())],
        );
        assert!(is_eligible(&p));
    }

    #[test]
    fn main_without_command_is_eligible() {
        let mut main = container("main", &[]);
        let p = pod(&kfp_annotations(), vec![main.clone()]);
        assert!(is_eligible(&p));
        main.command = None;
        assert!(is_eligible(&pod(&kfp_annotations(), vec![main])));
    }
}
