use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::error;

use crate::config::PlatformConfig;
use crate::error::RegistrationError;
use crate::privilege::PatternClass;
use crate::request::DecisionRequest;
use crate::response::DecisionResponse;
use crate::webhook::{
    RuleOperation, RuleScope, TriggerRule, Webhook, WebhookDescriptor, expects_kind,
};

pub const WEBHOOK_NAME: &str = "pod-validation";

/// Platform namespaces that still host customer workloads
const UNPRIVILEGED_NAMESPACE: &str = r"(openshift-logging|openshift-operators)";

const INFRA_ROLE: &str = "node-role.kubernetes.io/infra";
const MASTER_ROLE: &str = "node-role.kubernetes.io/master";
const NO_SCHEDULE: &str = "NoSchedule";
const PREFER_NO_SCHEDULE: &str = "PreferNoSchedule";

/// Keeps customer pods off infra and master nodes
pub struct PodWebhook {
    descriptor: WebhookDescriptor,
    config: Arc<PlatformConfig>,
    unprivileged: PatternClass,
}

impl PodWebhook {
    pub fn new(config: Arc<PlatformConfig>) -> Result<Self, RegistrationError> {
        let rules = vec![
            TriggerRule::new([RuleOperation::All], RuleScope::Namespaced)
                .group("")
                .resource("pods"),
        ];

        Ok(Self {
            descriptor: WebhookDescriptor::validating(WEBHOOK_NAME, rules)
                .doc(
                    "Managed OpenShift Customers may not use tolerations on Pods that could cause \
                     those Pods to be scheduled on infra or master nodes.",
                )
                .timeout(1),
            config,
            unprivileged: PatternClass::new([UNPRIVILEGED_NAMESPACE])?,
        })
    }

    fn is_privileged(&self, namespace: &str) -> bool {
        self.config.is_privileged_namespace(namespace) && !self.unprivileged.is_match(namespace)
    }
}

fn node_role(key: &str) -> Option<&'static str> {
    match key {
        INFRA_ROLE => Some("infra"),
        MASTER_ROLE => Some("master"),
        _ => None,
    }
}

impl Webhook for PodWebhook {
    fn descriptor(&self) -> &WebhookDescriptor {
        &self.descriptor
    }

    fn validate(&self, req: &DecisionRequest) -> bool {
        expects_kind(req, "", "Pod")
    }

    fn decide(&self, req: &DecisionRequest) -> DecisionResponse {
        let pod: Pod = match req.subject() {
            Ok(pod) => pod,
            Err(err) => {
                error!(error = %err, "couldn't render a Pod from the incoming request");
                return DecisionResponse::errored(req, err);
            }
        };

        // Pods created through controllers often leave the namespace empty
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(req.namespace())
            .unwrap_or_default();

        if !self.is_privileged(namespace) {
            let tolerations = pod.spec.iter().flat_map(|spec| spec.tolerations.iter().flatten());
            for toleration in tolerations {
                let Some(role) = toleration.key.as_deref().and_then(node_role) else {
                    continue;
                };
                let effect = toleration.effect.as_deref().unwrap_or_default();
                if effect == NO_SCHEDULE || effect == PREFER_NO_SCHEDULE {
                    return DecisionResponse::deny(
                        req,
                        format!("Not allowed to schedule a pod with {effect} taint on {role} node"),
                    );
                }
            }
        }

        DecisionResponse::allow(req, "Allowed to create Pod because of RBAC")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::testutil::ReviewBuilder;

    fn webhook() -> PodWebhook {
        PodWebhook::new(Arc::new(PlatformConfig::fallback().unwrap())).unwrap()
    }

    fn pod(namespace: &str, tolerations: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "test-pod", "namespace": namespace },
            "spec": {
                "containers": [{ "name": "app", "image": "registry.example/app:1" }],
                "tolerations": tolerations
            }
        })
    }

    fn request(namespace: &str, tolerations: Value) -> DecisionRequest {
        ReviewBuilder::pods("CREATE")
            .namespace(namespace)
            .user("test@user", &["system:authenticated"])
            .object(pod(namespace, tolerations))
            .request()
    }

    #[test]
    fn test_master_and_infra_tolerations_denied_for_customers() {
        for (key, effect, expected) in [
            (INFRA_ROLE, NO_SCHEDULE, "NoSchedule taint on infra node"),
            (INFRA_ROLE, PREFER_NO_SCHEDULE, "PreferNoSchedule taint on infra node"),
            (MASTER_ROLE, NO_SCHEDULE, "NoSchedule taint on master node"),
            (MASTER_ROLE, PREFER_NO_SCHEDULE, "PreferNoSchedule taint on master node"),
        ] {
            let toleration = json!([{ "key": key, "operator": "Exists", "effect": effect }]);
            let req = request("my-app", toleration);
            let res = webhook().decide(&req);
            assert!(!res.allowed());
            assert!(res.reason().contains(expected), "{}", res.reason());
        }
    }

    #[test]
    fn test_other_tolerations_allowed() {
        let req = request(
            "my-app",
            json!([
                { "key": INFRA_ROLE, "effect": "NoExecute" },
                { "key": "example.com/gpu", "effect": NO_SCHEDULE }
            ]),
        );
        assert!(webhook().decide(&req).allowed());
    }

    #[test]
    fn test_privileged_namespace_may_tolerate() {
        let tolerations = json!([{ "key": MASTER_ROLE, "effect": NO_SCHEDULE }]);
        assert!(webhook().decide(&request("openshift-ingress", tolerations.clone())).allowed());
        assert!(!webhook().decide(&request("openshift-logging", tolerations.clone())).allowed());
        assert!(!webhook().decide(&request("openshift-operators", tolerations)).allowed());
    }

    #[test]
    fn test_namespace_taken_from_request_when_missing_on_pod() {
        let mut object = pod("", json!([{ "key": INFRA_ROLE, "effect": NO_SCHEDULE }]));
        object["metadata"].as_object_mut().unwrap().remove("namespace");
        let req = ReviewBuilder::pods("CREATE")
            .namespace("openshift-ingress")
            .user("test@user", &[])
            .object(object)
            .request();
        assert!(webhook().decide(&req).allowed());
    }

    #[test]
    fn test_bad_payload_is_errored() {
        let mut object = pod("my-app", json!([]));
        object["spec"]["tolerations"] = json!("nope");
        let req = ReviewBuilder::pods("CREATE")
            .uid("bad-pod")
            .user("test@user", &[])
            .object(object)
            .request();
        let res = webhook().decide(&req);
        assert!(!res.allowed());
        assert_eq!(res.code(), 400);
        assert_eq!(res.uid(), "bad-pod");
    }
}
