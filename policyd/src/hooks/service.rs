use std::collections::BTreeMap;

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::Service;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::request::DecisionRequest;
use crate::response::DecisionResponse;
use crate::webhook::{
    RuleOperation, RuleScope, TriggerRule, Webhook, WebhookDescriptor, expects_kind,
};

pub const WEBHOOK_NAME: &str = "service-mutation";

pub const ANNOTATION_KEY: &str =
    "service.beta.kubernetes.io/aws-load-balancer-additional-resource-tags";
const TAG_PREFIX: &str = "red-hat-managed=";
const REQUIRED_TAG: &str = "red-hat-managed=true";

const LOAD_BALANCER: &str = "LoadBalancer";

/// Tags LoadBalancer services as platform-managed
pub struct ServiceWebhook {
    descriptor: WebhookDescriptor,
}

impl ServiceWebhook {
    pub fn new() -> Self {
        let rules = vec![
            TriggerRule::new([RuleOperation::Create, RuleOperation::Update], RuleScope::Namespaced)
                .group("")
                .versions(["v1"])
                .resource("services"),
        ];

        Self {
            descriptor: WebhookDescriptor::mutating(WEBHOOK_NAME, rules)
                .doc(
                    "LoadBalancer-type services on Managed OpenShift clusters must contain an \
                     additional annotation for managed policy compliance.",
                )
                .timeout(2)
                .topologies(false, true),
        }
    }
}

impl Default for ServiceWebhook {
    fn default() -> Self {
        Self::new()
    }
}

fn has_managed_tag(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations
        .and_then(|a| a.get(ANNOTATION_KEY))
        .is_some_and(|tags| tags.split(',').any(|tag| tag == REQUIRED_TAG))
}

/// Adds the annotation, or rewrites it with the required tag first
///
/// Existing tags that set `red-hat-managed` to another value are dropped.
fn build_patch(annotations: Option<&BTreeMap<String, String>>) -> Patch {
    let Some(annotations) = annotations else {
        return Patch(vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations"]),
            value: json!({ ANNOTATION_KEY: REQUIRED_TAG }),
        })]);
    };

    let path = PointerBuf::from_tokens(["metadata", "annotations", ANNOTATION_KEY]);

    let Some(existing) = annotations.get(ANNOTATION_KEY) else {
        return Patch(vec![PatchOperation::Add(AddOperation {
            path,
            value: Value::from(REQUIRED_TAG),
        })]);
    };

    let tags: Vec<&str> = std::iter::once(REQUIRED_TAG)
        .chain(existing.split(',').filter(|tag| !tag.starts_with(TAG_PREFIX)))
        .collect();

    Patch(vec![PatchOperation::Replace(ReplaceOperation {
        path,
        value: Value::from(tags.join(",")),
    })])
}

impl Webhook for ServiceWebhook {
    fn descriptor(&self) -> &WebhookDescriptor {
        &self.descriptor
    }

    fn validate(&self, req: &DecisionRequest) -> bool {
        expects_kind(req, "", "Service")
    }

    fn decide(&self, req: &DecisionRequest) -> DecisionResponse {
        let service: Service = match req.subject() {
            Ok(service) => service,
            Err(err) => {
                error!(error = %err, "could not render a Service from the incoming request");
                return DecisionResponse::errored(req, err);
            }
        };

        let is_load_balancer = service
            .spec
            .as_ref()
            .and_then(|spec| spec.type_.as_deref())
            == Some(LOAD_BALANCER);
        if !is_load_balancer {
            return DecisionResponse::allow(
                req,
                "Non-LoadBalancer Services are exempt from compliance annotation requirements",
            );
        }

        let name = service.metadata.name.as_deref().unwrap_or_else(|| req.name());
        let annotations = service.metadata.annotations.as_ref();

        if has_managed_tag(annotations) {
            return DecisionResponse::allow(
                req,
                format!("Service '{name}' contains the proper compliance annotation"),
            );
        }

        info!(service = name, "mutating service for compliance");
        DecisionResponse::patched(
            req,
            format!("Added necessary compliance annotation to service '{name}'"),
            build_patch(annotations),
        )
    }
}
