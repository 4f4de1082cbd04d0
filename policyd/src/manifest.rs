//! Registration manifests and policy documentation
//!
//! Rendered from the same descriptors the dispatcher routes on, so the
//! registration can never drift from what is served.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::webhook::{TriggerRule, WebhookDescriptor};

/// Service fronting the webhook pods
pub const SERVICE_NAME: &str = "validation-webhook";
pub const SERVICE_NAMESPACE: &str = "openshift-validation-webhook";

/// Asks the service CA operator to fill in the client CA bundle
pub const CA_BUNDLE_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";

const ADMISSION_REVIEW_VERSIONS: [&str; 1] = ["v1"];

fn configuration_name(descriptor: &WebhookDescriptor) -> String {
    format!("sre-{}", descriptor.name)
}

fn webhook_name(descriptor: &WebhookDescriptor) -> String {
    format!("{}.managed.openshift.io", descriptor.name)
}

fn metadata(descriptor: &WebhookDescriptor) -> ObjectMeta {
    ObjectMeta {
        name: Some(configuration_name(descriptor)),
        annotations: Some(BTreeMap::from([(
            CA_BUNDLE_ANNOTATION.to_owned(),
            "true".to_owned(),
        )])),
        ..Default::default()
    }
}

fn client_config(descriptor: &WebhookDescriptor) -> WebhookClientConfig {
    WebhookClientConfig {
        service: Some(ServiceReference {
            name: SERVICE_NAME.to_owned(),
            namespace: SERVICE_NAMESPACE.to_owned(),
            path: Some(descriptor.uri()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn object_selector(descriptor: &WebhookDescriptor) -> Option<LabelSelector> {
    descriptor.object_selector.as_ref().map(|labels| LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    })
}

fn rule(rule: &TriggerRule) -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(rule.operations.iter().map(|op| op.as_str().to_owned()).collect()),
        api_groups: Some(rule.api_groups.clone()),
        api_versions: Some(rule.api_versions.clone()),
        resources: Some(rule.resources.clone()),
        scope: Some(rule.scope.as_str().to_owned()),
    }
}

fn rules(descriptor: &WebhookDescriptor) -> Option<Vec<RuleWithOperations>> {
    Some(descriptor.rules.iter().map(rule).collect())
}

fn review_versions() -> Vec<String> {
    ADMISSION_REVIEW_VERSIONS.iter().map(|v| (*v).to_owned()).collect()
}

pub fn validating_configuration(descriptor: &WebhookDescriptor) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: metadata(descriptor),
        webhooks: Some(vec![ValidatingWebhook {
            admission_review_versions: review_versions(),
            client_config: client_config(descriptor),
            failure_policy: Some(descriptor.failure_policy.as_str().to_owned()),
            match_policy: Some(descriptor.match_policy.as_str().to_owned()),
            name: webhook_name(descriptor),
            object_selector: object_selector(descriptor),
            rules: rules(descriptor),
            side_effects: descriptor.side_effects.as_str().to_owned(),
            timeout_seconds: Some(descriptor.timeout_seconds),
            ..Default::default()
        }]),
    }
}

pub fn mutating_configuration(descriptor: &WebhookDescriptor) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: metadata(descriptor),
        webhooks: Some(vec![MutatingWebhook {
            admission_review_versions: review_versions(),
            client_config: client_config(descriptor),
            failure_policy: Some(descriptor.failure_policy.as_str().to_owned()),
            match_policy: Some(descriptor.match_policy.as_str().to_owned()),
            name: webhook_name(descriptor),
            object_selector: object_selector(descriptor),
            rules: rules(descriptor),
            side_effects: descriptor.side_effects.as_str().to_owned(),
            timeout_seconds: Some(descriptor.timeout_seconds),
            ..Default::default()
        }]),
    }
}

/// One webhook configuration per registered webhook, as a YAML stream
pub fn render_manifests(registry: &Registry) -> Result<String> {
    let mut out = String::new();

    for webhook in registry.webhooks() {
        let descriptor = webhook.descriptor();
        let doc = if descriptor.mutating {
            serde_yaml::to_string(&mutating_configuration(descriptor))?
        } else {
            serde_yaml::to_string(&validating_configuration(descriptor))?
        };
        out.push_str("---\n");
        out.push_str(&doc);
    }

    Ok(out)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocHook<'a> {
    webhook_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<&'a [TriggerRule]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_object_selector: Option<LabelSelector>,
    document_string: &'a str,
}

/// JSON documentation of every registered webhook, sorted by name
pub fn render_docs(registry: &Registry, hide_rules: bool) -> Result<String> {
    let mut hooks: Vec<DocHook<'_>> = registry
        .webhooks()
        .map(|webhook| {
            let descriptor = webhook.descriptor();
            DocHook {
                webhook_name: descriptor.name,
                rules: (!hide_rules).then_some(descriptor.rules.as_slice()),
                webhook_object_selector: (!hide_rules)
                    .then(|| object_selector(descriptor))
                    .flatten(),
                document_string: &descriptor.doc,
            }
        })
        .collect();
    hooks.sort_by_key(|hook| hook.webhook_name);

    serde_json::to_string_pretty(&hooks).map_err(Error::SerializationError)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::config::PlatformConfig;
    use crate::hooks;
    use crate::webhook::{RuleOperation, RuleScope};

    fn registry() -> Registry {
        hooks::registry(&Arc::new(PlatformConfig::fallback().unwrap()), None).unwrap()
    }

    #[test]
    fn test_validating_configuration() {
        let registry = registry();
        let webhook = registry.get("/namespace-validation").unwrap();
        let config = validating_configuration(webhook.descriptor());

        assert_eq!(config.metadata.name.as_deref(), Some("sre-namespace-validation"));
        assert_eq!(
            config.metadata.annotations.as_ref().unwrap()[CA_BUNDLE_ANNOTATION],
            "true"
        );

        let hook = &config.webhooks.as_ref().unwrap()[0];
        assert_eq!(hook.name, "namespace-validation.managed.openshift.io");
        assert_eq!(hook.timeout_seconds, Some(2));
        assert_eq!(hook.side_effects, "None");
        assert_eq!(hook.failure_policy.as_deref(), Some("Ignore"));
        assert_eq!(hook.match_policy.as_deref(), Some("Equivalent"));

        let service = hook.client_config.service.as_ref().unwrap();
        assert_eq!(service.name, SERVICE_NAME);
        assert_eq!(service.namespace, SERVICE_NAMESPACE);
        assert_eq!(service.path.as_deref(), Some("/namespace-validation"));

        let rule = &hook.rules.as_ref().unwrap()[0];
        assert_eq!(
            rule.operations.as_deref().unwrap(),
            ["CREATE", "UPDATE", "DELETE"]
        );
        assert_eq!(rule.scope.as_deref(), Some("Cluster"));
    }

    #[test]
    fn test_object_selector_renders_match_labels() {
        let rule = TriggerRule::new([RuleOperation::Update], RuleScope::Namespaced)
            .group("")
            .resource("namespaces");
        let descriptor = WebhookDescriptor::validating("hive-ownership", vec![rule])
            .object_selector([("hive.openshift.io/managed", "true")]);

        let config = validating_configuration(&descriptor);
        let hook = &config.webhooks.as_ref().unwrap()[0];
        let labels = hook.object_selector.as_ref().unwrap().match_labels.as_ref().unwrap();
        assert_eq!(labels["hive.openshift.io/managed"], "true");

        let unselected = registry();
        let namespace = unselected.get("/namespace-validation").unwrap();
        let config = validating_configuration(namespace.descriptor());
        assert!(config.webhooks.unwrap()[0].object_selector.is_none());
    }

    #[test]
    fn test_manifest_stream_kinds() {
        let yaml = render_manifests(&registry()).unwrap();
        assert_eq!(yaml.matches("---\n").count(), 5);
        assert_eq!(yaml.matches("kind: ValidatingWebhookConfiguration").count(), 4);
        assert_eq!(yaml.matches("kind: MutatingWebhookConfiguration").count(), 1);
        assert!(yaml.contains("path: /service-mutation"));
    }

    #[test]
    fn test_docs_sorted_with_rules() {
        let rendered = render_docs(&registry(), false).unwrap();
        let docs: Value = serde_json::from_str(&rendered).unwrap();
        let names: Vec<&str> = docs
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["webhookName"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            [
                "namespace-validation",
                "pod-validation",
                "service-mutation",
                "serviceaccount-validation",
                "subscription-validation"
            ]
        );
        assert_eq!(docs[0]["rules"][0]["resources"][0], "namespaces");
        assert!(docs[0]["documentString"].as_str().unwrap().contains("DNS resolution"));
    }

    #[test]
    fn test_docs_hide_rules() {
        let rendered = render_docs(&registry(), true).unwrap();
        let docs: Value = serde_json::from_str(&rendered).unwrap();
        assert!(docs[0].get("rules").is_none());
        assert!(docs[0].get("documentString").is_some());
    }
}
