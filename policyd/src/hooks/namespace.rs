use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use regex::Regex;
use tracing::{error, info};

use super::{
    CLUSTER_ADMIN_GROUP, CLUSTER_ADMIN_USERS, PRIVILEGED_SERVICE_ACCOUNT_GROUPS, SRE_ADMIN_GROUPS,
};
use crate::config::{MANAGED_NAMESPACES_CONFIGMAP, PlatformConfig};
use crate::error::RegistrationError;
use crate::guard::{self, ProtectedLabelPolicy, Verdict};
use crate::privilege::{PrivilegeSet, Resolution};
use crate::request::DecisionRequest;
use crate::response::DecisionResponse;
use crate::webhook::{
    RuleOperation, RuleScope, TriggerRule, Webhook, WebhookDescriptor, expects_kind,
};

pub const WEBHOOK_NAME: &str = "namespace-validation";

/// Names that would shadow top-level DNS domains
pub const BAD_NAMESPACE: &str = r"(^com$|^io$|^in$)";

const LAYERED_PRODUCT_NAMESPACE: &str = r"^redhat-.*";
const LAYERED_PRODUCT_ADMIN_GROUP: &str = "layered-sre-cluster-admins";

/// Labels customers may never set or change
pub const PROTECTED_LABELS: [&str; 2] = [
    "managed.openshift.io/storage-pv-quota-exempt",
    "managed.openshift.io/service-lb-quota-exempt",
];

/// Labels customers may remove but never add
pub const REMOVABLE_PROTECTED_LABELS: [&str; 1] = ["openshift.io/cluster-monitoring"];

// Operators allowed to label customer namespaces
const LABEL_USER_EXCEPTIONS: [&str; 1] = ["system:serviceaccount:nvidia-gpu-operator:gpu-operator"];
const LABEL_SERVICE_ACCOUNT_EXCEPTIONS: [&str; 1] = ["multiclusterhub-operator"];

/// Guards platform namespaces and protected namespace labels
pub struct NamespaceWebhook {
    descriptor: WebhookDescriptor,
    config: Arc<PlatformConfig>,
    admins: PrivilegeSet,
    label_editors: PrivilegeSet,
    bad_names: Regex,
    labels: ProtectedLabelPolicy,
}

impl NamespaceWebhook {
    pub fn new(config: Arc<PlatformConfig>) -> Result<Self, RegistrationError> {
        let rules = vec![
            TriggerRule::new(
                [RuleOperation::Create, RuleOperation::Update, RuleOperation::Delete],
                RuleScope::Cluster,
            )
            .group("")
            .resource("namespaces"),
        ];

        let doc = format!(
            "Managed OpenShift Customers may not modify namespaces specified in the \
             {MANAGED_NAMESPACES_CONFIGMAP} ConfigMap because customer workloads should be placed \
             in customer-created namespaces. Customers may not create namespaces identified by \
             this regular expression {BAD_NAMESPACE} because it could interfere with critical DNS \
             resolution. Additionally, customers may not set or change the values of these \
             Namespace labels {PROTECTED_LABELS:?}."
        );

        let admins = PrivilegeSet::builder()
            .users(CLUSTER_ADMIN_USERS)
            .groups([CLUSTER_ADMIN_GROUP])
            .groups(SRE_ADMIN_GROUPS)
            .service_account_groups([PRIVILEGED_SERVICE_ACCOUNT_GROUPS])
            .layered_product(LAYERED_PRODUCT_ADMIN_GROUP, LAYERED_PRODUCT_NAMESPACE)
            .build()?;

        let label_editors = PrivilegeSet::builder()
            .users(LABEL_USER_EXCEPTIONS)
            .service_account_names(LABEL_SERVICE_ACCOUNT_EXCEPTIONS)
            .build()?;

        let bad_names =
            Regex::new(BAD_NAMESPACE).map_err(|source| RegistrationError::InvalidPattern {
                pattern: BAD_NAMESPACE.to_owned(),
                source,
            })?;

        Ok(Self {
            descriptor: WebhookDescriptor::validating(WEBHOOK_NAME, rules)
                .doc(doc)
                .timeout(2),
            config,
            admins,
            label_editors,
            bad_names,
            labels: ProtectedLabelPolicy::new(PROTECTED_LABELS, REMOVABLE_PROTECTED_LABELS),
        })
    }
}

impl Webhook for NamespaceWebhook {
    fn descriptor(&self) -> &WebhookDescriptor {
        &self.descriptor
    }

    fn validate(&self, req: &DecisionRequest) -> bool {
        expects_kind(req, "", "Namespace")
    }

    fn decide(&self, req: &DecisionRequest) -> DecisionResponse {
        let states = match req.states::<Namespace>() {
            Ok(states) => states,
            Err(err) => {
                error!(error = %err, "couldn't render a Namespace from the incoming request");
                return DecisionResponse::errored(req, err);
            }
        };

        let name = states
            .subject()
            .metadata
            .name
            .as_deref()
            .unwrap_or_else(|| req.name());

        match self.admins.resolve(req.identity(), name) {
            Resolution::Unauthenticated => {
                info!(
                    user = %req.identity().username,
                    "unauthenticated caller reached webhook, check RBAC"
                );
                return DecisionResponse::deny(req, "Unauthenticated");
            }
            Resolution::Exempt(exemption) => {
                return DecisionResponse::allow(req, exemption.reason());
            }
            Resolution::NotExempt => {}
        }

        if self.config.is_privileged_namespace(name) {
            info!(
                namespace = name,
                patterns = ?self.config.privileged_patterns(),
                "non-admin attempted to access a privileged namespace"
            );
            return DecisionResponse::deny(
                req,
                format!(
                    "Prevented from accessing Red Hat managed namespaces. Customer workloads \
                     should be placed in customer namespaces, and should not match an entry in \
                     this list of regular expressions: {:?}",
                    self.config.privileged_patterns()
                ),
            );
        }

        if self.bad_names.is_match(name) {
            info!(
                namespace = name,
                regex = BAD_NAMESPACE,
                "non-admin attempted to access a harmful namespace"
            );
            return DecisionResponse::deny(
                req,
                format!(
                    "Prevented from creating a potentially harmful namespace. Customer namespaces \
                     should not match this regular expression, as this would impact DNS \
                     resolution: {BAD_NAMESPACE}"
                ),
            );
        }

        if self.label_editors.is_exempt(req.identity(), name) {
            return DecisionResponse::allow(req, "User allowed to modify namespace labels");
        }

        let previous = states.previous().and_then(|ns| ns.metadata.labels.as_ref());
        let proposed = states.proposed().and_then(|ns| ns.metadata.labels.as_ref());

        match guard::evaluate(req.operation(), previous, proposed, &self.labels) {
            Verdict::Allowed => DecisionResponse::allow(req, "RBAC allowed"),
            Verdict::Denied(reason) => DecisionResponse::deny(req, reason),
        }
    }
}
