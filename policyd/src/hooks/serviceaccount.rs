use std::sync::Arc;

use k8s_openapi::api::core::v1::ServiceAccount;
use tracing::{error, info};

use crate::config::PlatformConfig;
use crate::error::RegistrationError;
use crate::privilege::{PrivilegeSet, Resolution};
use crate::request::{DecisionRequest, Operation};
use crate::response::DecisionResponse;
use crate::webhook::{
    RuleOperation, RuleScope, TriggerRule, Webhook, WebhookDescriptor, expects_kind,
};

pub const WEBHOOK_NAME: &str = "serviceaccount-validation";

const ALLOWED_USERS: [&str; 1] = ["backplane-cluster-admin"];
const ALLOWED_GROUPS: [&str; 1] = ["system:serviceaccounts:openshift-backplane-srep"];

/// Accounts the platform recreates on its own
const ALLOWED_SERVICE_ACCOUNTS: [&str; 3] = ["builder", "default", "deployer"];

/// Privileged namespaces whose service accounts customers manage
const EXCEPTION_NAMESPACES: [&str; 3] = [
    "openshift-logging",
    "openshift-user-workload-monitoring",
    "openshift-operators",
];

/// Prevents deletion of service accounts in managed namespaces
pub struct ServiceAccountWebhook {
    descriptor: WebhookDescriptor,
    config: Arc<PlatformConfig>,
    allowed: PrivilegeSet,
}

impl ServiceAccountWebhook {
    pub fn new(config: Arc<PlatformConfig>) -> Result<Self, RegistrationError> {
        let rules = vec![
            TriggerRule::new([RuleOperation::Delete], RuleScope::Namespaced)
                .group("")
                .versions(["v1"])
                .resource("serviceaccounts"),
        ];

        Ok(Self {
            descriptor: WebhookDescriptor::validating(WEBHOOK_NAME, rules)
                .doc(
                    "Managed OpenShift Customers may not delete the service accounts under the \
                     managed namespaces.",
                )
                .timeout(2)
                .topologies(true, true),
            config,
            allowed: PrivilegeSet::builder()
                .users(ALLOWED_USERS)
                .groups(ALLOWED_GROUPS)
                .build()?,
        })
    }

    fn is_protected_namespace(&self, namespace: &str) -> bool {
        self.config.is_privileged_namespace(namespace) && !EXCEPTION_NAMESPACES.contains(&namespace)
    }
}

impl Webhook for ServiceAccountWebhook {
    fn descriptor(&self) -> &WebhookDescriptor {
        &self.descriptor
    }

    fn validate(&self, req: &DecisionRequest) -> bool {
        expects_kind(req, "", "ServiceAccount")
    }

    fn decide(&self, req: &DecisionRequest) -> DecisionResponse {
        let identity = req.identity();
        let namespace = req.namespace().unwrap_or_default();

        // Ordered before the system: prefix check, which would otherwise match it
        let resolution = self.allowed.resolve(identity, namespace);
        if resolution == Resolution::Unauthenticated {
            info!(user = %identity.username, "unauthenticated caller reached webhook, check RBAC");
            return DecisionResponse::deny(req, "Unauthenticated");
        }

        if identity.username.starts_with("system:") {
            return DecisionResponse::allow(req, "authenticated system: users are allowed");
        }
        if identity.username.starts_with("kube:") {
            return DecisionResponse::allow(req, "kube: users are allowed");
        }

        let sa: ServiceAccount = match req.subject() {
            Ok(sa) => sa,
            Err(err) => {
                error!(error = %err, "couldn't render a service account from the incoming request");
                return DecisionResponse::errored(req, err);
            }
        };

        let name = sa.metadata.name.as_deref().unwrap_or_else(|| req.name());
        if req.operation() == Operation::Delete
            && self.is_protected_namespace(namespace)
            && !matches!(resolution, Resolution::Exempt(_))
            && !ALLOWED_SERVICE_ACCOUNTS.contains(&name)
        {
            info!(serviceaccount = name, "delete of protected service account denied");
            return DecisionResponse::deny(
                req,
                format!(
                    "Deleting protected service account under namespace {namespace} is not allowed"
                ),
            );
        }

        DecisionResponse::allow(req, "Request is allowed")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::ReviewBuilder;

    fn webhook() -> ServiceAccountWebhook {
        let managed = ["openshift-monitoring".to_owned(), "openshift-logging".to_owned()];
        let config = PlatformConfig::with_managed(&managed).unwrap();
        ServiceAccountWebhook::new(Arc::new(config)).unwrap()
    }

    fn delete(username: &str, groups: &[&str], namespace: &str, name: &str) -> DecisionRequest {
        ReviewBuilder::new("", "v1", "ServiceAccount", "serviceaccounts", "DELETE")
            .namespace(namespace)
            .user(username, groups)
            .old_object(json!({
                "apiVersion": "v1",
                "kind": "ServiceAccount",
                "metadata": { "name": name, "namespace": namespace }
            }))
            .request()
    }

    #[test]
    fn test_customer_cannot_delete_managed_service_account() {
        let req = delete("test@user", &["dedicated-admins"], "openshift-monitoring", "prometheus");
        let res = webhook().decide(&req);
        assert!(!res.allowed());
        assert_eq!(
            res.reason(),
            "Deleting protected service account under namespace openshift-monitoring is not allowed"
        );
    }

    #[test]
    fn test_recreated_accounts_may_be_deleted() {
        for name in ALLOWED_SERVICE_ACCOUNTS {
            let res = webhook().decide(&delete("test@user", &[], "openshift-monitoring", name));
            assert!(res.allowed(), "{name}");
        }
    }

    #[test]
    fn test_exception_and_customer_namespaces() {
        let hook = webhook();
        assert!(hook.decide(&delete("test@user", &[], "openshift-logging", "collector")).allowed());
        assert!(hook.decide(&delete("test@user", &[], "my-app", "worker")).allowed());
    }

    #[test]
    fn test_allowed_identities() {
        let hook = webhook();
        assert!(hook.decide(&delete("backplane-cluster-admin", &[], "kube-system", "x")).allowed());
        let backplane = ["system:serviceaccounts:openshift-backplane-srep"];
        assert!(hook.decide(&delete("sre", &backplane, "kube-system", "x")).allowed());
        assert!(hook.decide(&delete("system:admin", &[], "kube-system", "x")).allowed());
        assert!(hook.decide(&delete("kube:admin", &[], "kube-system", "x")).allowed());
    }

    #[test]
    fn test_unauthenticated_denied_before_system_prefix() {
        let res = webhook().decide(&delete("system:unauthenticated", &[], "my-app", "x"));
        assert!(!res.allowed());
        assert_eq!(res.reason(), "Unauthenticated");
    }

    #[test]
    fn test_descriptor_enabled_everywhere() {
        let hook = webhook();
        assert!(hook.descriptor().classic_enabled);
        assert!(hook.descriptor().hosted_enabled);
        assert_eq!(hook.rules()[0].api_versions, ["v1"]);
    }
}
