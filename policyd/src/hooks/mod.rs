//! Built-in policies

use std::sync::Arc;

use crate::config::PlatformConfig;
use crate::error::RegistrationError;
use crate::registry::Registry;
use crate::webhook::Topology;

pub mod namespace;
pub mod pod;
pub mod service;
pub mod serviceaccount;
pub mod subscription;

pub use namespace::NamespaceWebhook;
pub use pod::PodWebhook;
pub use service::ServiceWebhook;
pub use serviceaccount::ServiceAccountWebhook;
pub use subscription::SubscriptionWebhook;

/// Service-account groups trusted by most policies
///
/// Centralized e2e suites run as `osde2e-abcde`, decentralized ones as `osde2e-h-abcde`.
pub const PRIVILEGED_SERVICE_ACCOUNT_GROUPS: &str =
    r"^system:serviceaccounts:(kube-.*|openshift|openshift-.*|default|redhat-.*|osde2e-(h-)?[a-z0-9]{5})";

/// Users with full cluster administration rights
pub const CLUSTER_ADMIN_USERS: [&str; 3] =
    ["kube:admin", "system:admin", "backplane-cluster-admin"];

pub const CLUSTER_ADMIN_GROUP: &str = "cluster-admins";

pub const SRE_ADMIN_GROUPS: [&str; 1] = ["system:serviceaccounts:openshift-backplane-srep"];

/// Builds the registry of every built-in policy for `config`
///
/// With a topology, only the policies enabled for it are served.
pub fn registry(
    config: &Arc<PlatformConfig>,
    topology: Option<Topology>,
) -> Result<Registry, RegistrationError> {
    let builder = Registry::builder()
        .webhook(NamespaceWebhook::new(config.clone())?)
        .webhook(PodWebhook::new(config.clone())?)
        .webhook(ServiceAccountWebhook::new(config.clone())?)
        .webhook(SubscriptionWebhook::new()?)
        .webhook(ServiceWebhook::new());

    match topology {
        Some(topology) => builder.topology(topology).build(),
        None => builder.build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<PlatformConfig> {
        Arc::new(PlatformConfig::fallback().unwrap())
    }

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = registry(&config(), None).unwrap();
        assert_eq!(registry.len(), 5);
        for uri in [
            "/namespace-validation",
            "/pod-validation",
            "/serviceaccount-validation",
            "/subscription-validation",
            "/service-mutation",
        ] {
            assert!(registry.get(uri).is_some(), "{uri}");
        }
    }

    #[test]
    fn test_topologies() {
        let classic = registry(&config(), Some(Topology::Classic)).unwrap();
        assert!(classic.get("/service-mutation").is_none());
        assert!(classic.get("/namespace-validation").is_some());

        let hosted = registry(&config(), Some(Topology::Hosted)).unwrap();
        assert_eq!(hosted.len(), 2);
        assert!(hosted.get("/service-mutation").is_some());
        assert!(hosted.get("/serviceaccount-validation").is_some());
        assert!(hosted.get("/pod-validation").is_none());
    }
}
