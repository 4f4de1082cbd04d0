use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::RegistrationError;
use crate::privilege::{PrivilegeSet, Resolution};
use crate::request::DecisionRequest;
use crate::response::DecisionResponse;
use crate::webhook::{
    RuleOperation, RuleScope, TriggerRule, Webhook, WebhookDescriptor, expects_kind,
};

pub const WEBHOOK_NAME: &str = "subscription-validation";

const LOGGING_SUBSCRIPTION: &str = "cluster-logging";
const ELASTICSEARCH_SUBSCRIPTION: &str = "elasticsearch-operator";

/// Channels with known issues in the logging stack
const BLOCKED_CHANNELS: [&str; 2] = ["4.5", "4.6"];

const PRIVILEGED_USERS: [&str; 3] = [
    "kube:admin",
    "system:admin",
    "system:serviceaccount:kube-system:generic-garbage-collector",
];
const ADMIN_GROUPS: [&str; 2] = ["osd-sre-admins", "osd-sre-cluster-admins"];

/// The only Subscription fields this policy reads
#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct Subscription {
    spec: SubscriptionSpec,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct SubscriptionSpec {
    channel: String,
    name: String,
}

/// Blocks logging operator subscriptions on broken channels
pub struct SubscriptionWebhook {
    descriptor: WebhookDescriptor,
    admins: PrivilegeSet,
}

impl SubscriptionWebhook {
    pub fn new() -> Result<Self, RegistrationError> {
        let rules = vec![
            TriggerRule::new(
                [RuleOperation::Update, RuleOperation::Create],
                RuleScope::Namespaced,
            )
            .group("operators.coreos.com")
            .resource("subscriptions"),
        ];

        let doc = format!(
            "Managed OpenShift customers may not update the {ELASTICSEARCH_SUBSCRIPTION} \
             subscription to the {BLOCKED_CHANNELS:?} channel(s) because there are known issues \
             with those channel(s) that are being worked on."
        );

        Ok(Self {
            descriptor: WebhookDescriptor::validating(WEBHOOK_NAME, rules)
                .doc(doc)
                .timeout(2),
            admins: PrivilegeSet::builder()
                .users(PRIVILEGED_USERS)
                .groups(ADMIN_GROUPS)
                .build()?,
        })
    }
}

fn is_blocked_logging_request(sub: &Subscription) -> bool {
    BLOCKED_CHANNELS.contains(&sub.spec.channel.as_str())
        && (sub.spec.name == LOGGING_SUBSCRIPTION || sub.spec.name == ELASTICSEARCH_SUBSCRIPTION)
}

impl Webhook for SubscriptionWebhook {
    fn descriptor(&self) -> &WebhookDescriptor {
        &self.descriptor
    }

    fn validate(&self, req: &DecisionRequest) -> bool {
        expects_kind(req, "operators.coreos.com", "Subscription")
    }

    fn decide(&self, req: &DecisionRequest) -> DecisionResponse {
        let resolution = self.admins.resolve(req.identity(), req.name());
        if resolution == Resolution::Unauthenticated {
            info!(
                user = %req.identity().username,
                "unauthenticated caller reached webhook, check RBAC"
            );
            return DecisionResponse::deny(req, "Unauthenticated");
        }

        let sub: Subscription = match req.subject() {
            Ok(sub) => sub,
            Err(err) => {
                error!(error = %err, "couldn't render a Subscription from the incoming request");
                return DecisionResponse::errored(req, err);
            }
        };

        if !is_blocked_logging_request(&sub) {
            return DecisionResponse::allow(
                req,
                "Base decisions for non-logging subscriptions on RBAC",
            );
        }

        if matches!(resolution, Resolution::Exempt(_)) {
            debug!(channel = %sub.spec.channel, "admin installing blocked logging channel");
            return DecisionResponse::allow(
                req,
                "Admins may install or upgrade to logging 4.5 or 4.6 operator",
            );
        }

        DecisionResponse::deny(
            req,
            "Only Red Hat SREs can install or upgrade to the v4.5 or v4.6 logging operator at \
             this time, as there are known issues with logging v4.5/v4.6 which we are working to \
             resolve.",
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::request::UNAUTHENTICATED;
    use crate::testutil::ReviewBuilder;

    fn request(username: &str, groups: &[&str], name: &str, channel: &str) -> DecisionRequest {
        ReviewBuilder::new(
            "operators.coreos.com",
            "v1alpha1",
            "Subscription",
            "subscriptions",
            "CREATE",
        )
        .namespace("openshift-logging")
        .user(username, groups)
        .object(json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "Subscription",
            "metadata": { "name": name, "namespace": "openshift-logging" },
            "spec": { "name": name, "channel": channel, "source": "redhat-operators" }
        }))
        .request()
    }

    #[test]
    fn test_blocked_channels_denied_for_customers() {
        let hook = SubscriptionWebhook::new().unwrap();
        for name in [LOGGING_SUBSCRIPTION, ELASTICSEARCH_SUBSCRIPTION] {
            for channel in BLOCKED_CHANNELS {
                let res = hook.decide(&request("test@user", &["dedicated-admins"], name, channel));
                assert!(!res.allowed(), "{name}@{channel}");
            }
        }
    }

    #[test]
    fn test_other_subscriptions_left_to_rbac() {
        let hook = SubscriptionWebhook::new().unwrap();
        let current = request("test@user", &[], LOGGING_SUBSCRIPTION, "stable-5.8");
        assert!(hook.decide(&current).allowed());
        assert!(hook.decide(&request("test@user", &[], "my-operator", "4.6")).allowed());
    }

    #[test]
    fn test_admins_may_use_blocked_channels() {
        let hook = SubscriptionWebhook::new().unwrap();
        assert!(hook.decide(&request("kube:admin", &[], LOGGING_SUBSCRIPTION, "4.5")).allowed());
        let sre = request("sre", &["osd-sre-admins"], ELASTICSEARCH_SUBSCRIPTION, "4.6");
        assert!(hook.decide(&sre).allowed());
    }

    #[test]
    fn test_unauthenticated_denied_on_any_subscription() {
        let hook = SubscriptionWebhook::new().unwrap();
        for (name, channel) in [(LOGGING_SUBSCRIPTION, "4.5"), ("my-operator", "stable")] {
            let anonymous = request(UNAUTHENTICATED, &[UNAUTHENTICATED], name, channel);
            let res = hook.decide(&anonymous);
            assert!(!res.allowed(), "{name}@{channel}");
            assert_eq!(res.reason(), "Unauthenticated");
        }
    }

    #[test]
    fn test_validate_expects_operators_group() {
        let hook = SubscriptionWebhook::new().unwrap();
        assert!(hook.validate(&request("test@user", &[], "x", "y")));

        let wrong_group = ReviewBuilder::new("", "v1", "Subscription", "subscriptions", "CREATE")
            .user("test@user", &[])
            .request();
        assert!(!hook.validate(&wrong_group));
    }
}
