use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::request::{DecisionRequest, Operation};
use crate::response::DecisionResponse;

/// Operations a trigger rule fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleOperation {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "CONNECT")]
    Connect,
}

impl RuleOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        }
    }

    pub fn covers(self, op: Operation) -> bool {
        match self {
            Self::All => true,
            Self::Create => op == Operation::Create,
            Self::Update => op == Operation::Update,
            Self::Delete => op == Operation::Delete,
            Self::Connect => op == Operation::Connect,
        }
    }
}

/// Resource scope a trigger rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleScope {
    #[serde(rename = "*")]
    All,
    Cluster,
    Namespaced,
}

impl RuleScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Cluster => "Cluster",
            Self::Namespaced => "Namespaced",
        }
    }
}

/// Which operations on which resources invoke a webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    pub operations: Vec<RuleOperation>,
    pub api_groups: Vec<String>,
    pub api_versions: Vec<String>,
    pub resources: Vec<String>,
    pub scope: RuleScope,
}

impl TriggerRule {
    pub fn new(operations: impl IntoIterator<Item = RuleOperation>, scope: RuleScope) -> Self {
        Self {
            operations: operations.into_iter().collect(),
            api_groups: Vec::new(),
            api_versions: vec!["*".into()],
            resources: Vec::new(),
            scope,
        }
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.api_groups.push(group.into());
        self
    }

    #[must_use]
    pub fn versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn covers(&self, op: Operation) -> bool {
        self.operations.iter().any(|rule_op| rule_op.covers(op))
    }
}

/// Mirrors `matchPolicy` of the registration manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchPolicy {
    Exact,
    Equivalent,
}

impl MatchPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "Exact",
            Self::Equivalent => "Equivalent",
        }
    }
}

/// How the API server reacts when this service cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailurePolicy {
    Ignore,
    Fail,
}

impl FailurePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "Ignore",
            Self::Fail => "Fail",
        }
    }
}

/// Side effects declared to the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SideEffects {
    None,
    NoneOnDryRun,
    Some,
    Unknown,
}

impl SideEffects {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::NoneOnDryRun => "NoneOnDryRun",
            Self::Some => "Some",
            Self::Unknown => "Unknown",
        }
    }
}

/// Control-plane layout a webhook is deployed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Topology {
    /// Classic clusters with an in-cluster control plane
    Classic,
    /// Hosted control planes
    Hosted,
}

/// Static metadata of a registered webhook
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct WebhookDescriptor {
    pub name: &'static str,
    pub doc: String,
    pub rules: Vec<TriggerRule>,
    pub object_selector: Option<BTreeMap<String, String>>,
    pub match_policy: MatchPolicy,
    pub failure_policy: FailurePolicy,
    pub side_effects: SideEffects,
    pub timeout_seconds: i32,
    pub mutating: bool,
    pub classic_enabled: bool,
    pub hosted_enabled: bool,
}

impl WebhookDescriptor {
    /// Validating webhook defaults: equivalent matching, ignore on failure, no side effects
    pub fn validating(name: &'static str, rules: Vec<TriggerRule>) -> Self {
        Self {
            name,
            doc: String::new(),
            rules,
            object_selector: None,
            match_policy: MatchPolicy::Equivalent,
            failure_policy: FailurePolicy::Ignore,
            side_effects: SideEffects::None,
            timeout_seconds: 2,
            mutating: false,
            classic_enabled: true,
            hosted_enabled: false,
        }
    }

    pub fn mutating(name: &'static str, rules: Vec<TriggerRule>) -> Self {
        Self {
            mutating: true,
            ..Self::validating(name, rules)
        }
    }

    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    #[must_use]
    pub fn timeout(mut self, seconds: i32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Restricts the webhook to objects carrying every one of `labels`
    #[must_use]
    pub fn object_selector<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels = labels
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.object_selector = Some(labels);
        self
    }

    #[must_use]
    pub fn topologies(mut self, classic: bool, hosted: bool) -> Self {
        self.classic_enabled = classic;
        self.hosted_enabled = hosted;
        self
    }

    /// URI path the webhook is served on
    pub fn uri(&self) -> String {
        format!("/{}", self.name)
    }

    pub fn enabled_on(&self, topology: Topology) -> bool {
        match topology {
            Topology::Classic => self.classic_enabled,
            Topology::Hosted => self.hosted_enabled,
        }
    }

    pub fn timeout_budget(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.timeout_seconds).unwrap_or_default())
    }
}

/// Capability set every policy implements
///
/// Handlers are pure functions of the request plus immutable data captured at
/// construction, so a single instance is shared across concurrent requests.
pub trait Webhook: Send + Sync {
    /// Static metadata used for routing and manifest generation
    fn descriptor(&self) -> &WebhookDescriptor;

    /// Cheap envelope-level sanity check run before [`Webhook::decide`]
    ///
    /// Must not decode `object` or `oldObject`.
    fn validate(&self, req: &DecisionRequest) -> bool;

    /// The policy itself; total over every request the rules admit
    fn decide(&self, req: &DecisionRequest) -> DecisionResponse;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    fn rules(&self) -> &[TriggerRule] {
        &self.descriptor().rules
    }

    fn timeout_budget(&self) -> Duration {
        self.descriptor().timeout_budget()
    }
}

/// Envelope check shared by most handlers: a named caller and the expected kind
pub fn expects_kind(req: &DecisionRequest, group: &str, kind: &str) -> bool {
    !req.identity().username.is_empty() && req.matches_kind(group, kind)
}
