use std::fmt;

use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview, Operation as AdmissionOperation};
use kube::core::{GroupVersionKind, GroupVersionResource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, PayloadError};

/// Username and group the API server assigns to anonymous callers
pub const UNAUTHENTICATED: &str = "system:unauthenticated";

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Resource operation carried by a decision request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&AdmissionOperation> for Operation {
    fn from(op: &AdmissionOperation) -> Self {
        match op {
            AdmissionOperation::Create => Self::Create,
            AdmissionOperation::Update => Self::Update,
            AdmissionOperation::Delete => Self::Delete,
            AdmissionOperation::Connect => Self::Connect,
        }
    }
}

/// Whether the target resource lives in a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Cluster,
    Namespaced,
}

/// The requester as reported by the API server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new<I, S>(username: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            username: username.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Anonymous callers should never reach a webhook; RBAC is misconfigured if they do.
    pub fn is_unauthenticated(&self) -> bool {
        self.username == UNAUTHENTICATED || self.in_group(UNAUTHENTICATED)
    }

    /// Splits `system:serviceaccount:<namespace>:<name>` usernames
    pub fn service_account(&self) -> Option<(&str, &str)> {
        self.username
            .strip_prefix(SERVICE_ACCOUNT_PREFIX)
            .and_then(|rest| rest.split_once(':'))
    }
}

/// Old and new state of the target resource, decoded according to the operation
#[derive(Debug, Clone, PartialEq)]
pub enum States<K> {
    Created { proposed: K },
    Updated { previous: K, proposed: K },
    Deleted { previous: K },
}

impl<K> States<K> {
    pub fn previous(&self) -> Option<&K> {
        match self {
            Self::Created { .. } => None,
            Self::Updated { previous, .. } | Self::Deleted { previous } => Some(previous),
        }
    }

    pub fn proposed(&self) -> Option<&K> {
        match self {
            Self::Created { proposed } | Self::Updated { proposed, .. } => Some(proposed),
            Self::Deleted { .. } => None,
        }
    }

    /// Authoritative state: the new one for create/update, the prior one for delete
    pub fn subject(&self) -> &K {
        match self {
            Self::Created { proposed } | Self::Updated { proposed, .. } => proposed,
            Self::Deleted { previous } => previous,
        }
    }
}

/// An admission request as handed to policy handlers
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    inner: AdmissionRequest<DynamicObject>,
    operation: Operation,
    identity: Identity,
}

impl DecisionRequest {
    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn kind(&self) -> &GroupVersionKind {
        &self.inner.kind
    }

    pub fn resource(&self) -> &GroupVersionResource {
        &self.inner.resource
    }

    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scope(&self) -> Scope {
        if self.namespace().is_some() {
            Scope::Namespaced
        } else {
            Scope::Cluster
        }
    }

    pub fn dry_run(&self) -> bool {
        self.inner.dry_run
    }

    pub fn matches_kind(&self, group: &str, kind: &str) -> bool {
        self.inner.kind.group == group && self.inner.kind.kind == kind
    }

    pub(crate) fn admission(&self) -> &AdmissionRequest<DynamicObject> {
        &self.inner
    }

    /// Decodes the payloads the operation defines
    ///
    /// Create reads `object`, update reads both, delete reads `oldObject`.
    /// A payload the operation does not define is ignored even when present.
    pub fn states<K: DeserializeOwned>(&self) -> Result<States<K>, PayloadError> {
        let operation = self.operation.as_str();
        let object = || {
            self.inner
                .object
                .as_ref()
                .ok_or(PayloadError::MissingObject { operation })
                .and_then(render)
        };
        let old_object = || {
            self.inner
                .old_object
                .as_ref()
                .ok_or(PayloadError::MissingOldObject { operation })
                .and_then(render)
        };

        match self.operation {
            Operation::Create => Ok(States::Created {
                proposed: object()?,
            }),
            Operation::Update => Ok(States::Updated {
                previous: old_object()?,
                proposed: object()?,
            }),
            Operation::Delete => Ok(States::Deleted {
                previous: old_object()?,
            }),
            Operation::Connect => Err(PayloadError::Unsupported { operation }),
        }
    }

    /// Decodes only the authoritative state, see [`States::subject`]
    pub fn subject<K: DeserializeOwned>(&self) -> Result<K, PayloadError> {
        let operation = self.operation.as_str();
        let (payload, missing) = match self.operation {
            Operation::Create | Operation::Update => (
                self.inner.object.as_ref(),
                PayloadError::MissingObject { operation },
            ),
            Operation::Delete => (
                self.inner.old_object.as_ref(),
                PayloadError::MissingOldObject { operation },
            ),
            Operation::Connect => return Err(PayloadError::Unsupported { operation }),
        };

        payload.ok_or(missing).and_then(render)
    }
}

fn render<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, PayloadError> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

impl From<AdmissionRequest<DynamicObject>> for DecisionRequest {
    fn from(inner: AdmissionRequest<DynamicObject>) -> Self {
        let identity = Identity {
            username: inner.user_info.username.clone().unwrap_or_default(),
            groups: inner.user_info.groups.clone().unwrap_or_default(),
        };
        let operation = Operation::from(&inner.operation);

        Self {
            inner,
            operation,
            identity,
        }
    }
}

impl TryFrom<AdmissionReview<DynamicObject>> for DecisionRequest {
    type Error = CodecError;

    fn try_from(review: AdmissionReview<DynamicObject>) -> Result<Self, Self::Error> {
        let req: AdmissionRequest<DynamicObject> =
            review.try_into().map_err(|_| CodecError::MissingRequest)?;
        Ok(req.into())
    }
}
