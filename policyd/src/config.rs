//! Platform configuration snapshots
//!
//! Privileged namespaces come from built-in patterns plus the cluster's
//! managed-namespaces ConfigMap. Loading falls back to a conservative default
//! whenever the ConfigMap cannot be used.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{ConfigError, RegistrationError};
use crate::privilege::PatternClass;

/// Patterns privileged on every cluster
pub const BUILTIN_PRIVILEGED_NAMESPACES: [&str; 4] =
    ["^kube$", "^kube-.*", "^default$", "^redhat.*"];

/// Added to the built-ins when the managed namespaces are unknown
pub const FALLBACK_NAMESPACE_PATTERN: &str = "openshift.*";

pub const MANAGED_NAMESPACES_CONFIGMAP: &str = "managed-namespaces";
pub const MANAGED_NAMESPACES_NAMESPACE: &str = "openshift-monitoring";
pub const MANAGED_NAMESPACES_KEY: &str = "managed_namespaces.yaml";

#[derive(Deserialize, Default)]
struct ManagedNamespacesConfig {
    #[serde(rename = "Resources", default)]
    resources: ManagedNamespaceList,
}

#[derive(Deserialize, Default)]
struct ManagedNamespaceList {
    #[serde(rename = "Namespace", default)]
    namespace: Vec<ManagedNamespace>,
}

#[derive(Deserialize)]
struct ManagedNamespace {
    #[serde(default)]
    name: String,
}

/// Parses the `managed_namespaces.yaml` document
pub fn parse_managed_namespaces(raw: &str) -> Result<Vec<String>, ConfigError> {
    let config: ManagedNamespacesConfig = serde_yaml::from_str(raw)?;
    let names: Vec<String> = config
        .resources
        .namespace
        .into_iter()
        .map(|ns| ns.name)
        .filter(|name| !name.is_empty())
        .collect();

    if names.is_empty() {
        return Err(ConfigError::Empty);
    }

    Ok(names)
}

/// Immutable view of the platform's privileged namespaces
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    privileged_namespaces: PatternClass,
}

impl PlatformConfig {
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            privileged_namespaces: PatternClass::new(patterns)?,
        })
    }

    /// Built-ins plus an exact-match pattern per managed namespace
    pub fn with_managed(namespaces: &[String]) -> Result<Self, RegistrationError> {
        let managed = namespaces
            .iter()
            .map(|ns| format!("^{}$", regex::escape(ns)));
        Self::from_patterns(
            BUILTIN_PRIVILEGED_NAMESPACES
                .iter()
                .map(|p| (*p).to_owned())
                .chain(managed),
        )
    }

    /// Conservative snapshot used when the managed namespaces are unknown
    pub fn fallback() -> Result<Self, RegistrationError> {
        Self::from_patterns(
            BUILTIN_PRIVILEGED_NAMESPACES
                .into_iter()
                .chain([FALLBACK_NAMESPACE_PATTERN]),
        )
    }

    pub fn is_privileged_namespace(&self, namespace: &str) -> bool {
        self.privileged_namespaces.is_match(namespace)
    }

    pub fn privileged_patterns(&self) -> &[String] {
        self.privileged_namespaces.patterns()
    }
}

/// Where managed namespace names come from
#[async_trait]
pub trait NamespaceSource: Send + Sync {
    async fn managed_namespaces(&self) -> Result<Vec<String>, ConfigError>;
}

/// Reads the managed-namespaces ConfigMap through the API server
#[derive(Clone)]
pub struct KubeNamespaceSource {
    api: Api<ConfigMap>,
}

impl KubeNamespaceSource {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::namespaced(client, MANAGED_NAMESPACES_NAMESPACE),
        }
    }
}

#[async_trait]
impl NamespaceSource for KubeNamespaceSource {
    async fn managed_namespaces(&self) -> Result<Vec<String>, ConfigError> {
        let cm = self.api.get(MANAGED_NAMESPACES_CONFIGMAP).await?;
        let raw = cm
            .data
            .as_ref()
            .and_then(|data| data.get(MANAGED_NAMESPACES_KEY))
            .ok_or_else(|| ConfigError::MissingKey {
                namespace: MANAGED_NAMESPACES_NAMESPACE.to_owned(),
                name: MANAGED_NAMESPACES_CONFIGMAP.to_owned(),
                key: MANAGED_NAMESPACES_KEY.to_owned(),
            })?;

        parse_managed_namespaces(raw)
    }
}

/// Builds a snapshot from `source`, failing closed to [`PlatformConfig::fallback`]
pub async fn load(source: &dyn NamespaceSource) -> Result<PlatformConfig, RegistrationError> {
    match source.managed_namespaces().await {
        Ok(namespaces) => {
            info!(count = namespaces.len(), "loaded managed namespaces");
            PlatformConfig::with_managed(&namespaces)
        }
        Err(err) => {
            error!(
                error = %err,
                configmap = MANAGED_NAMESPACES_CONFIGMAP,
                namespace = MANAGED_NAMESPACES_NAMESPACE,
                fallback = FALLBACK_NAMESPACE_PATTERN,
                "unable to load managed namespaces"
            );
            PlatformConfig::fallback()
        }
    }
}
