//! Webhook registry keyed by URI path
//!
//! Built and validated once; a rebuilt registry replaces the previous one as a
//! whole through [`SharedRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::RegistrationError;
use crate::webhook::{SideEffects, Topology, Webhook, WebhookDescriptor};

const MAX_NAME_LEN: usize = 63;
const TIMEOUT_RANGE: std::ops::RangeInclusive<i32> = 1..=30;

/// Immutable mapping from URI path to handler
pub struct Registry {
    by_uri: HashMap<String, Arc<dyn Webhook>>,
    order: Vec<String>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("webhooks", &self.order).finish()
    }
}

impl Registry {
    /// Start building a Registry
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, uri: &str) -> Option<&Arc<dyn Webhook>> {
        self.by_uri.get(uri)
    }

    /// Registered webhooks in registration order
    pub fn webhooks(&self) -> impl Iterator<Item = &Arc<dyn Webhook>> {
        self.order.iter().filter_map(|uri| self.by_uri.get(uri))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    webhooks: Vec<Arc<dyn Webhook>>,
    topology: Option<Topology>,
}

impl RegistryBuilder {
    /// Registers a webhook
    ///
    /// Chain multiple calls to register several webhooks.
    #[must_use]
    pub fn webhook<W>(mut self, webhook: W) -> Self
    where
        W: Webhook + 'static,
    {
        self.webhooks.push(Arc::new(webhook));
        self
    }

    /// Only keep webhooks enabled for `topology`
    #[must_use]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Validates every descriptor and builds the registry
    ///
    /// Every registered descriptor is validated, including ones the topology
    /// filter then skips.
    pub fn build(self) -> Result<Registry, RegistrationError> {
        let mut by_uri = HashMap::with_capacity(self.webhooks.len());
        let mut order = Vec::with_capacity(self.webhooks.len());

        for webhook in self.webhooks {
            let descriptor = webhook.descriptor();
            check(descriptor)?;

            let uri = descriptor.uri();
            if by_uri.contains_key(&uri) {
                return Err(RegistrationError::DuplicateUri(uri));
            }

            if let Some(topology) = self.topology
                && !descriptor.enabled_on(topology)
            {
                debug!(webhook = descriptor.name, ?topology, "skipping webhook for topology");
                // Reserve the uri so duplicates are still caught
                by_uri.insert(uri, webhook);
                continue;
            }

            order.push(uri.clone());
            by_uri.insert(uri, webhook);
        }

        by_uri.retain(|uri, _| order.contains(uri));

        Ok(Registry { by_uri, order })
    }
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

fn check(descriptor: &WebhookDescriptor) -> Result<(), RegistrationError> {
    let name = descriptor.name;

    if !is_dns_label(name) {
        return Err(RegistrationError::InvalidName(name.to_owned()));
    }

    if descriptor.rules.is_empty() {
        return Err(RegistrationError::NoRules(name.to_owned()));
    }

    for rule in &descriptor.rules {
        let reason = if rule.operations.is_empty() {
            Some("no operations")
        } else if rule.api_groups.is_empty() {
            Some("no api groups")
        } else if rule.api_versions.is_empty() {
            Some("no api versions")
        } else if rule.resources.is_empty() {
            Some("no resources")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(RegistrationError::IncompleteRule {
                name: name.to_owned(),
                reason,
            });
        }
    }

    if !TIMEOUT_RANGE.contains(&descriptor.timeout_seconds) {
        return Err(RegistrationError::InvalidTimeout {
            name: name.to_owned(),
            seconds: descriptor.timeout_seconds,
        });
    }

    match descriptor.side_effects {
        SideEffects::None | SideEffects::NoneOnDryRun => Ok(()),
        other => Err(RegistrationError::UnsupportedSideEffects {
            name: name.to_owned(),
            class: other.as_str().to_owned(),
        }),
    }
}

/// Registry handle shared by request workers and the refresh task
///
/// Readers clone the current snapshot; writers replace it wholesale.
#[derive(Clone, Debug)]
pub struct SharedRegistry {
    current: Arc<RwLock<Arc<Registry>>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<Registry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in a new snapshot; in-flight readers keep the one they loaded
    pub fn store(&self, registry: Registry) {
        let next = Arc::new(registry);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl From<Registry> for SharedRegistry {
    fn from(registry: Registry) -> Self {
        Self::new(registry)
    }
}
