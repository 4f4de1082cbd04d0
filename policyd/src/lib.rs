//! Admission decision service for platform-managed clusters
//!
//! Decodes admission reviews, routes them by URI path to a registered policy
//! and answers with an allow, deny, errored or patched decision. Policies
//! consult a privilege resolver and a protected-label guard; the set of
//! privileged namespaces comes from an immutable configuration snapshot that
//! is refreshed out of band.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod manifest;
pub mod privilege;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;
pub mod webhook;

#[cfg(test)]
mod testutil;

pub use config::{KubeNamespaceSource, NamespaceSource, PlatformConfig};
pub use dispatcher::{Dispatcher, Routed};
pub use error::{CodecError, ConfigError, Error, PayloadError, RegistrationError, Result};
pub use registry::{Registry, SharedRegistry};
pub use request::{DecisionRequest, Identity, Operation};
pub use response::DecisionResponse;
pub use webhook::{Topology, TriggerRule, Webhook, WebhookDescriptor};
