use thiserror::Error;

/// Errors surfaced while decoding or encoding the review envelope
///
/// Every variant that can happen after the body was readable JSON carries the
/// correlation id, so the transport error can still echo it.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Body was empty, not JSON, or not a review envelope
    #[error("malformed request body: {reason}")]
    MalformedBody { reason: String, uid: Option<String> },

    /// Content type other than `application/json`
    #[error("contentType={found}, expected application/json")]
    UnsupportedContentType { found: String, uid: Option<String> },

    /// Envelope without an inner request object
    #[error("no request in request body")]
    MissingRequest,

    /// Error during JSON serialization of the response envelope
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Correlation id recovered before the error occurred, if any
    pub fn uid(&self) -> Option<&str> {
        match self {
            Self::MalformedBody { uid, .. } | Self::UnsupportedContentType { uid, .. } => {
                uid.as_deref()
            }
            Self::MissingRequest | Self::Encode(_) => None,
        }
    }
}

/// Errors raised while rendering `object`/`oldObject` into a typed resource
#[derive(Error, Debug)]
pub enum PayloadError {
    /// `object` is required for this operation but absent
    #[error("{operation} request carries no object")]
    MissingObject { operation: &'static str },

    /// `oldObject` is required for this operation but absent
    #[error("{operation} request carries no oldObject")]
    MissingOldObject { operation: &'static str },

    /// The operation has no resource payload this service understands
    #[error("{operation} requests carry no decodable resource")]
    Unsupported { operation: &'static str },

    /// Error during JSON deserialization of the payload
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Misconfiguration caught while building the webhook registry
///
/// These are fatal: the service must not start serving with them.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("webhook name {0:?} is not a valid DNS label")]
    InvalidName(String),

    #[error("duplicate webhook trying to listen on {0}")]
    DuplicateUri(String),

    #[error("webhook {0} declares no trigger rules")]
    NoRules(String),

    #[error("webhook {name} has an incomplete trigger rule: {reason}")]
    IncompleteRule { name: String, reason: &'static str },

    #[error("webhook {name} declares timeout {seconds}s, expected 1..=30")]
    InvalidTimeout { name: String, seconds: i32 },

    #[error("webhook {name} declares side effects {class}, expected None or NoneOnDryRun")]
    UnsupportedSideEffects { name: String, class: String },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors from loading platform configuration out of band
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Kubernetes client
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("configmap {namespace}/{name} has no key {key}")]
    MissingKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("unable to parse managed namespaces: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no managed namespaces listed")]
    Empty,
}

/// Errors that can occur while running the service
#[derive(Error, Debug)]
pub enum Error {
    /// Error during JSON serialization/deserialization
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    /// Error during YAML serialization of generated manifests
    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Error from the Kubernetes client
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Registration Error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// Error binding the HTTP listener
    #[error("Server Error: {0}")]
    Server(#[from] warp::Error),
}

/// Result type for policyd operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
