//! Request routing
//!
//! Transport status is reserved for envelope and routing problems. Once a
//! registered handler accepts a request the transport reports success and the
//! verdict travels in the body.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use warp::http::StatusCode;

use crate::codec;
use crate::registry::SharedRegistry;
use crate::request::DecisionRequest;
use crate::response::DecisionResponse;
use crate::webhook::Webhook;

/// Encoded reply plus the transport status it goes out with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Routed {
    fn encoded(status: StatusCode, response: &DecisionResponse) -> Self {
        match codec::encode(response) {
            Ok(body) => Self { status, body },
            Err(err) => {
                error!(uid = response.uid(), error = %err, "failed to encode response");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: Vec::new(),
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: SharedRegistry,
}

impl Dispatcher {
    pub fn new(registry: impl Into<SharedRegistry>) -> Self {
        Self {
            registry: registry.into(),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Routes one raw request to its handler and encodes the outcome
    pub fn route(&self, path: &str, content_type: Option<&str>, body: &[u8]) -> Routed {
        let req = match codec::decode(body, content_type) {
            Ok(req) => req,
            Err(err) => {
                warn!(path, uid = err.uid(), error = %err, "rejecting malformed review");
                let res = DecisionResponse::invalid(err.uid(), &err);
                return Routed::encoded(StatusCode::BAD_REQUEST, &res);
            }
        };

        let registry = self.registry.load();
        let Some(webhook) = registry.get(path) else {
            warn!(path, uid = req.uid(), "no webhook registered for path");
            let res = DecisionResponse::invalid(Some(req.uid()), format!("no webhook at {path}"));
            return Routed::encoded(StatusCode::NOT_FOUND, &res);
        };

        let res = dispatch(webhook.as_ref(), &req);
        Routed::encoded(StatusCode::OK, &res)
    }
}

/// Runs the handler state machine for a recognized request
pub fn dispatch(webhook: &dyn Webhook, req: &DecisionRequest) -> DecisionResponse {
    let span = tracing::info_span!(
        "decision",
        webhook = webhook.name(),
        uid = req.uid(),
        operation = %req.operation(),
        kind = %req.kind().kind,
        name = req.name(),
        dry_run = req.dry_run(),
    );
    let _entered = span.enter();

    if !webhook.rules().iter().any(|rule| rule.covers(req.operation())) {
        warn!("operation not covered by the webhook's rules");
        return DecisionResponse::errored(req, "Invalid request");
    }

    if !webhook.validate(req) {
        warn!("structural validation failed");
        return DecisionResponse::errored(req, "Invalid request");
    }

    let started = Instant::now();
    let res = match catch_unwind(AssertUnwindSafe(|| webhook.decide(req))) {
        Ok(res) => res,
        Err(_) => {
            error!("handler panicked");
            return DecisionResponse::errored(req, "internal error evaluating request");
        }
    };

    let elapsed = started.elapsed();
    if elapsed > webhook.timeout_budget() {
        warn!(
            ?elapsed,
            budget = ?webhook.timeout_budget(),
            "decision exceeded the declared timeout"
        );
    }

    if res.has_patch() && !webhook.descriptor().mutating {
        error!("validating webhook returned a patch");
        return DecisionResponse::errored(req, "internal error evaluating request");
    }

    if res.uid() != req.uid() {
        error!(response_uid = res.uid(), "handler response lost the request uid");
        return DecisionResponse::errored(req, "internal error evaluating request");
    }

    if res.allowed() {
        debug!(reason = res.reason(), patched = res.has_patch(), "allowed");
    } else {
        info!(reason = res.reason(), "denied");
    }

    res
}
