//! Decision responses and the constructors handlers build them with
//!
//! Every constructor echoes the correlation id of the originating request and
//! stamps the ownership audit annotation.

use std::fmt::Display;

use json_patch::Patch;
use kube::core::admission::AdmissionResponse;
use tracing::error;

use crate::request::DecisionRequest;

/// Audit annotation key attached to every response
pub const AUDIT_OWNER_KEY: &str = "owner";

/// Audit annotation value attached to every response
pub const AUDIT_OWNER_VALUE: &str = "policy-service";

const CODE_ALLOWED: u16 = 200;
const CODE_BAD_REQUEST: u16 = 400;
const CODE_FORBIDDEN: u16 = 403;

/// Allow/deny verdict for one decision request
#[derive(Debug, Clone)]
pub struct DecisionResponse {
    inner: AdmissionResponse,
}

impl DecisionResponse {
    /// Allows the request; the reason is informational and not shown to users
    pub fn allow(req: &DecisionRequest, reason: impl Into<String>) -> Self {
        let mut res = AdmissionResponse::from(req.admission());
        res.result.code = CODE_ALLOWED;
        res.result.message = reason.into();
        Self::stamped(res)
    }

    /// Denies the request with a user-facing reason
    pub fn deny(req: &DecisionRequest, reason: impl Into<String>) -> Self {
        let mut res = AdmissionResponse::from(req.admission()).deny(reason.into());
        res.result.code = CODE_FORBIDDEN;
        Self::stamped(res)
    }

    /// Rejects a request whose payload could not be evaluated
    pub fn errored(req: &DecisionRequest, cause: impl Display) -> Self {
        let mut res = AdmissionResponse::from(req.admission()).deny(cause.to_string());
        res.result.code = CODE_BAD_REQUEST;
        Self::stamped(res)
    }

    /// Allows the request with a JSON patch; only mutating webhooks may return this
    ///
    /// Falls back to [`DecisionResponse::errored`] if the patch cannot be serialized.
    pub fn patched(req: &DecisionRequest, reason: impl Into<String>, patch: Patch) -> Self {
        match AdmissionResponse::from(req.admission()).with_patch(patch) {
            Ok(mut res) => {
                res.result.code = CODE_ALLOWED;
                res.result.message = reason.into();
                Self::stamped(res)
            }
            Err(err) => {
                error!(uid = req.uid(), error = %err, "failed to serialize patch");
                Self::errored(req, "unable to build patch for request")
            }
        }
    }

    /// Transport-level failure for an envelope that never became a request
    pub(crate) fn invalid(uid: Option<&str>, reason: impl Display) -> Self {
        let mut res = AdmissionResponse::invalid(reason.to_string());
        res.result.code = CODE_BAD_REQUEST;
        if let Some(uid) = uid {
            res.uid = uid.to_owned();
        }
        Self::stamped(res)
    }

    fn stamped(inner: AdmissionResponse) -> Self {
        let mut res = Self { inner };
        res.stamp_audit();
        res
    }

    /// Inserting the fixed pair is idempotent
    pub(crate) fn stamp_audit(&mut self) {
        self.inner
            .audit_annotations
            .insert(AUDIT_OWNER_KEY.to_owned(), AUDIT_OWNER_VALUE.to_owned());
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    pub fn allowed(&self) -> bool {
        self.inner.allowed
    }

    pub fn reason(&self) -> &str {
        &self.inner.result.message
    }

    pub fn code(&self) -> u16 {
        self.inner.result.code
    }

    pub fn has_patch(&self) -> bool {
        self.inner.patch.is_some()
    }

    /// Decoded patch operations, if any
    pub fn patch(&self) -> Option<Patch> {
        self.inner
            .patch
            .as_deref()
            .and_then(|raw| serde_json::from_slice(raw).ok())
    }

    pub(crate) fn into_inner(self) -> AdmissionResponse {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use json_patch::jsonptr::PointerBuf;
    use json_patch::{AddOperation, PatchOperation};
    use serde_json::json;

    use super::*;
    use crate::testutil::{ReviewBuilder, namespace_object};

    fn request() -> DecisionRequest {
        ReviewBuilder::namespaces("CREATE")
            .uid("abc-123")
            .user("test@user", &[])
            .object(namespace_object("my-ns", json!({})))
            .request()
    }

    #[test]
    fn test_constructors_echo_uid_and_annotation() {
        let req = request();
        let responses = [
            DecisionResponse::allow(&req, "fine"),
            DecisionResponse::deny(&req, "nope"),
            DecisionResponse::errored(&req, "broken payload"),
        ];

        for res in responses {
            assert_eq!(res.uid(), "abc-123");
            assert_eq!(
                res.inner.audit_annotations.get(AUDIT_OWNER_KEY).map(String::as_str),
                Some(AUDIT_OWNER_VALUE)
            );
            assert!(!res.has_patch());
        }
    }

    #[test]
    fn test_verdicts_and_codes() {
        let req = request();

        let allowed = DecisionResponse::allow(&req, "fine");
        assert!(allowed.allowed());
        assert_eq!(allowed.code(), 200);

        let denied = DecisionResponse::deny(&req, "nope");
        assert!(!denied.allowed());
        assert_eq!(denied.reason(), "nope");
        assert_eq!(denied.code(), 403);

        let errored = DecisionResponse::errored(&req, "broken payload");
        assert!(!errored.allowed());
        assert_eq!(errored.code(), 400);
    }

    #[test]
    fn test_patched_carries_operations() {
        let req = request();
        let patch = Patch(vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::parse("/metadata/labels/test-label").unwrap(),
            value: json!("test-value"),
        })]);

        let res = DecisionResponse::patched(&req, "labelled", patch.clone());
        assert!(res.allowed());
        assert_eq!(res.uid(), "abc-123");
        assert_eq!(res.patch(), Some(patch));
    }

    #[test]
    fn test_stamp_is_idempotent() {
        let mut res = DecisionResponse::invalid(Some("x"), "bad");
        res.stamp_audit();
        res.stamp_audit();
        assert_eq!(res.inner.audit_annotations.len(), 1);
        assert_eq!(res.uid(), "x");
    }
}
