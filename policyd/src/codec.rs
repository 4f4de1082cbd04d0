//! Envelope codec: review bytes in, review bytes out

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CodecError;
use crate::request::DecisionRequest;
use crate::response::DecisionResponse;

/// The only content type accepted on the wire
pub const CONTENT_TYPE: &str = "application/json";

#[derive(Deserialize, Default)]
#[serde(default)]
struct UidEnvelope {
    request: Option<UidOnly>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UidOnly {
    uid: Option<String>,
}

/// Recovers the correlation id from a body that is at least JSON
fn recover_uid(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<UidEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.request)
        .and_then(|req| req.uid)
        .filter(|uid| !uid.is_empty())
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(CONTENT_TYPE)
}

/// Decodes a review envelope into a decision request
pub fn decode(body: &[u8], content_type: Option<&str>) -> Result<DecisionRequest, CodecError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::MalformedBody {
            reason: "request body is empty".into(),
            uid: None,
        });
    }

    let uid = recover_uid(body);

    match content_type {
        Some(ct) if is_json(ct) => {}
        other => {
            return Err(CodecError::UnsupportedContentType {
                found: other.unwrap_or_default().to_owned(),
                uid,
            });
        }
    }

    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|err| CodecError::MalformedBody {
            reason: err.to_string(),
            uid: uid.clone(),
        })?;

    review.try_into()
}

/// Encodes a decision response into a review envelope
///
/// The audit annotation is (re)applied here, so encoding the same response
/// twice yields identical bytes. Patches go on the wire as a base64 string.
pub fn encode(response: &DecisionResponse) -> Result<Vec<u8>, CodecError> {
    let mut response = response.clone();
    response.stamp_audit();

    let inner = response.into_inner();
    let patch = inner.patch.as_deref().map(|raw| STANDARD.encode(raw));

    let mut review = serde_json::to_value(inner.into_review()).map_err(CodecError::Encode)?;
    if let Some(patch) = patch
        && let Some(res) = review.get_mut("response").and_then(Value::as_object_mut)
    {
        res.insert("patch".to_owned(), Value::String(patch));
    }

    serde_json::to_vec(&review).map_err(CodecError::Encode)
}
