//! Review envelope fixtures shared by unit tests

use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use serde_json::{Value, json};

use crate::request::DecisionRequest;

pub(crate) struct ReviewBuilder {
    request: Value,
}

impl ReviewBuilder {
    pub(crate) fn new(group: &str, version: &str, kind: &str, resource: &str, op: &str) -> Self {
        Self {
            request: json!({
                "uid": "test-uid",
                "kind": { "group": group, "version": version, "kind": kind },
                "resource": { "group": group, "version": version, "resource": resource },
                "name": "",
                "operation": op,
                "userInfo": {},
            }),
        }
    }

    pub(crate) fn namespaces(op: &str) -> Self {
        Self::new("", "v1", "Namespace", "namespaces", op)
    }

    pub(crate) fn pods(op: &str) -> Self {
        Self::new("", "v1", "Pod", "pods", op).namespace("default")
    }

    pub(crate) fn uid(mut self, uid: &str) -> Self {
        self.request["uid"] = json!(uid);
        self
    }

    pub(crate) fn user(mut self, username: &str, groups: &[&str]) -> Self {
        self.request["userInfo"] = json!({ "username": username, "groups": groups });
        self
    }

    pub(crate) fn namespace(mut self, namespace: &str) -> Self {
        self.request["namespace"] = json!(namespace);
        self
    }

    pub(crate) fn object(mut self, object: Value) -> Self {
        if let Some(name) = object.pointer("/metadata/name").and_then(Value::as_str) {
            self.request["name"] = json!(name);
        }
        self.request["object"] = object;
        self
    }

    pub(crate) fn old_object(mut self, object: Value) -> Self {
        if let Some(name) = object.pointer("/metadata/name").and_then(Value::as_str) {
            self.request["name"] = json!(name);
        }
        self.request["oldObject"] = object;
        self
    }

    pub(crate) fn envelope(&self) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": self.request,
        })
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.envelope()).unwrap()
    }

    pub(crate) fn request(&self) -> DecisionRequest {
        let review: AdmissionReview<DynamicObject> =
            serde_json::from_value(self.envelope()).unwrap();
        review.try_into().unwrap()
    }
}

/// Namespace payload with the given labels
pub(crate) fn namespace_object(name: &str, labels: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name, "labels": labels }
    })
}
