//! admission/v1 review model and RFC 6902 patch operations.
//!
//! Only the fields the webhook exchange actually touches are modeled; the
//! workload spec itself travels as raw JSON and is decoded on demand.

use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "admission.k8s.io/v1";
pub const KIND: &str = "AdmissionReview";
pub const PATCH_TYPE_JSON_PATCH: &str = "JSONPatch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionReview {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wraps a response into a reply review.
    pub fn reply(response: AdmissionResponse) -> AdmissionReview {
        AdmissionReview {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub uid: String,
    /// The workload manifest under review.
    #[serde(default)]
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    /// Base64-encoded JSON patch, present only when mutating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(
        rename = "patchType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub patch_type: Option<String>,
}

impl AdmissionResponse {
    /// Allows the request untouched.
    pub fn allow(uid: String) -> AdmissionResponse {
        AdmissionResponse {
            uid,
            allowed: true,
            patch: None,
            patch_type: None,
        }
    }
}

/// RFC 6902 JSON patch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_review_decodes() {
        let body = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "object": {"metadata": {"name": "web-0", "namespace": "default"}}
            }
        });

        let review: AdmissionReview = serde_json::from_value(body).unwrap();
        let request = review.request.unwrap();
        assert_eq!(request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(request.object["metadata"]["name"], "web-0");
        assert!(review.response.is_none());
    }

    #[test]
    fn test_reply_review_shape() {
        let review = AdmissionReview::reply(AdmissionResponse::allow("abc".to_string()));
        let value = serde_json::to_value(&review).unwrap();

        assert_eq!(value["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(value["kind"], "AdmissionReview");
        assert_eq!(value["response"]["uid"], "abc");
        assert_eq!(value["response"]["allowed"], true);
        // No patch fields serialized for a plain allow
        assert!(value["response"].get("patch").is_none());
        assert!(value.get("request").is_none());
    }
}
