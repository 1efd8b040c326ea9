//! Sidecar injection decisions and patch generation.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::prelude::*;
use k8s_openapi::api::apps::v1::{DaemonSet, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use kube::api::{Api, ListParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use warp::http::StatusCode;
use warp::Filter;

use crate::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, PatchOperation, PATCH_TYPE_JSON_PATCH,
};
use tracing::{error, info, warn};

/// Decides per admission request whether the probe sidecar is appended to a
/// workload, and produces the JSON patch doing so.
pub struct Injector {
    client: kube::Client,
    /// Namespaces annotated `<annotation>=true` get the sidecar.
    namespace_annotation: String,
    sidecar_patch: PatchOperation,
}

impl Injector {
    pub fn new(client: kube::Client, annotation: &str, container: Container) -> Result<Injector> {
        let value = serde_json::to_value(container)
            .context("failed to serialize sidecar container template")?;
        Ok(Injector {
            client,
            namespace_annotation: annotation.to_string(),
            sidecar_patch: PatchOperation {
                op: "add".to_string(),
                path: "/spec/containers/-".to_string(),
                value: Some(value),
            },
        })
    }

    /// Produces the reply review for one admission request. The request is
    /// always allowed; injection only decides whether a patch rides along.
    pub async fn review(&self, request: AdmissionRequest) -> Result<AdmissionReview> {
        let pod: Pod = serde_json::from_value(request.object.clone())
            .context("failed to decode workload spec")?;

        let inject = self.injection_enabled(&pod).await;
        if inject {
            info!(
                pod = pod.metadata.name.as_deref().unwrap_or_default(),
                "injecting sidecar probe"
            );
        }
        build_review(&self.sidecar_patch, request, inject)
    }

    /// Whether the workload's namespace carries the injection annotation set
    /// to `"true"`. Workloads created through a controller arrive without a
    /// namespace; the owning controller's namespace is resolved instead.
    async fn injection_enabled(&self, pod: &Pod) -> bool {
        let namespace = match pod.metadata.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => Some(ns.to_string()),
            _ => self.owner_namespace(pod).await,
        };

        let Some(namespace) = namespace else {
            warn!("could not resolve workload namespace, declining injection");
            return false;
        };

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = match namespaces.get(&namespace).await {
            Ok(ns) => ns,
            Err(e) => {
                error!(namespace = %namespace, error = %e, "namespace lookup failed");
                return false;
            }
        };

        let enabled = ns
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(&self.namespace_annotation))
            .is_some_and(|value| value == "true");

        if enabled {
            info!(namespace = %namespace, "injection enabled");
        } else {
            info!(namespace = %namespace, "injection not configured/disabled");
        }
        enabled
    }

    /// Resolves the namespace of the controller owning `pod` by matching the
    /// owner reference uid against the controller kinds that create pods.
    async fn owner_namespace(&self, pod: &Pod) -> Option<String> {
        for owner in pod.metadata.owner_references.as_deref().unwrap_or(&[]) {
            if !owner.controller.unwrap_or(false) {
                continue;
            }

            let namespace = match owner.kind.as_str() {
                "ReplicaSet" => self.namespace_of::<ReplicaSet>(&owner.uid).await,
                "DaemonSet" => self.namespace_of::<DaemonSet>(&owner.uid).await,
                "StatefulSet" => self.namespace_of::<StatefulSet>(&owner.uid).await,
                _ => None,
            };

            if namespace.is_some() {
                return namespace;
            }
        }
        None
    }

    /// Lists a controller kind cluster-wide and returns the namespace of the
    /// object with the given uid.
    async fn namespace_of<K>(&self, uid: &str) -> Option<String>
    where
        K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, "owner lookup failed");
                return None;
            }
        };

        list.items
            .into_iter()
            .find(|item| item.meta().uid.as_deref() == Some(uid))
            .and_then(|item| item.meta().namespace.clone())
    }
}

/// Builds the reply review for a request, appending the base64-encoded
/// sidecar patch when injecting.
fn build_review(
    sidecar_patch: &PatchOperation,
    request: AdmissionRequest,
    inject: bool,
) -> Result<AdmissionReview> {
    let mut response = AdmissionResponse::allow(request.uid);

    if inject {
        let patch =
            serde_json::to_vec(&[sidecar_patch.clone()]).context("failed to serialize patch")?;
        response.patch = Some(BASE64_STANDARD.encode(patch));
        response.patch_type = Some(PATCH_TYPE_JSON_PATCH.to_string());
    }

    Ok(AdmissionReview::reply(response))
}

/// Webhook routes: `POST /inject` with an `application/json` admission
/// review. Requests with the wrong content type are rejected before the
/// body is read.
pub fn routes(
    injector: Arc<Injector>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("inject")
        .and(warp::post())
        .and(warp::header::exact("content-type", "application/json"))
        .and(warp::body::json())
        .then(move |review: AdmissionReview| {
            let injector = Arc::clone(&injector);
            async move {
                let Some(request) = review.request else {
                    error!("review carries no request object");
                    return warp::reply::with_status(
                        warp::reply::json(&"missing admission request"),
                        StatusCode::BAD_REQUEST,
                    );
                };

                match injector.review(request).await {
                    Ok(reply) => warp::reply::with_status(warp::reply::json(&reply), StatusCode::OK),
                    Err(e) => {
                        error!(error = %e, "patch generation failed");
                        warp::reply::with_status(
                            warp::reply::json(&"patch generation failed"),
                            StatusCode::INTERNAL_SERVER_ERROR,
                        )
                    }
                }
            }
        })
}
