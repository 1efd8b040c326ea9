//! Cluster watch-stream demultiplexing
//!
//! The cluster API emits ADDED/MODIFIED/DELETED events per watched kind.
//! This module maps raw watch streams onto one sum type over the workload
//! kinds the pipeline tracks, so consumers dispatch by tag instead of
//! downcasting.

pub mod service_ips;

pub use service_ips::ServiceIpSet;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::api::{Api, WatchEvent, WatchParams};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{FlowsightError, Result};

/// A demultiplexed cluster watch event.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Added(WorkloadObject),
    Modified(WorkloadObject),
    Deleted(WorkloadObject),
}

impl ClusterEvent {
    pub fn object(&self) -> &WorkloadObject {
        match self {
            ClusterEvent::Added(o) | ClusterEvent::Modified(o) | ClusterEvent::Deleted(o) => o,
        }
    }
}

/// The concrete workload kinds the pipeline watches.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum WorkloadObject {
    Pod(Pod),
    Service(Service),
    Endpoints(Endpoints),
    ReplicaSet(ReplicaSet),
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
}

impl WorkloadObject {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadObject::Pod(_) => "pod",
            WorkloadObject::Service(_) => "service",
            WorkloadObject::Endpoints(_) => "endpoints",
            WorkloadObject::ReplicaSet(_) => "replicaset",
            WorkloadObject::DaemonSet(_) => "daemonset",
            WorkloadObject::StatefulSet(_) => "statefulset",
        }
    }

    fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            WorkloadObject::Pod(o) => &o.metadata,
            WorkloadObject::Service(o) => &o.metadata,
            WorkloadObject::Endpoints(o) => &o.metadata,
            WorkloadObject::ReplicaSet(o) => &o.metadata,
            WorkloadObject::DaemonSet(o) => &o.metadata,
            WorkloadObject::StatefulSet(o) => &o.metadata,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Workload address: pod IP for pods, cluster IP for services. Unset
    /// addresses and the headless `"None"` sentinel map to `None`.
    pub fn ip(&self) -> Option<&str> {
        let ip = match self {
            WorkloadObject::Pod(pod) => pod.status.as_ref()?.pod_ip.as_deref()?,
            WorkloadObject::Service(svc) => svc.spec.as_ref()?.cluster_ip.as_deref()?,
            _ => return None,
        };
        if ip.is_empty() || ip == "None" {
            return None;
        }
        Some(ip)
    }
}

impl serde::Serialize for WorkloadObject {
    /// Serializes as the wrapped object's own manifest shape.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            WorkloadObject::Pod(o) => o.serialize(serializer),
            WorkloadObject::Service(o) => o.serialize(serializer),
            WorkloadObject::Endpoints(o) => o.serialize(serializer),
            WorkloadObject::ReplicaSet(o) => o.serialize(serializer),
            WorkloadObject::DaemonSet(o) => o.serialize(serializer),
            WorkloadObject::StatefulSet(o) => o.serialize(serializer),
        }
    }
}

/// Workload kinds the demultiplexer understands.
pub trait Workload: Clone + DeserializeOwned + std::fmt::Debug + Send + 'static {
    fn into_object(self) -> WorkloadObject;
}

macro_rules! impl_workload {
    ($($kind:ident),+) => {
        $(impl Workload for $kind {
            fn into_object(self) -> WorkloadObject {
                WorkloadObject::$kind(self)
            }
        })+
    };
}

impl_workload!(Pod, Service, Endpoints, ReplicaSet, DaemonSet, StatefulSet);

/// Drives one raw watch stream, forwarding demultiplexed events into `tx`.
///
/// Bookmarks and error events are skipped with a warning; the function
/// returns when the stream ends, the watch fails, or the receiver is gone.
pub async fn forward<K: Workload>(api: Api<K>, tx: mpsc::Sender<ClusterEvent>) -> Result<()> {
    let mut stream = api
        .watch(&WatchParams::default(), "0")
        .await
        .map_err(|e| FlowsightError::Kubernetes(e.to_string()))?
        .boxed();

    loop {
        let item = stream
            .try_next()
            .await
            .map_err(|e| FlowsightError::Kubernetes(e.to_string()))?;

        let Some(event) = item else {
            return Ok(());
        };

        let mapped = match event {
            WatchEvent::Added(obj) => ClusterEvent::Added(obj.into_object()),
            WatchEvent::Modified(obj) => ClusterEvent::Modified(obj.into_object()),
            WatchEvent::Deleted(obj) => ClusterEvent::Deleted(obj.into_object()),
            WatchEvent::Bookmark(_) => continue,
            WatchEvent::Error(e) => {
                warn!(code = e.code, reason = %e.reason, "watch stream error event");
                continue;
            }
        };

        if tx.send(mapped).await.is_err() {
            // Consumer is gone, nothing left to forward to
            return Ok(());
        }
    }
}
