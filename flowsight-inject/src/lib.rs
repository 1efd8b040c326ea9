//! flowsight-inject - Probe sidecar injection webhook
//!
//! Serves the cluster's mutating admission webhook over TLS. Workloads in
//! namespaces annotated for injection get the probe sidecar appended to
//! their container list via a JSON patch.

pub mod admission;
pub mod inject;
