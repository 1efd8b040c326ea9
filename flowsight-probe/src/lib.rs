//! flowsight-probe - Sidecar network probe
//!
//! The probe runs next to a workload container and:
//! - Captures packets from the pod's network interface
//! - Aggregates them into bidirectional flows keyed by Community-ID
//! - Rotates the flow table on a fixed interval
//! - Ships each rotation as a JSON batch to the configured sink

pub mod probe;
