//! flowsight-agent - Workload-state mirror
//!
//! The agent watches pods, services and endpoints cluster-wide and mirrors
//! them into a Postgres inventory keyed by uid, so the enrichment pipeline
//! can join observed flow endpoints against workload identities.

pub mod store;
