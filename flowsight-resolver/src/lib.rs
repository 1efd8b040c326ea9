//! flowsight-resolver - NAT resolution for virtual service addresses
//!
//! Watches the cluster's service addresses and the kernel conntrack event
//! stream. For every tracked connection whose original destination is a
//! virtual service address, a replacement record keyed by the pre-NAT
//! Community-ID is published to the lookup cache, letting downstream
//! enrichment rewrite post-NAT flow identities back to the service identity.

pub mod cache;
pub mod resolver;
