//! Replacement-record cache.

use std::net::IpAddr;

use flowsight::{FlowsightError, Result};
use serde::{Deserialize, Serialize};

/// Replacement record for a NAT-rewritten flow: the post-NAT identity and
/// the backend endpoint standing in for the virtual service address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIpMap {
    pub community_id: String,
    pub replace_ip: IpAddr,
    pub replace_port: u16,
}

/// Key/value store with time-based expiry where replacement records are
/// published. Keyed by the pre-NAT Community-ID.
pub trait ReplacementCache: Send + Sync {
    fn set(&self, key: &str, value: &ClusterIpMap, expiration_secs: u32) -> Result<()>;
}

/// Memcached-backed replacement cache.
pub struct MemcachedCache {
    client: memcache::Client,
}

impl MemcachedCache {
    /// Connects to the server and verifies it is reachable. An unreachable
    /// cache at startup aborts the process.
    pub fn connect(addr: &str) -> Result<MemcachedCache> {
        let client = memcache::connect(format!("memcache://{addr}"))
            .map_err(|e| FlowsightError::Cache(e.to_string()))?;
        client
            .version()
            .map_err(|e| FlowsightError::Cache(e.to_string()))?;
        Ok(MemcachedCache { client })
    }
}

impl ReplacementCache for MemcachedCache {
    fn set(&self, key: &str, value: &ClusterIpMap, expiration_secs: u32) -> Result<()> {
        let payload =
            serde_json::to_string(value).map_err(|e| FlowsightError::Cache(e.to_string()))?;
        self.client
            .set(key, payload.as_str(), expiration_secs)
            .map_err(|e| FlowsightError::Cache(e.to_string()))
    }
}
