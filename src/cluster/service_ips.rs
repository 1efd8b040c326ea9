//! Virtual-service address set fed by the cluster watch stream.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;

use super::{ClusterEvent, WorkloadObject};

/// The set of cluster IPs currently assigned to services.
///
/// Mutated by the service watch stream and queried per conntrack event; all
/// operations are serialized under one mutex.
pub struct ServiceIpSet {
    data: Mutex<HashSet<String>>,
}

impl ServiceIpSet {
    pub fn new() -> ServiceIpSet {
        ServiceIpSet {
            data: Mutex::new(HashSet::new()),
        }
    }

    /// Applies one watch event. Only service objects with a real cluster IP
    /// participate; headless services and other kinds are ignored, as are
    /// MODIFIED events (a service's cluster IP is immutable).
    pub fn handle_event(&self, event: &ClusterEvent) {
        let (object, added) = match event {
            ClusterEvent::Added(object) => (object, true),
            ClusterEvent::Deleted(object) => (object, false),
            ClusterEvent::Modified(_) => return,
        };

        if !matches!(object, WorkloadObject::Service(_)) {
            return;
        }

        let Some(ip) = object.ip() else {
            return;
        };

        let mut data = self.data.lock().expect("service IP set mutex poisoned");
        if added {
            data.insert(ip.to_string());
        } else {
            data.remove(ip);
        }
    }

    /// Whether `ip` is a known virtual service address.
    pub fn is_service_ip(&self, ip: IpAddr) -> bool {
        let key = ip.to_canonical().to_string();
        self.data
            .lock()
            .expect("service IP set mutex poisoned")
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.data.lock().expect("service IP set mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ServiceIpSet {
    fn default() -> ServiceIpSet {
        ServiceIpSet::new()
    }
}
