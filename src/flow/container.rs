//! Flow table aggregating packet samples between two rotations.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::community_id::Hasher;
use super::Flow;
use crate::capture::Sample;

/// Aggregates samples into flows, keyed by Community-ID.
///
/// A container lives from construction until `dump`; the owning probe then
/// replaces it with a fresh one. All mutation is serialized under a single
/// mutex, so `dump` is exclusive with `add`.
pub struct FlowContainer {
    flows: Mutex<HashMap<String, Flow>>,
    hasher: Hasher,
    start: DateTime<Utc>,
}

impl FlowContainer {
    pub fn new() -> FlowContainer {
        FlowContainer {
            flows: Mutex::new(HashMap::new()),
            hasher: Hasher::new(0),
            start: Utc::now(),
        }
    }

    /// Credits a sample to its flow, creating the flow with a
    /// direction-corrected tuple on first sight. Exactly one of the flow's
    /// direction counters is incremented.
    pub fn add(&self, sample: &Sample) {
        let meta = sample.flow_meta();
        let id = self.hasher.hash(&meta);

        let mut flows = self.flows.lock().expect("flow table mutex poisoned");

        let flow = flows
            .entry(id)
            .or_insert_with(|| Flow::new(meta.with_corrected_source()));

        if flow.meta.src.to_canonical() == sample.src.to_canonical() {
            // Src -> Dst
            flow.incoming.packets += 1;
            flow.incoming.bytes += u64::from(sample.bytes);
        } else {
            // Dst -> Src
            flow.outgoing.packets += 1;
            flow.outgoing.bytes += u64::from(sample.bytes);
        }
    }

    /// Snapshots all flows, stamping each with its Community-ID key and the
    /// container's time range.
    pub fn dump(&self) -> Vec<Flow> {
        let flows = self.flows.lock().expect("flow table mutex poisoned");

        let end = Utc::now();

        flows
            .iter()
            .map(|(id, flow)| {
                let mut flow = flow.clone();
                flow.community_id = id.clone();
                flow.start = self.start;
                flow.end = end;
                flow
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.flows.lock().expect("flow table mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FlowContainer {
    fn default() -> FlowContainer {
        FlowContainer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::icmp::{
        ICMP4_ECHO_REPLY, ICMP4_ECHO_REQUEST, ICMP6_ECHO_REPLY, ICMP6_ECHO_REQUEST,
    };
    use crate::flow::Counters;
    use crate::protos::Protocol;

    fn sample(
        transport: Protocol,
        src: &str,
        sport: u16,
        dst: &str,
        dport: u16,
        icmp_type: u16,
        bytes: u16,
    ) -> Sample {
        Sample {
            transport,
            icmp_type,
            icmp_code: 0,
            src_port: sport,
            dst_port: dport,
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            bytes,
        }
    }

    fn dumped(container: &FlowContainer) -> Vec<Flow> {
        let mut flows = container.dump();
        flows.sort_by(|a, b| a.community_id.cmp(&b.community_id));
        flows
    }

    #[test]
    fn test_aggregates_both_directions_tcp() {
        let container = FlowContainer::new();
        for s in [
            sample(Protocol::Tcp, "10.0.0.1", 123, "10.0.0.2", 345, 0, 1024),
            sample(Protocol::Tcp, "10.0.0.2", 345, "10.0.0.1", 123, 0, 2048),
            sample(Protocol::Tcp, "10.0.0.1", 123, "10.0.0.2", 345, 0, 1024),
        ] {
            container.add(&s);
        }

        let flows = dumped(&container);
        assert_eq!(flows.len(), 1);

        let flow = &flows[0];
        // Correction picks 10.0.0.2:345 as the client side
        assert_eq!(flow.meta.src, "10.0.0.2".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(flow.meta.src_port, 345);
        assert_eq!(flow.meta.dst_port, 123);
        assert_eq!(flow.incoming, Counters { bytes: 2048, packets: 1 });
        assert_eq!(flow.outgoing, Counters { bytes: 2048, packets: 2 });
        assert!(flow.start <= flow.end);
    }

    #[test]
    fn test_aggregates_both_directions_udp_v6() {
        let container = FlowContainer::new();
        for s in [
            sample(Protocol::Udp, "2000:dead:beef::2345", 123, "2000:dead:beef::1234", 345, 0, 1024),
            sample(Protocol::Udp, "2000:dead:beef::1234", 345, "2000:dead:beef::2345", 123, 0, 2048),
            sample(Protocol::Udp, "2000:dead:beef::2345", 123, "2000:dead:beef::1234", 345, 0, 1024),
        ] {
            container.add(&s);
        }

        let flows = dumped(&container);
        assert_eq!(flows.len(), 1);

        let flow = &flows[0];
        assert_eq!(flow.meta.src, "2000:dead:beef::1234".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(flow.meta.src_port, 345);
        assert_eq!(flow.incoming, Counters { bytes: 2048, packets: 1 });
        assert_eq!(flow.outgoing, Counters { bytes: 2048, packets: 2 });
    }

    #[test]
    fn test_aggregates_icmp_request_reply() {
        let container = FlowContainer::new();
        for s in [
            sample(Protocol::Icmp4, "10.0.0.1", 0, "10.0.0.2", 0, ICMP4_ECHO_REQUEST, 512),
            sample(Protocol::Icmp4, "10.0.0.1", 0, "10.0.0.2", 0, ICMP4_ECHO_REQUEST, 512),
            sample(Protocol::Icmp4, "10.0.0.2", 0, "10.0.0.1", 0, ICMP4_ECHO_REPLY, 512),
        ] {
            container.add(&s);
        }

        let flows = dumped(&container);
        assert_eq!(flows.len(), 1);

        let flow = &flows[0];
        assert_eq!(flow.meta.icmp_type, ICMP4_ECHO_REQUEST);
        assert_eq!(flow.meta.src, "10.0.0.1".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(flow.incoming, Counters { bytes: 1024, packets: 2 });
        assert_eq!(flow.outgoing, Counters { bytes: 512, packets: 1 });
    }

    #[test]
    fn test_aggregates_icmp6_reply_first() {
        let container = FlowContainer::new();
        for s in [
            sample(
                Protocol::Icmp6,
                "2000:dead:beef::2345",
                0,
                "2000:dead:beef::1234",
                0,
                ICMP6_ECHO_REPLY,
                512,
            ),
            sample(
                Protocol::Icmp6,
                "2000:dead:beef::1234",
                0,
                "2000:dead:beef::2345",
                0,
                ICMP6_ECHO_REQUEST,
                512,
            ),
        ] {
            container.add(&s);
        }

        let flows = dumped(&container);
        assert_eq!(flows.len(), 1);

        let flow = &flows[0];
        // The reply was seen first; correction still orients onto the request leg
        assert_eq!(flow.meta.icmp_type, ICMP6_ECHO_REQUEST);
        assert_eq!(flow.meta.src, "2000:dead:beef::1234".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(flow.incoming, Counters { bytes: 512, packets: 1 });
        assert_eq!(flow.outgoing, Counters { bytes: 512, packets: 1 });
    }

    #[test]
    fn test_dump_stamps_key_as_community_id() {
        let container = FlowContainer::new();
        container.add(&sample(Protocol::Tcp, "10.0.0.1", 123, "10.0.0.2", 345, 0, 64));

        let hasher = Hasher::new(0);
        for flow in container.dump() {
            assert_eq!(flow.community_id, hasher.hash(&flow.meta));
        }
    }

    #[test]
    fn test_distinct_flows_stay_separate() {
        let container = FlowContainer::new();
        container.add(&sample(Protocol::Tcp, "10.0.0.1", 123, "10.0.0.2", 345, 0, 64));
        container.add(&sample(Protocol::Udp, "10.0.0.1", 123, "10.0.0.2", 345, 0, 64));
        container.add(&sample(Protocol::Tcp, "10.0.0.3", 123, "10.0.0.2", 345, 0, 64));

        assert_eq!(container.len(), 3);
    }
}
