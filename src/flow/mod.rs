//! Flow metadata model and aggregation
//!
//! A flow is identified by its 7-tuple (transport, addresses, ports, ICMP
//! type/code) and carries per-direction byte/packet counters. Both directions
//! of a connection collapse onto the same flow via the Community-ID hash.

pub mod community_id;
pub mod container;
pub mod icmp;

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::protos::Protocol;

/// Per-direction flow counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub bytes: u64,
    pub packets: u64,
}

/// Flow metadata: the tuple identifying a flow. For TCP/UDP the ports are
/// meaningful and the ICMP fields are zero; for ICMP it is the reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMeta {
    pub transport: Protocol,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub icmp_type: u16,
    pub icmp_code: u16,
}

impl FlowMeta {
    /// Heuristic orientation of the tuple: the endpoint with the lower
    /// (well-known) port is assumed to be the server and becomes the
    /// destination; reply-type ICMP messages are flipped back onto their
    /// request leg. Ephemeral-to-ephemeral flows may stay misoriented.
    pub fn with_corrected_source(mut self) -> FlowMeta {
        match self.transport {
            Protocol::Tcp | Protocol::Udp => {
                if self.dst_port > self.src_port {
                    std::mem::swap(&mut self.src, &mut self.dst);
                    std::mem::swap(&mut self.src_port, &mut self.dst_port);
                }
            }
            Protocol::Icmp4 => {
                if let Some(request) = icmp::icmp4_request_type(self.icmp_type) {
                    std::mem::swap(&mut self.src, &mut self.dst);
                    self.icmp_type = request;
                }
            }
            Protocol::Icmp6 => {
                if let Some(request) = icmp::icmp6_request_type(self.icmp_type) {
                    std::mem::swap(&mut self.src, &mut self.dst);
                    self.icmp_type = request;
                }
            }
            Protocol::Undefined => {}
        }

        self
    }
}

/// An aggregated bidirectional flow.
///
/// `incoming` counts packets sent by `meta.src`, `outgoing` the reverse
/// direction. `community_id`, `start` and `end` are stamped when the owning
/// container is dumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub meta: FlowMeta,
    pub incoming: Counters,
    pub outgoing: Counters,
    pub community_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Flow {
    pub fn new(meta: FlowMeta) -> Flow {
        let now = Utc::now();
        Flow {
            meta,
            incoming: Counters::default(),
            outgoing: Counters::default(),
            community_id: String::new(),
            start: now,
            end: now,
        }
    }
}
