//! ECS-shaped wire events
//!
//! Converts aggregated flows into the Elastic Common Schema 1.4 event shape
//! the sink expects. Field names are the wire contract.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::flow::Flow;

const ECS_VERSION: &str = "1.4";
const AGENT_TYPE: &str = "insight";

#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub hostname: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ecs {
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDescription {
    /// Flow duration in nanoseconds.
    pub duration: i64,
    pub kind: String,
    pub action: String,
    pub category: String,
    pub dataset: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointDescription {
    pub address: String,
    pub ip: IpAddr,
    pub port: u16,
    pub bytes: u64,
    pub packets: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub bytes: u64,
    pub packets: u64,
    pub transport: String,
    pub community_id: String,
}

/// One flow record as delivered to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub ecs: Ecs,
    pub agent: Agent,
    pub event: EventDescription,
    pub source: EndpointDescription,
    pub destination: EndpointDescription,
    pub network: NetworkDescription,
}

/// Flow-to-event encoder carrying the reporting hostname, resolved once at
/// construction.
pub struct Encoder {
    hostname: String,
}

impl Encoder {
    pub fn new() -> Encoder {
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "undefined".to_string());
        Encoder { hostname }
    }

    pub fn encode(&self, flow: &Flow) -> Event {
        let ip_version = if flow.meta.src.to_canonical().is_ipv4() {
            "ipv4"
        } else {
            "ipv6"
        };

        Event {
            kind: String::new(),
            ecs: Ecs {
                version: ECS_VERSION.to_string(),
            },
            agent: Agent {
                hostname: self.hostname.clone(),
                kind: AGENT_TYPE.to_string(),
            },
            event: EventDescription {
                duration: (flow.end - flow.start).num_nanoseconds().unwrap_or(i64::MAX),
                kind: "event".to_string(),
                action: "network_flow".to_string(),
                category: "network_traffic".to_string(),
                dataset: "flow".to_string(),
                start: flow.start,
                end: flow.end,
            },
            source: EndpointDescription {
                address: flow.meta.src.to_string(),
                ip: flow.meta.src,
                port: flow.meta.src_port,
                bytes: flow.incoming.bytes,
                packets: flow.incoming.packets,
            },
            destination: EndpointDescription {
                address: flow.meta.dst.to_string(),
                ip: flow.meta.dst,
                port: flow.meta.dst_port,
                bytes: flow.outgoing.bytes,
                packets: flow.outgoing.packets,
            },
            network: NetworkDescription {
                kind: ip_version.to_string(),
                bytes: flow.incoming.bytes + flow.outgoing.bytes,
                packets: flow.incoming.packets + flow.outgoing.packets,
                transport: flow.meta.transport.to_string(),
                community_id: flow.community_id.clone(),
            },
        }
    }

    pub fn encode_all(&self, flows: &[Flow]) -> Vec<Event> {
        flows.iter().map(|flow| self.encode(flow)).collect()
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}
